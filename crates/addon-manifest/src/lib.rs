//! Manifest reading for deployable packages.
//!
//! Every package carries an `info.ini` at its root. This crate scans that
//! file into a typed [`PackageDescriptor`], validating the required keys for
//! its [`PackageKind`], the identifier rules for its name, and that the name
//! matches the folder it lives in.

pub mod descriptor;
pub mod error;
pub mod ini;
pub mod reader;

pub use descriptor::{PackageDescriptor, PackageKind, parse_version};
pub use error::{Error, Result};
pub use ini::{IniDocument, IniError, IniTable, IniValue};
pub use reader::{read, read_archive};
