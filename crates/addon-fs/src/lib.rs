//! Filesystem primitives for the addon deployment engine
//!
//! Provides normalized path handling, atomic I/O, writability probes,
//! recursive tree enumeration and a format-agnostic config store.

pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod path;
pub mod walk;

pub use config::ConfigStore;
pub use constants::PackageFile;
pub use error::{Error, Result};
pub use path::{NormalizedPath, is_identifier};
pub use walk::{EntryKind, TreeEntry, walk_tree};
