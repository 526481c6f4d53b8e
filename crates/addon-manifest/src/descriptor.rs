//! Typed package metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ini::{IniDocument, IniTable, IniValue};

/// The three package shapes the engine deploys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Addon,
    Module,
    Template,
}

impl PackageKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "addon" => Ok(Self::Addon),
            "module" => Ok(Self::Module),
            "template" => Ok(Self::Template),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Addon => "addon",
            Self::Module => "module",
            Self::Template => "template",
        }
    }

    /// Keys every manifest of this kind must declare.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Template => &["type", "module", "name", "title", "author", "version"],
            Self::Addon | Self::Module => &["type", "name", "title", "author", "version", "status"],
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys lifted into typed fields; everything else lands in `extra`.
const TYPED_KEYS: &[&str] = &[
    "type",
    "name",
    "title",
    "author",
    "version",
    "status",
    "description",
    "module",
    "addon",
    "database",
    "dir",
];

/// Validated metadata of one package.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageDescriptor {
    pub name: String,
    pub kind: PackageKind,
    pub title: String,
    pub author: String,
    pub version: String,
    pub status: i64,
    pub description: Option<String>,
    /// Owning module, templates only.
    pub module: Option<String>,
    /// Required addons, name to minimum version.
    pub addon: BTreeMap<String, String>,
    /// Table names that must exist, without prefix.
    pub database: Vec<String>,
    /// Paths relative to the site root that must be writable.
    pub dir: Vec<String>,
    pub extra: IniTable,
}

impl PackageDescriptor {
    /// Build a descriptor from a scanned document.
    ///
    /// `origin` names the manifest in errors. The name/folder identity check
    /// is left to the caller since archives have no folder.
    pub fn from_document(doc: &IniDocument, kind: PackageKind, origin: &Path) -> Result<Self> {
        if doc.is_empty() {
            return Err(Error::ManifestMalformed {
                path: origin.to_path_buf(),
                reason: "manifest is empty".into(),
            });
        }

        if let Some(missing) = kind.required_keys().iter().copied().find(|k| !doc.contains_key(k)) {
            return Err(Error::ManifestIncomplete {
                path: origin.to_path_buf(),
                reason: format!("missing required key '{missing}'"),
            });
        }

        let text = |key: &str| doc.get(key).and_then(IniValue::as_text);
        let name = text("name").unwrap_or_default();
        if !addon_fs::is_identifier(&name) {
            return Err(Error::InvalidName(name));
        }

        if let Some(declared) = text("type") {
            if declared != kind.as_str() {
                tracing::warn!(%name, %declared, requested = %kind, "manifest type differs from requested kind");
            }
        }

        let addon = doc
            .get("addon")
            .and_then(IniValue::as_table)
            .map(|table| {
                table
                    .iter()
                    .filter_map(|(k, v)| v.as_text().map(|v| (k.to_string(), v)))
                    .collect()
            })
            .unwrap_or_default();

        let mut extra = IniTable::new();
        for (key, value) in doc.table().iter() {
            if !TYPED_KEYS.contains(&key) {
                extra.insert(key, value.clone());
            }
        }

        Ok(Self {
            name,
            kind,
            title: text("title").unwrap_or_default(),
            author: text("author").unwrap_or_default(),
            version: text("version").unwrap_or_default(),
            status: doc.get("status").and_then(IniValue::as_int).unwrap_or(0),
            description: text("description").filter(|d| !d.is_empty()),
            module: text("module").filter(|m| !m.is_empty()),
            addon,
            database: doc.get("database").map(IniValue::to_string_list).unwrap_or_default(),
            dir: doc.get("dir").map(IniValue::to_string_list).unwrap_or_default(),
            extra,
        })
    }

    /// Parsed semantic version, if the declared version is semver.
    pub fn semver(&self) -> Option<semver::Version> {
        parse_version(&self.version)
    }

    /// Render back to an `info.ini` document.
    pub fn to_document(&self) -> IniDocument {
        let mut doc = IniDocument::new();
        doc.insert("type", string_value(self.kind.as_str()));
        doc.insert("name", string_value(&self.name));
        doc.insert("title", string_value(&self.title));
        doc.insert("author", string_value(&self.author));
        doc.insert("version", string_value(&self.version));
        doc.insert("status", IniValue::Int(self.status));
        if let Some(description) = &self.description {
            doc.insert("description", string_value(description));
        }
        if let Some(module) = &self.module {
            doc.insert("module", string_value(module));
        }
        if !self.database.is_empty() {
            doc.insert("database", string_value(&self.database.join(",")));
        }
        if !self.dir.is_empty() {
            doc.insert("dir", IniValue::List(self.dir.iter().map(|d| string_value(d)).collect()));
        }
        for (key, value) in self.extra.iter() {
            doc.insert(key, value.clone());
        }
        if !self.addon.is_empty() {
            let mut deps = IniTable::new();
            for (name, version) in &self.addon {
                deps.insert(name.as_str(), string_value(version));
            }
            doc.insert("addon", IniValue::Table(deps));
        }
        doc
    }
}

fn string_value(value: &str) -> IniValue {
    IniValue::String(value.to_string())
}

/// Lenient semver parsing: `1.2` is read as `1.2.0`, a leading `v` is
/// ignored.
pub fn parse_version(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    if let Ok(v) = semver::Version::parse(trimmed) {
        return Some(v);
    }
    let parts: Vec<&str> = trimmed.split('.').collect();
    let padded = match parts.len() {
        1 => format!("{trimmed}.0.0"),
        2 => format!("{trimmed}.0"),
        _ => return None,
    };
    semver::Version::parse(&padded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn doc(text: &str) -> IniDocument {
        IniDocument::parse(text).unwrap()
    }

    const ADDON: &str = "type = addon\nname = demo\ntitle = Demo\nauthor = me\nversion = 1.0.0\nstatus = 1\n";

    #[test]
    fn builds_addon_descriptor() {
        let text = format!("{ADDON}database = log, item\ncolor = red\n[addon]\nshop = 1.2\n");
        let d = PackageDescriptor::from_document(&doc(&text), PackageKind::Addon, Path::new("info.ini"))
            .unwrap();

        assert_eq!(d.name, "demo");
        assert_eq!(d.status, 1);
        assert_eq!(d.database, vec!["log".to_string(), "item".to_string()]);
        assert_eq!(d.addon.get("shop").map(String::as_str), Some("1.2"));
        assert_eq!(d.extra.get("color"), Some(&IniValue::String("red".into())));
        assert!(d.module.is_none());
    }

    #[rstest]
    #[case(PackageKind::Addon, "status")]
    #[case(PackageKind::Module, "status")]
    #[case(PackageKind::Template, "module")]
    fn missing_required_key_is_incomplete(#[case] kind: PackageKind, #[case] drop: &str) {
        let text = "type = x\nname = demo\ntitle = T\nauthor = a\nversion = 1\nstatus = 1\nmodule = index\n";
        let filtered: String = text
            .lines()
            .filter(|l| !l.starts_with(drop))
            .map(|l| format!("{l}\n"))
            .collect();
        let err = PackageDescriptor::from_document(&doc(&filtered), kind, Path::new("info.ini"))
            .unwrap_err();
        assert!(matches!(err, Error::ManifestIncomplete { ref reason, .. } if reason.contains(drop)));
    }

    #[test]
    fn template_does_not_need_status() {
        let text = "type = template\nmodule = index\nname = dark\ntitle = Dark\nauthor = a\nversion = 1.0.0\n";
        let d = PackageDescriptor::from_document(&doc(text), PackageKind::Template, Path::new("info.ini"))
            .unwrap();
        assert_eq!(d.module.as_deref(), Some("index"));
        assert_eq!(d.status, 0);
    }

    #[rstest]
    #[case("2demo")]
    #[case("de-mo")]
    #[case("_demo")]
    fn invalid_names_rejected(#[case] name: &str) {
        let text = ADDON.replace("name = demo", &format!("name = {name}"));
        let err = PackageDescriptor::from_document(&doc(&text), PackageKind::Addon, Path::new("info.ini"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidName(ref n) if n == name));
    }

    #[test]
    fn empty_document_is_malformed() {
        let err = PackageDescriptor::from_document(&IniDocument::new(), PackageKind::Addon, Path::new("info.ini"))
            .unwrap_err();
        assert!(matches!(err, Error::ManifestMalformed { .. }));
    }

    #[rstest]
    #[case("1.2.3", Some((1, 2, 3)))]
    #[case("1.2", Some((1, 2, 0)))]
    #[case("v3", Some((3, 0, 0)))]
    #[case("latest", None)]
    fn lenient_versions(#[case] raw: &str, #[case] expected: Option<(u64, u64, u64)>) {
        let parsed = parse_version(raw).map(|v| (v.major, v.minor, v.patch));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn document_round_trip_keeps_fields() {
        let text = format!("{ADDON}dir[] = public/uploads\n[addon]\nshop = 1.2.0\n");
        let d = PackageDescriptor::from_document(&doc(&text), PackageKind::Addon, Path::new("info.ini"))
            .unwrap();
        let again = PackageDescriptor::from_document(
            &IniDocument::parse(&d.to_document().to_string()).unwrap(),
            PackageKind::Addon,
            Path::new("info.ini"),
        )
        .unwrap();
        assert_eq!(d, again);
    }

    #[test]
    fn kind_parse() {
        assert_eq!(PackageKind::parse("Template").unwrap(), PackageKind::Template);
        assert!(matches!(PackageKind::parse("theme"), Err(Error::UnknownKind(_))));
    }
}
