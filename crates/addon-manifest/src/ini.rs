//! Typed `info.ini` scanner and writer.
//!
//! The grammar is the classic PHP-style INI dialect that package authors
//! already write:
//!
//! ```ini
//! ; comment
//! name = demo
//! title = "Demo Addon"
//! status = 1
//! database = demo_log, demo_item
//! dir[] = public/uploads
//!
//! [addon]
//! shop = 1.2.0
//! ```
//!
//! Unquoted values are typed: decimal integers become [`IniValue::Int`],
//! `true/on/yes` and `false/off/no/none` become booleans, `null` becomes
//! [`IniValue::Null`]. Anything else, including decimals such as `1.0`, stays
//! a string so version numbers keep their text.

use std::fmt;

/// A single scanned value.
#[derive(Debug, Clone, PartialEq)]
pub enum IniValue {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<IniValue>),
    Table(IniTable),
}

impl IniValue {
    /// Render a scalar as text. Lists and tables yield `None`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => Some(String::new()),
            Self::Bool(b) => Some(if *b { "1".into() } else { String::new() }),
            Self::Int(i) => Some(i.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::List(_) | Self::Table(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&IniTable> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Flatten a value into a list of strings.
    ///
    /// Accepts a comma-separated scalar, a `key[]` list or a table (values
    /// are taken). Empty items are dropped.
    pub fn to_string_list(&self) -> Vec<String> {
        let items: Vec<String> = match self {
            Self::List(items) => items.iter().filter_map(IniValue::as_text).collect(),
            Self::Table(table) => table.values().filter_map(IniValue::as_text).collect(),
            scalar => scalar
                .as_text()
                .map(|s| s.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn is_empty_container(&self) -> bool {
        match self {
            Self::List(items) => items.is_empty(),
            Self::Table(table) => table.is_empty(),
            _ => false,
        }
    }
}

/// An insertion-ordered key/value table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniTable {
    entries: Vec<(String, IniValue)>,
}

impl IniTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&IniValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut IniValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a value, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: IniValue) {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<IniValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IniValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &IniValue> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push_list(&mut self, key: &str, value: IniValue) {
        match self.get_mut(key) {
            Some(IniValue::List(items)) => items.push(value),
            _ => self.insert(key, IniValue::List(vec![value])),
        }
    }

    fn set_sub(&mut self, key: &str, sub: &str, value: IniValue) {
        match self.get_mut(key) {
            Some(IniValue::Table(table)) => table.insert(sub, value),
            _ => {
                let mut table = IniTable::new();
                table.insert(sub, value);
                self.insert(key, IniValue::Table(table));
            }
        }
    }
}

/// Error raised when a line cannot be scanned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct IniError {
    pub line: usize,
    pub message: String,
}

/// A scanned `info.ini` document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniDocument {
    root: IniTable,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan INI text into a typed document.
    pub fn parse(input: &str) -> Result<Self, IniError> {
        let mut root = IniTable::new();
        let mut section: Option<String> = None;

        for (idx, raw) in input.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| IniError {
                        line: line_no,
                        message: format!("malformed section header '{line}'"),
                    })?;
                if !matches!(root.get(name), Some(IniValue::Table(_))) {
                    root.insert(name, IniValue::Table(IniTable::new()));
                }
                section = Some(name.to_string());
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| IniError {
                line: line_no,
                message: format!("expected 'key = value', found '{line}'"),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(IniError {
                    line: line_no,
                    message: "empty key".into(),
                });
            }
            let value = scan_value(value.trim()).map_err(|message| IniError {
                line: line_no,
                message,
            })?;

            match section.as_deref() {
                Some(name) => {
                    if let Some(IniValue::Table(table)) = root.get_mut(name) {
                        assign(table, key, value);
                    } else {
                        assign(&mut root, key, value);
                    }
                }
                None => assign(&mut root, key, value),
            }
        }

        Ok(Self { root })
    }

    pub fn get(&self, key: &str) -> Option<&IniValue> {
        self.root.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: IniValue) {
        self.root.insert(key, value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.root.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn table(&self) -> &IniTable {
        &self.root
    }

    pub fn into_table(self) -> IniTable {
        self.root
    }
}

impl From<IniTable> for IniDocument {
    fn from(root: IniTable) -> Self {
        Self { root }
    }
}

fn assign(table: &mut IniTable, key: &str, value: IniValue) {
    if let Some(base) = key.strip_suffix("[]") {
        table.push_list(base.trim(), value);
        return;
    }
    if let Some(open) = key.find('[') {
        if let Some(sub) = key[open + 1..].strip_suffix(']') {
            table.set_sub(key[..open].trim(), sub.trim(), value);
            return;
        }
    }
    table.insert(key, value);
}

fn scan_value(raw: &str) -> Result<IniValue, String> {
    for quote in ['"', '\''] {
        if let Some(rest) = raw.strip_prefix(quote) {
            let end = rest
                .find(quote)
                .ok_or_else(|| format!("unterminated quoted value {raw}"))?;
            let trailing = rest[end + 1..].trim();
            if !trailing.is_empty() && !trailing.starts_with(';') {
                return Err(format!("unexpected text after quoted value: {trailing}"));
            }
            return Ok(IniValue::String(rest[..end].to_string()));
        }
    }

    let bare = match raw.find(';') {
        Some(idx) => raw[..idx].trim_end(),
        None => raw,
    };

    let typed = match bare.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" => IniValue::Bool(true),
        "false" | "off" | "no" | "none" => IniValue::Bool(false),
        "null" => IniValue::Null,
        _ if is_decimal_integer(bare) => bare
            .parse()
            .map(IniValue::Int)
            .unwrap_or_else(|_| IniValue::String(bare.to_string())),
        _ => IniValue::String(bare.to_string()),
    };
    Ok(typed)
}

fn is_decimal_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Writes scalars as `key = value` lines first, then every non-empty table
/// as a `[key]` section. Empty containers are skipped.
impl fmt::Display for IniDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.root.iter() {
            if !matches!(value, IniValue::Table(_)) {
                write_entry(f, key, value)?;
            }
        }
        for (key, value) in self.root.iter() {
            if let IniValue::Table(table) = value {
                if table.is_empty() {
                    continue;
                }
                writeln!(f, "[{key}]")?;
                for (k, v) in table.iter() {
                    write_entry(f, k, v)?;
                }
            }
        }
        Ok(())
    }
}

fn write_entry(f: &mut fmt::Formatter<'_>, key: &str, value: &IniValue) -> fmt::Result {
    if value.is_empty_container() {
        return Ok(());
    }
    match value {
        IniValue::List(items) => {
            for item in items {
                writeln!(f, "{key}[] = {}", render_scalar(item))?;
            }
        }
        IniValue::Table(table) => {
            for (sub, item) in table.iter() {
                writeln!(f, "{key}[{sub}] = {}", render_scalar(item))?;
            }
        }
        scalar => writeln!(f, "{key} = {}", render_scalar(scalar))?,
    }
    Ok(())
}

fn render_scalar(value: &IniValue) -> String {
    match value {
        IniValue::Null => "null".into(),
        IniValue::Bool(b) => b.to_string(),
        IniValue::Int(i) => i.to_string(),
        IniValue::String(s) => format!("\"{s}\""),
        IniValue::List(_) | IniValue::Table(_) => "\"\"".into(),
    }
}
