//! On-disk `IdsLock` text format (section 4.4.4 / 6.3).
//!
//! ```text
//! version = 1
//! services.<escaped name> = <id>
//! methods.<escaped Service.Method> = <id>
//! messages.<escaped name> = <id>
//! tombstones.services = csv-of-ints
//! tombstones.messages = csv-of-ints
//! tombstones.methods.<escaped Service> = csv-of-ints
//! aliases.services.<escaped old> = <new>
//! aliases.messages.<escaped old> = <new>
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::Path;

use crate::IdError;

/// The complete, persistent ID assignment state for a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdsLock {
    pub version: u32,
    pub services: HashMap<String, u16>,
    pub methods: HashMap<String, u16>,
    pub messages: HashMap<String, u16>,
    pub tombstones_services: BTreeSet<u16>,
    pub tombstones_messages: BTreeSet<u16>,
    pub tombstones_methods: HashMap<String, BTreeSet<u16>>,
    pub alias_services: HashMap<String, String>,
    pub alias_messages: HashMap<String, String>,
}

impl IdsLock {
    /// An empty lock at `version = 1`, equivalent to an absent file.
    pub fn empty() -> Self {
        IdsLock {
            version: 1,
            ..Default::default()
        }
    }
}

/// Percent-escape `%` and `.` so names can be used as dotted-path keys.
/// `%` is escaped first so the `%` introduced by escaping `.` is never
/// itself re-escaped.
pub fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '.' => out.push_str("%2E"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape`].
pub fn unescape(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = String::with_capacity(escaped.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            match &escaped[i + 1..i + 3] {
                "25" => {
                    out.push('%');
                    i += 3;
                    continue;
                }
                "2E" => {
                    out.push('.');
                    i += 3;
                    continue;
                }
                _ => {}
            }
        }
        let ch = escaped[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn parse_csv(value: &str) -> BTreeSet<u16> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u16>().ok())
        .collect()
}

fn render_csv(ids: &BTreeSet<u16>) -> String {
    ids.iter().map(u16::to_string).collect::<Vec<_>>().join(",")
}

/// Parse the on-disk lockfile text.
pub fn parse(text: &str) -> Result<IdsLock, IdError> {
    let mut lock = IdsLock::empty();
    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(IdError::Io(format!(
                "lockfile line {}: missing `=`: {raw_line:?}",
                lineno + 1
            )));
        };
        let key = key.trim();
        let value = value.trim();

        if key == "version" {
            lock.version = value
                .parse()
                .map_err(|_| IdError::Io(format!("lockfile line {}: bad version", lineno + 1)))?;
        } else if let Some(rest) = key.strip_prefix("services.") {
            let id = value
                .parse()
                .map_err(|_| IdError::Io(format!("lockfile line {}: bad service id", lineno + 1)))?;
            lock.services.insert(unescape(rest), id);
        } else if let Some(rest) = key.strip_prefix("methods.") {
            let id = value
                .parse()
                .map_err(|_| IdError::Io(format!("lockfile line {}: bad method id", lineno + 1)))?;
            lock.methods.insert(unescape(rest), id);
        } else if let Some(rest) = key.strip_prefix("messages.") {
            let id = value
                .parse()
                .map_err(|_| IdError::Io(format!("lockfile line {}: bad message id", lineno + 1)))?;
            lock.messages.insert(unescape(rest), id);
        } else if key == "tombstones.services" {
            lock.tombstones_services = parse_csv(value);
        } else if key == "tombstones.messages" {
            lock.tombstones_messages = parse_csv(value);
        } else if let Some(rest) = key.strip_prefix("tombstones.methods.") {
            lock.tombstones_methods.insert(unescape(rest), parse_csv(value));
        } else if let Some(rest) = key.strip_prefix("aliases.services.") {
            lock.alias_services.insert(unescape(rest), value.to_string());
        } else if let Some(rest) = key.strip_prefix("aliases.messages.") {
            lock.alias_messages.insert(unescape(rest), value.to_string());
        } else {
            return Err(IdError::Io(format!(
                "lockfile line {}: unrecognized key `{key}`",
                lineno + 1
            )));
        }
    }
    Ok(lock)
}

/// Render an `IdsLock` to its on-disk text form. Map entries are sorted by
/// key and tombstone sets are ascending, so re-serializing unchanged state
/// produces a byte-identical, diff-stable file.
pub fn render(lock: &IdsLock) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "version = {}", lock.version);

    let sorted = |map: &HashMap<String, u16>| -> BTreeMap<&str, u16> {
        map.iter().map(|(k, &v)| (k.as_str(), v)).collect()
    };

    for (name, id) in sorted(&lock.services) {
        let _ = writeln!(out, "services.{} = {id}", escape(name));
    }
    for (name, id) in sorted(&lock.methods) {
        let _ = writeln!(out, "methods.{} = {id}", escape(name));
    }
    for (name, id) in sorted(&lock.messages) {
        let _ = writeln!(out, "messages.{} = {id}", escape(name));
    }
    if !lock.tombstones_services.is_empty() {
        let _ = writeln!(out, "tombstones.services = {}", render_csv(&lock.tombstones_services));
    }
    if !lock.tombstones_messages.is_empty() {
        let _ = writeln!(out, "tombstones.messages = {}", render_csv(&lock.tombstones_messages));
    }
    let sorted_tombstone_services: BTreeMap<&str, &BTreeSet<u16>> = lock
        .tombstones_methods
        .iter()
        .map(|(k, v)| (k.as_str(), v))
        .collect();
    for (service, ids) in sorted_tombstone_services {
        if !ids.is_empty() {
            let _ = writeln!(out, "tombstones.methods.{} = {}", escape(service), render_csv(ids));
        }
    }
    let sorted_alias = |map: &HashMap<String, String>| -> BTreeMap<&str, &str> {
        map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    };
    for (old, new) in sorted_alias(&lock.alias_services) {
        let _ = writeln!(out, "aliases.services.{} = {new}", escape(old));
    }
    for (old, new) in sorted_alias(&lock.alias_messages) {
        let _ = writeln!(out, "aliases.messages.{} = {new}", escape(old));
    }
    out
}

/// Load a lock from `path`. An absent file is equivalent to an empty lock.
pub fn load(path: &Path) -> Result<IdsLock, IdError> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IdsLock::empty()),
        Err(e) => Err(IdError::Io(format!("reading lockfile {}: {e}", path.display()))),
    }
}

/// Persist `lock` to `path`.
pub fn save(lock: &IdsLock, path: &Path) -> Result<(), IdError> {
    std::fs::write(path, render(lock))
        .map_err(|e| IdError::Io(format!("writing lockfile {}: {e}", path.display())))
}
