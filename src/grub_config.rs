use std::borrow::Borrow;
use std::collections::btree_map::{self, BTreeMap};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::line_processor::{GrubLineProcessor, NewEntriesAppender};
use crate::security;

/// Keys always written with `export`, so the color script sees them.
pub const KEYS_TO_EXPORT: &[&str] = &["GRUB_COLOR_NORMAL", "GRUB_COLOR_HIGHLIGHT"];

/// An uppercase shell variable name, `^[A-Z_][A-Z0-9_]*$`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigKey(String);

impl ConfigKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ConfigError> {
        let key = key.into();
        match security::validate_parameter_name(&key) {
            Ok(_) => Ok(ConfigKey(key)),
            Err(_) => Err(ConfigError::InvalidKey(key)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ConfigKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ConfigKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::new(s)
    }
}

impl TryFrom<String> for ConfigKey {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ConfigKey::new(value)
    }
}

impl From<ConfigKey> for String {
    fn from(key: ConfigKey) -> Self {
        key.0
    }
}

/// `KEY -> value` pairs from `/etc/default/grub`. Values never contain line
/// breaks; iteration is in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigEntries {
    map: BTreeMap<ConfigKey, String>,
}

impl ConfigEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut entries = ConfigEntries::new();
        for (key, value) in pairs {
            entries.set(key, value)?;
        }
        Ok(entries)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn insert(&mut self, key: ConfigKey, value: impl Into<String>) -> Result<Option<String>, ConfigError> {
        let value = value.into();
        if value.contains(['\n', '\r']) {
            return Err(ConfigError::InvalidValue {
                key: key.0,
                reason: "values cannot contain line breaks".to_string(),
            });
        }
        Ok(self.map.insert(key, value))
    }

    /// Parses `key` and inserts.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Option<String>, ConfigError> {
        self.insert(ConfigKey::new(key)?, value)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ConfigKey, String> {
        self.map.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ConfigKey> {
        self.map.keys()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<'a> IntoIterator for &'a ConfigEntries {
    type Item = (&'a ConfigKey, &'a String);
    type IntoIter = btree_map::Iter<'a, ConfigKey, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

/// Reads `/etc/default/grub` into entries plus the raw lines used as a
/// merge template.
#[derive(Debug, Clone)]
pub struct GrubConfigLoader {
    config_path: PathBuf,
}

impl GrubConfigLoader {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> Result<(ConfigEntries, Vec<String>), ConfigError> {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }

        let content = fs::read_to_string(&self.config_path).map_err(|source| ConfigError::Read {
            path: self.config_path.clone(),
            source,
        })?;

        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let entries = parse_entries(&lines);
        info!(
            path = %self.config_path.display(),
            entries_count = entries.len(),
            "configuration loaded"
        );
        Ok((entries, lines))
    }

    pub fn reload(&self) -> Result<(ConfigEntries, Vec<String>), ConfigError> {
        self.load()
    }
}

/// `KEY=value` and `export KEY=value` lines become entries. Quotes are
/// trimmed from each end independently, so `"a'` reads as `a`.
pub fn parse_entries<L: AsRef<str>>(lines: &[L]) -> ConfigEntries {
    let mut entries = ConfigEntries::new();

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let mut key = key.trim();
        if let Some(rest) = key.strip_prefix("export ") {
            key = rest.trim();
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');

        if let Err(e) = entries.set(key, value) {
            debug!("skipping line: {}", e);
        }
    }

    entries
}

/// Merges entries into the original lines: matched lines are replaced in
/// place, unmatched entries are appended, everything else is kept verbatim.
#[derive(Debug, Clone)]
pub struct GrubConfigGenerator {
    keys_to_export: BTreeSet<String>,
}

impl Default for GrubConfigGenerator {
    fn default() -> Self {
        Self {
            keys_to_export: KEYS_TO_EXPORT.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl GrubConfigGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `hidden_keys` are config variable names written `#`-prefixed.
    pub fn generate<L: AsRef<str>>(
        &self,
        entries: &ConfigEntries,
        original_lines: &[L],
        hidden_keys: Option<&BTreeSet<String>>,
    ) -> String {
        let no_hidden = BTreeSet::new();
        let hidden = hidden_keys.unwrap_or(&no_hidden);

        let processor = GrubLineProcessor::new(&self.keys_to_export, hidden);
        let mut lines: Vec<String> = original_lines
            .iter()
            .filter_map(|line| processor.process_line(line.as_ref(), entries))
            .collect();
        let removed = original_lines.len() - lines.len();

        let appender = NewEntriesAppender::new(&self.keys_to_export, hidden);
        let added = appender.find_new_entries(entries, original_lines);
        let added_count = added.len();
        lines.extend(added);

        debug!(
            entries = entries.len(),
            lines = lines.len(),
            removed,
            added = added_count,
            "configuration generated"
        );

        let mut content = lines.join("\n");
        content.push('\n');
        content
    }
}
