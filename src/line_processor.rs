//! Line-level helpers behind the `/etc/default/grub` generator.
//!
//! Only three line shapes are understood: blank, `#comment`, and
//! `[#][export ]KEY=value`. Everything else passes through untouched.

use std::collections::BTreeSet;

use crate::grub_config::ConfigEntries;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub clean_key: String,
    pub is_exported: bool,
    pub is_commented: bool,
}

pub struct KeyNormalizer;

impl KeyNormalizer {
    /// Strips a leading `#` run, then a leading `export `, from the text left
    /// of the first `=`.
    pub fn normalize(key_part: &str) -> ParsedKey {
        let mut clean_key = key_part.trim();
        let mut is_commented = false;
        let mut is_exported = false;

        if clean_key.starts_with('#') {
            clean_key = clean_key.trim_start_matches('#').trim();
            is_commented = true;
        }

        if let Some(rest) = clean_key.strip_prefix("export ") {
            clean_key = rest.trim();
            is_exported = true;
        }

        ParsedKey {
            clean_key: clean_key.to_string(),
            is_exported,
            is_commented,
        }
    }
}

pub struct LineClassifier;

impl LineClassifier {
    pub fn is_empty(line: &str) -> bool {
        line.trim().is_empty()
    }

    /// A `#` line with no `=` in it.
    pub fn is_pure_comment(line: &str) -> bool {
        let stripped = line.trim();
        stripped.starts_with('#') && !stripped.contains('=')
    }

    pub fn has_key_value(line: &str) -> bool {
        line.trim().contains('=')
    }

    pub fn extract_key_part(line: &str) -> &str {
        match line.trim().split_once('=') {
            Some((key, _)) => key.trim(),
            None => "",
        }
    }
}

/// Renders `[#][export ]KEY="value"`.
pub struct ConfigLineBuilder<'a> {
    keys_to_export: &'a BTreeSet<String>,
}

impl<'a> ConfigLineBuilder<'a> {
    pub fn new(keys_to_export: &'a BTreeSet<String>) -> Self {
        Self { keys_to_export }
    }

    pub fn build_line(&self, key: &str, value: &str, was_exported: bool, is_hidden: bool) -> String {
        let should_export = was_exported || self.keys_to_export.contains(key);
        let prefix = if should_export { "export " } else { "" };
        let line = format!("{prefix}{key}=\"{value}\"");
        if is_hidden {
            format!("#{line}")
        } else {
            line
        }
    }
}

pub struct GrubLineProcessor<'a> {
    builder: ConfigLineBuilder<'a>,
    hidden_keys: &'a BTreeSet<String>,
}

impl<'a> GrubLineProcessor<'a> {
    pub fn new(keys_to_export: &'a BTreeSet<String>, hidden_keys: &'a BTreeSet<String>) -> Self {
        Self {
            builder: ConfigLineBuilder::new(keys_to_export),
            hidden_keys,
        }
    }

    /// Returns the line to emit, or `None` when the line is dropped because
    /// its key now has an empty value.
    pub fn process_line(&self, line: &str, entries: &ConfigEntries) -> Option<String> {
        if LineClassifier::is_empty(line) || LineClassifier::is_pure_comment(line) {
            return Some(line.trim_end().to_string());
        }

        if LineClassifier::has_key_value(line) {
            let parsed = KeyNormalizer::normalize(LineClassifier::extract_key_part(line));
            if let Some(value) = entries.get(&parsed.clean_key) {
                if value.is_empty() {
                    tracing::debug!(key = %parsed.clean_key, "dropping line for empty value");
                    return None;
                }
                let is_hidden = self.hidden_keys.contains(&parsed.clean_key);
                return Some(self.builder.build_line(
                    &parsed.clean_key,
                    value,
                    parsed.is_exported,
                    is_hidden,
                ));
            }
        }

        Some(line.trim_end().to_string())
    }
}

/// Builds lines for entries no original line mentions.
pub struct NewEntriesAppender<'a> {
    builder: ConfigLineBuilder<'a>,
    hidden_keys: &'a BTreeSet<String>,
}

impl<'a> NewEntriesAppender<'a> {
    pub fn new(keys_to_export: &'a BTreeSet<String>, hidden_keys: &'a BTreeSet<String>) -> Self {
        Self {
            builder: ConfigLineBuilder::new(keys_to_export),
            hidden_keys,
        }
    }

    pub fn find_new_entries<L: AsRef<str>>(&self, entries: &ConfigEntries, original_lines: &[L]) -> Vec<String> {
        let existing = Self::existing_keys(original_lines);
        entries
            .iter()
            .filter(|(key, value)| !value.is_empty() && !existing.contains(key.as_str()))
            .map(|(key, value)| {
                let is_hidden = self.hidden_keys.contains(key.as_str());
                self.builder.build_line(key.as_str(), value, false, is_hidden)
            })
            .collect()
    }

    /// Keys mentioned anywhere in the file, commented or exported or not.
    fn existing_keys<L: AsRef<str>>(lines: &[L]) -> BTreeSet<String> {
        lines
            .iter()
            .map(AsRef::as_ref)
            .filter(|line| LineClassifier::has_key_value(line))
            .map(|line| KeyNormalizer::normalize(LineClassifier::extract_key_part(line)).clean_key)
            .collect()
    }
}
