//! Input checks applied before anything reaches a privileged shell script
//! or the filesystem.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub const MAX_LINE_LENGTH: usize = 4096;
pub const MAX_PARAM_NAME_LENGTH: usize = 256;

const ALLOWED_PATH_PREFIXES: &[&str] = &["/etc/", "/boot/", "/tmp/", "/var/", "/usr/share/", "/home/"];

static PARAM_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").unwrap());
static KERNEL_META_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[|<>$`]").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SecurityError(String);

impl SecurityError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Rejects over-long lines and embedded line breaks or NUL bytes.
pub fn validate_line(value: &str) -> Result<&str, SecurityError> {
    if value.len() > MAX_LINE_LENGTH {
        return Err(SecurityError::new(format!("Line too long (max {MAX_LINE_LENGTH})")));
    }
    if value.contains(['\r', '\n', '\0']) {
        return Err(SecurityError::new("Newlines not allowed in values"));
    }
    Ok(value.trim())
}

pub fn validate_parameter_name(name: &str) -> Result<&str, SecurityError> {
    if name.is_empty() {
        return Err(SecurityError::new("Parameter name cannot be empty"));
    }
    if name.len() > MAX_PARAM_NAME_LENGTH {
        return Err(SecurityError::new("Parameter name too long"));
    }
    if !PARAM_NAME_RE.is_match(name) {
        return Err(SecurityError::new("Invalid parameter name format"));
    }
    Ok(name)
}

pub fn validate_kernel_params(params: &str) -> Result<&str, SecurityError> {
    let value = validate_line(params)?;
    if KERNEL_META_RE.is_match(value) {
        return Err(SecurityError::new(
            "Shell metacharacters not allowed in kernel parameters",
        ));
    }
    Ok(value)
}

/// Blocks directory traversal and paths outside the directories GRUB
/// resources are expected to live in.
pub fn validate_file_path(path: &str) -> Result<&str, SecurityError> {
    if path.is_empty() {
        return Err(SecurityError::new("Path cannot be empty"));
    }
    if path.contains("..") {
        return Err(SecurityError::new("Directory traversal not allowed"));
    }
    if path.starts_with('~') {
        return Err(SecurityError::new("Tilde expansion not allowed"));
    }
    if !ALLOWED_PATH_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return Err(SecurityError::new(format!("Path {path} not in allowed directories")));
    }
    Ok(path)
}

/// Wraps `value` in single quotes for `/bin/sh`, escaping embedded quotes.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
