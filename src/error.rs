//! Error types shared across the configuration engine.
//!
//! Low-level components return one of these typed errors; the apply
//! workflow turns them into `(success, message)` pairs at its boundary.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::security::SecurityError;

/// Loading, parsing or generating `/etc/default/grub` failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration key: {0:?}")]
    InvalidKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// A configuration value was rejected by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<SecurityError> for ValidationError {
    fn from(e: SecurityError) -> Self {
        Self(format!("Security error: {e}"))
    }
}

/// Creating, verifying or restoring a backup failed.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Configuration file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("No valid backup found")]
    NoBackup,

    #[error("Backup not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Backup is unreadable: {}", .0.display())]
    Unreadable(PathBuf),

    #[error("Backup is empty: {}", .0.display())]
    Empty(PathBuf),

    #[error("Backup is corrupt ({}): {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Backup I/O failed ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to restore configuration: {0}")]
    Restore(String),
}

/// A privileged command could not be run or exited unsuccessfully.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Security validation failed: {0}")]
    Security(#[from] SecurityError),

    #[error("Failed to start command: {0}")]
    Spawn(#[source] io::Error),

    #[error("Command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Command failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Theme configuration or theme file installation failed.
#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("Theme directory must be in /boot/grub/, got: {}", .0.display())]
    InvalidThemeDir(PathBuf),

    #[error("Failed to serialize theme configuration: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{context}: {source}")]
    Command {
        context: String,
        #[source]
        source: CommandError,
    },

    #[error("Theme I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Mode(String),
}

impl ThemeError {
    pub fn command(context: impl Into<String>, source: CommandError) -> Self {
        Self::Command {
            context: context.into(),
            source,
        }
    }
}

/// Orchestration-level failure in `GrubService`.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration not loaded")]
    NotLoaded,

    #[error("Another apply is already running (lock held on {})", .0.display())]
    Busy(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
