use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::config::{default_backup_dir, BACKUP_MAX_COUNT};
use crate::error::BackupError;
use crate::executor::CommandExecutor;

const VERIFY_PREFIX_LEN: usize = 1024;
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub timestamp: SystemTime,
    pub size_bytes: u64,
    pub is_valid: bool,
}

/// Timestamped copies of the config file, newest first, at most
/// `max_count` of them.
pub struct BackupManager {
    config_path: PathBuf,
    backup_dir: PathBuf,
    max_count: usize,
    executor: Option<Rc<dyn CommandExecutor>>,
}

impl BackupManager {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();
        let backup_dir = default_backup_dir(&config_path);
        Self {
            config_path,
            backup_dir,
            max_count: BACKUP_MAX_COUNT,
            executor: None,
        }
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count.max(1);
        self
    }

    /// Restores go through `executor` instead of a plain copy, for configs
    /// the current user cannot write.
    pub fn with_executor(mut self, executor: Rc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn file_name(&self) -> String {
        self.config_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "grub".to_string())
    }

    fn prefix(&self) -> String {
        format!("{}.bak", self.file_name())
    }

    pub fn create_backup(&self) -> Result<PathBuf, BackupError> {
        if !self.config_path.exists() {
            return Err(BackupError::SourceMissing(self.config_path.clone()));
        }

        fs::create_dir_all(&self.backup_dir).map_err(|source| BackupError::Io {
            path: self.backup_dir.clone(),
            source,
        })?;

        let backup_path = self.next_backup_path(Local::now());
        fs::copy(&self.config_path, &backup_path).map_err(|source| {
            warn!("backup of {} failed: {}", self.config_path.display(), source);
            BackupError::Io {
                path: backup_path.clone(),
                source,
            }
        })?;
        info!("backup created: {}", backup_path.display());

        self.cleanup_old_backups();
        Self::verify_backup(&backup_path)?;
        Ok(backup_path)
    }

    /// `<name>.bak.<stamp>`, or `<name>.bak.<stamp>_<n>` when that second is
    /// already taken.
    fn next_backup_path(&self, now: DateTime<Local>) -> PathBuf {
        let stamp = now.format(STAMP_FORMAT).to_string();
        let dotted = format!("{}.", self.prefix());
        let taken = self
            .list_backups()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .filter_map(|n| n.strip_prefix(&dotted).map(split_stamp))
            .filter(|(s, _)| *s == stamp)
            .map(|(_, seq)| seq)
            .max();

        let base = format!("{dotted}{stamp}");
        match taken {
            None => self.backup_dir.join(base),
            Some(seq) => self.backup_dir.join(format!("{base}_{}", seq + 1)),
        }
    }

    /// Verifies the backup and copies it over the live config. `None` means
    /// the newest one.
    pub fn restore_backup(&self, backup_path: Option<&Path>) -> Result<PathBuf, BackupError> {
        let path = match backup_path {
            Some(p) => p.to_path_buf(),
            None => self.latest_backup().ok_or(BackupError::NoBackup)?,
        };
        if !path.exists() {
            return Err(BackupError::NoBackup);
        }
        Self::verify_backup(&path)?;

        match &self.executor {
            Some(exec) => exec
                .copy_file_privileged(&path, &self.config_path)
                .map_err(|e| BackupError::Restore(e.to_string()))?,
            None => {
                fs::copy(&path, &self.config_path).map_err(|e| BackupError::Restore(e.to_string()))?;
            }
        }
        info!("configuration restored from {}", path.display());
        Ok(path)
    }

    pub fn latest_backup(&self) -> Option<PathBuf> {
        self.list_backups().into_iter().next()
    }

    /// Newest first. Also picks up backups left next to the config by
    /// earlier runs as root. Never fails: unreadable directories yield
    /// nothing.
    pub fn list_backups(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.backup_dir.clone()];
        if let Some(config_dir) = self.config_path.parent() {
            if config_dir != self.backup_dir {
                dirs.push(config_dir.to_path_buf());
            }
        }

        let prefix = self.prefix();
        let dotted = format!("{prefix}.");
        let mut found: Vec<(SystemTime, String, u32, PathBuf)> = Vec::new();

        for dir in dirs {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if name != prefix && !name.starts_with(&dotted) {
                    continue;
                }
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                let tail = name.strip_prefix(&dotted).unwrap_or("");
                let (stamp, seq) = split_stamp(tail);
                found.push((mtime, stamp, seq, path));
            }
        }

        found.sort_by(|a, b| (&b.0, &b.1, b.2).cmp(&(&a.0, &a.1, a.2)));
        found.into_iter().map(|(_, _, _, path)| path).collect()
    }

    pub fn backup_infos(&self) -> Vec<BackupInfo> {
        self.list_backups()
            .into_iter()
            .filter_map(|path| {
                let metadata = fs::metadata(&path).ok()?;
                Some(BackupInfo {
                    timestamp: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    size_bytes: metadata.len(),
                    is_valid: Self::verify_backup(&path).is_ok(),
                    path,
                })
            })
            .collect()
    }

    /// Only files this manager would list can be deleted.
    pub fn delete_backup(&self, backup_path: &Path) -> Result<(), BackupError> {
        if !self.list_backups().iter().any(|p| p == backup_path) {
            return Err(BackupError::Missing(backup_path.to_path_buf()));
        }
        fs::remove_file(backup_path).map_err(|source| BackupError::Io {
            path: backup_path.to_path_buf(),
            source,
        })?;
        info!("backup deleted: {}", backup_path.display());
        Ok(())
    }

    fn cleanup_old_backups(&self) {
        for old in self.list_backups().iter().skip(self.max_count) {
            match fs::remove_file(old) {
                Ok(()) => info!("old backup removed: {}", old.display()),
                Err(e) => warn!("could not remove {}: {}", old.display(), e),
            }
        }
    }

    /// Exists, non-empty, and starts with non-blank UTF-8 text.
    pub fn verify_backup(path: &Path) -> Result<(), BackupError> {
        if !path.exists() {
            return Err(BackupError::Missing(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|_| BackupError::Unreadable(path.to_path_buf()))?;
        let len = file
            .metadata()
            .map_err(|source| BackupError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if len == 0 {
            return Err(BackupError::Empty(path.to_path_buf()));
        }

        let mut buf = Vec::with_capacity(VERIFY_PREFIX_LEN);
        file.take(VERIFY_PREFIX_LEN as u64)
            .read_to_end(&mut buf)
            .map_err(|source| BackupError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let text = match std::str::from_utf8(&buf) {
            Ok(text) => text,
            // The prefix may cut a multi-byte character in half.
            Err(e) if e.error_len().is_none() => std::str::from_utf8(&buf[..e.valid_up_to()]).unwrap_or(""),
            Err(e) => {
                return Err(BackupError::Corrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        if text.trim().is_empty() {
            return Err(BackupError::Corrupt {
                path: path.to_path_buf(),
                reason: "empty or blank content".to_string(),
            });
        }
        Ok(())
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

pub fn format_time(time: SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `20260301_120000_2` -> (`20260301_120000`, 2); no suffix is sequence 0.
fn split_stamp(tail: &str) -> (String, u32) {
    let mut parts = tail.splitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(date), Some(time), Some(seq)) => (format!("{date}_{time}"), seq.parse().unwrap_or(0)),
        _ => (tail.to_string(), 0),
    }
}
