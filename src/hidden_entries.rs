use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::CommandError;
use crate::executor::CommandExecutor;
use crate::security::shell_quote;

/// Menu titles removed from grub.cfg after every regeneration.
pub type HiddenEntries = BTreeSet<String>;

const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HiddenEntriesFile {
    hidden_entries: Vec<String>,
    #[serde(default = "default_version")]
    version: String,
}

fn default_version() -> String {
    FORMAT_VERSION.to_string()
}

/// JSON list of hidden titles plus a kernel post-install hook that
/// re-applies them when a kernel upgrade regenerates grub.cfg.
#[derive(Debug, Clone)]
pub struct HiddenEntriesStore {
    config_path: PathBuf,
    hook_path: PathBuf,
}

impl HiddenEntriesStore {
    pub fn new(config_path: impl Into<PathBuf>, hook_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            hook_path: hook_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn hook_path(&self) -> &Path {
        &self.hook_path
    }

    /// Missing or malformed files read as an empty set.
    pub fn load(&self) -> HiddenEntries {
        if !self.config_path.exists() {
            debug!("no hidden entries file at {}", self.config_path.display());
            return HiddenEntries::new();
        }
        let parsed = fs::read_to_string(&self.config_path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str::<HiddenEntriesFile>(&content).map_err(|e| e.to_string()));
        match parsed {
            Ok(file) => {
                info!("loaded {} hidden entries", file.hidden_entries.len());
                file.hidden_entries.into_iter().collect()
            }
            Err(e) => {
                error!("could not load hidden entries: {}", e);
                HiddenEntries::new()
            }
        }
    }

    /// Writes the title list and (re)installs the hook.
    pub fn save(&self, hidden: &HiddenEntries, executor: &dyn CommandExecutor) -> Result<(), CommandError> {
        let file = HiddenEntriesFile {
            hidden_entries: hidden.iter().cloned().collect(),
            version: default_version(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(io::Error::from)?;
        executor.write_file_privileged(&self.config_path, &json)?;

        let exe = std::env::current_exe()?;
        executor.write_file_privileged(&self.hook_path, &Self::hook_script(&exe))?;
        executor.make_executable(&self.hook_path)?;

        info!("saved {} hidden entries", hidden.len());
        Ok(())
    }

    pub fn clear(&self, executor: &dyn CommandExecutor) -> Result<(), CommandError> {
        self.save(&HiddenEntries::new(), executor)
    }

    pub fn remove_config_files(&self, executor: &dyn CommandExecutor) -> Result<(), CommandError> {
        if self.config_path.exists() {
            executor.remove_file_privileged(&self.config_path)?;
        }
        executor.remove_file_privileged(&self.hook_path)?;
        info!("hidden entries store and hook removed");
        Ok(())
    }

    /// Runs `<exe> apply-hidden`; exits quietly if the binary is gone.
    pub fn hook_script(exe: &Path) -> String {
        let exe = shell_quote(&exe.to_string_lossy());
        format!("#!/bin/sh\n[ -x {exe} ] || exit 0\nexec {exe} apply-hidden\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LocalFs;

    impl CommandExecutor for LocalFs {
        fn execute(&self, _commands: &[String]) -> Result<(), CommandError> {
            Ok(())
        }

        fn copy_file_privileged(&self, src: &Path, dst: &Path) -> Result<(), CommandError> {
            fs::copy(src, dst)?;
            Ok(())
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = HiddenEntriesStore::new(dir.path().join("hidden.json"), dir.path().join("hook"));
        let hidden: HiddenEntries = ["UEFI Firmware Settings".to_string(), "Memtest86+".to_string()].into();

        store.save(&hidden, &LocalFs).unwrap();
        assert_eq!(store.load(), hidden);

        let json = fs::read_to_string(store.config_path()).unwrap();
        assert!(json.contains("\"version\": \"1.0\""));
        let hook = fs::read_to_string(store.hook_path()).unwrap();
        assert!(hook.starts_with("#!/bin/sh\n"));
        assert!(hook.trim_end().ends_with("apply-hidden"));
    }

    #[test]
    fn load_tolerates_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let store = HiddenEntriesStore::new(dir.path().join("hidden.json"), dir.path().join("hook"));
        assert!(store.load().is_empty());

        fs::write(store.config_path(), "{not json").unwrap();
        assert!(store.load().is_empty());

        fs::write(store.config_path(), r#"{"hidden_entries": ["Windows"]}"#).unwrap();
        assert_eq!(store.load(), HiddenEntries::from(["Windows".to_string()]));
    }

    #[test]
    fn hook_quotes_executable_path() {
        let script = HiddenEntriesStore::hook_script(Path::new("/usr/local/bin/grub conf"));
        assert!(script.contains("exec '/usr/local/bin/grub conf' apply-hidden"));
    }
}
