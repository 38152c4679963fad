//! Sequencing and rollback for the apply workflow.
//!
//! The manager owns no I/O of its own beyond backups: every side effect is
//! a collaborator passed in through [`SaveCollaborators`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::backup_manager::BackupManager;
use crate::grub_config::{ConfigEntries, GrubConfigGenerator};
use crate::grub_validate::GrubValidator;
use crate::hidden_entries::HiddenEntries;

/// Outcome of a single collaborator step; the error is shown to the user.
pub type StepResult = Result<(), String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStep {
    PrepareResources,
    Validate,
    Backup,
    Write,
    UpdateGrub,
    ApplyHidden,
}

impl SaveStep {
    pub const FIRST: SaveStep = SaveStep::PrepareResources;

    /// `None` after the last step.
    pub fn next(self) -> Option<SaveStep> {
        match self {
            SaveStep::PrepareResources => Some(SaveStep::Validate),
            SaveStep::Validate => Some(SaveStep::Backup),
            SaveStep::Backup => Some(SaveStep::Write),
            SaveStep::Write => Some(SaveStep::UpdateGrub),
            SaveStep::UpdateGrub => Some(SaveStep::ApplyHidden),
            SaveStep::ApplyHidden => None,
        }
    }

    /// Steps after which the live system may differ from the backup.
    pub fn has_rollback_target(self) -> bool {
        matches!(self, SaveStep::Write | SaveStep::UpdateGrub | SaveStep::ApplyHidden)
    }
}

impl fmt::Display for SaveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveStep::PrepareResources => "prepare resources",
            SaveStep::Validate => "validate",
            SaveStep::Backup => "backup",
            SaveStep::Write => "write",
            SaveStep::UpdateGrub => "update-grub",
            SaveStep::ApplyHidden => "apply hidden entries",
        };
        f.write_str(name)
    }
}

/// Copies backgrounds, installs helper scripts. May rewrite entries.
pub trait ResourcePreparer {
    fn prepare_resources(&self, entries: &mut ConfigEntries) -> StepResult;
}

pub trait ConfigWriter {
    fn write_config(&self, content: &str) -> StepResult;
}

pub trait GrubUpdater {
    fn update_grub(&self) -> StepResult;
}

pub trait HiddenEntryApplier {
    fn apply_hidden(&self, hidden: &HiddenEntries) -> StepResult;
}

pub struct SaveCollaborators<'a> {
    pub resources: &'a dyn ResourcePreparer,
    pub writer: &'a dyn ConfigWriter,
    pub updater: &'a dyn GrubUpdater,
    pub hidden: &'a dyn HiddenEntryApplier,
}

pub struct SaveRequest<'a> {
    pub entries: &'a mut ConfigEntries,
    pub original_lines: &'a [String],
    pub hidden_keys: &'a BTreeSet<String>,
    pub hidden_entries: &'a HiddenEntries,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveResult {
    pub success: bool,
    pub error_message: String,
    pub failed_step: Option<SaveStep>,
    pub rolled_back: bool,
}

impl SaveResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_message: String::new(),
            failed_step: None,
            rolled_back: false,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            failed_step: None,
            rolled_back: false,
        }
    }

    pub fn as_tuple(&self) -> (bool, String) {
        (self.success, self.error_message.clone())
    }
}

pub struct SaveManager {
    backup_manager: BackupManager,
    generator: GrubConfigGenerator,
    backup_path: Option<PathBuf>,
}

impl SaveManager {
    pub fn new(backup_manager: BackupManager, generator: GrubConfigGenerator) -> Self {
        Self {
            backup_manager,
            generator,
            backup_path: None,
        }
    }

    pub fn backup_manager(&self) -> &BackupManager {
        &self.backup_manager
    }

    pub fn generator(&self) -> &GrubConfigGenerator {
        &self.generator
    }

    /// Backup taken by the last run, if it got that far.
    pub fn last_backup(&self) -> Option<&Path> {
        self.backup_path.as_deref()
    }

    /// Runs every step in order. A failure stops the run; failures at or
    /// after the write step first restore the backup taken earlier.
    pub fn execute_save(&mut self, mut request: SaveRequest<'_>, steps: &SaveCollaborators<'_>) -> SaveResult {
        self.backup_path = None;
        let mut step = Some(SaveStep::FIRST);

        while let Some(current) = step {
            debug!("save step: {}", current);
            if let Err(message) = self.run_step(current, &mut request, steps) {
                error!("save step '{}' failed: {}", current, message);
                let rolled_back = current.has_rollback_target() && self.rollback();
                return SaveResult {
                    success: false,
                    error_message: message,
                    failed_step: Some(current),
                    rolled_back,
                };
            }
            step = current.next();
        }

        info!("configuration saved and applied");
        SaveResult::ok()
    }

    fn run_step(&mut self, step: SaveStep, request: &mut SaveRequest<'_>, steps: &SaveCollaborators<'_>) -> StepResult {
        match step {
            SaveStep::PrepareResources => steps.resources.prepare_resources(request.entries),
            SaveStep::Validate => GrubValidator::validate_all(request.entries).map_err(|e| e.to_string()),
            SaveStep::Backup => {
                let path = self
                    .backup_manager
                    .create_backup()
                    .map_err(|e| format!("Backup failed: {e}"))?;
                self.backup_path = Some(path);
                Ok(())
            }
            SaveStep::Write => {
                let content = self
                    .generator
                    .generate(request.entries, request.original_lines, Some(request.hidden_keys));
                debug!("generated {} bytes", content.len());
                steps.writer.write_config(&content)
            }
            SaveStep::UpdateGrub => steps.updater.update_grub(),
            SaveStep::ApplyHidden => steps.hidden.apply_hidden(request.hidden_entries),
        }
    }

    /// Best effort: a failed restore is logged and reported as `false`.
    fn rollback(&self) -> bool {
        let Some(path) = &self.backup_path else {
            warn!("no backup to roll back to");
            return false;
        };
        match self.backup_manager.restore_backup(Some(path)) {
            Ok(_) => {
                info!("rollback restored {}", path.display());
                true
            }
            Err(e) => {
                warn!("rollback failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    #[derive(Default)]
    struct Steps {
        log: RefCell<Vec<&'static str>>,
        fail_at: Option<&'static str>,
        target: Option<PathBuf>,
        wipe_before_write: Option<PathBuf>,
    }

    impl Steps {
        fn record(&self, name: &'static str) -> StepResult {
            self.log.borrow_mut().push(name);
            if self.fail_at == Some(name) {
                Err(format!("{name} broke"))
            } else {
                Ok(())
            }
        }
    }

    impl ResourcePreparer for Steps {
        fn prepare_resources(&self, _entries: &mut ConfigEntries) -> StepResult {
            self.record("prepare")
        }
    }

    impl ConfigWriter for Steps {
        fn write_config(&self, content: &str) -> StepResult {
            if let Some(dir) = &self.wipe_before_write {
                fs::remove_dir_all(dir).map_err(|e| e.to_string())?;
            }
            if let Some(target) = &self.target {
                fs::write(target, content).map_err(|e| e.to_string())?;
            }
            self.record("write")
        }
    }

    impl GrubUpdater for Steps {
        fn update_grub(&self) -> StepResult {
            self.record("update")
        }
    }

    impl HiddenEntryApplier for Steps {
        fn apply_hidden(&self, _hidden: &HiddenEntries) -> StepResult {
            self.record("hidden")
        }
    }

    fn run(manager: &mut SaveManager, entries: &mut ConfigEntries, lines: &[String], steps: &Steps) -> SaveResult {
        let hidden_keys = BTreeSet::new();
        let hidden_entries = HiddenEntries::new();
        manager.execute_save(
            SaveRequest {
                entries,
                original_lines: lines,
                hidden_keys: &hidden_keys,
                hidden_entries: &hidden_entries,
            },
            &SaveCollaborators {
                resources: steps,
                writer: steps,
                updater: steps,
                hidden: steps,
            },
        )
    }

    fn setup() -> (tempfile::TempDir, SaveManager, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("grub");
        fs::write(&config, "GRUB_TIMEOUT=5\n").unwrap();
        let backups = BackupManager::new(&config).with_backup_dir(dir.path().join("backups"));
        (dir, SaveManager::new(backups, GrubConfigGenerator::new()), config)
    }

    #[test]
    fn step_sequence_and_rollback_targets() {
        let mut order = vec![SaveStep::FIRST];
        while let Some(next) = order.last().unwrap().next() {
            order.push(next);
        }
        assert_eq!(order.len(), 6);
        let rollback: Vec<bool> = order.iter().map(|s| s.has_rollback_target()).collect();
        assert_eq!(rollback, vec![false, false, false, true, true, true]);
    }

    #[test]
    fn success_runs_every_step() {
        let (_dir, mut manager, config) = setup();
        let mut entries = ConfigEntries::from_pairs([("GRUB_TIMEOUT", "10")]).unwrap();
        let lines = vec!["GRUB_TIMEOUT=5".to_string()];
        let steps = Steps {
            target: Some(config.clone()),
            ..Default::default()
        };

        let result = run(&mut manager, &mut entries, &lines, &steps);
        assert_eq!(result.as_tuple(), (true, String::new()));
        assert_eq!(*steps.log.borrow(), vec!["prepare", "write", "update", "hidden"]);
        assert_eq!(fs::read_to_string(&config).unwrap(), "GRUB_TIMEOUT=\"10\"\n");
        assert!(manager.last_backup().is_some());
    }

    #[test]
    fn validation_failure_stops_before_backup() {
        let (_dir, mut manager, _config) = setup();
        let mut entries = ConfigEntries::from_pairs([("GRUB_TIMEOUT", "301")]).unwrap();
        let steps = Steps::default();

        let result = run(&mut manager, &mut entries, &[], &steps);
        assert!(!result.success);
        assert_eq!(result.failed_step, Some(SaveStep::Validate));
        assert!(!result.rolled_back);
        assert!(manager.last_backup().is_none());
        assert!(manager.backup_manager().list_backups().is_empty());
    }

    #[test]
    fn late_failure_restores_backup() {
        let (_dir, mut manager, config) = setup();
        let mut entries = ConfigEntries::from_pairs([("GRUB_TIMEOUT", "10")]).unwrap();
        let lines = vec!["GRUB_TIMEOUT=5".to_string()];
        let steps = Steps {
            fail_at: Some("hidden"),
            target: Some(config.clone()),
            ..Default::default()
        };

        let result = run(&mut manager, &mut entries, &lines, &steps);
        assert_eq!(result.as_tuple(), (false, "hidden broke".to_string()));
        assert_eq!(result.failed_step, Some(SaveStep::ApplyHidden));
        assert!(result.rolled_back);
        assert_eq!(fs::read_to_string(&config).unwrap(), "GRUB_TIMEOUT=5\n");
    }

    #[test]
    fn prepare_failure_has_nothing_to_roll_back() {
        let (_dir, mut manager, _config) = setup();
        let mut entries = ConfigEntries::new();
        let steps = Steps {
            fail_at: Some("prepare"),
            ..Default::default()
        };

        let result = run(&mut manager, &mut entries, &[], &steps);
        assert_eq!(result.failed_step, Some(SaveStep::PrepareResources));
        assert_eq!(*steps.log.borrow(), vec!["prepare"]);
    }

    #[test]
    fn failed_write_restores_backup() {
        let (_dir, mut manager, config) = setup();
        let mut entries = ConfigEntries::from_pairs([("GRUB_TIMEOUT", "10")]).unwrap();
        let lines = vec!["GRUB_TIMEOUT=5".to_string()];
        let steps = Steps {
            fail_at: Some("write"),
            target: Some(config.clone()),
            ..Default::default()
        };

        let result = run(&mut manager, &mut entries, &lines, &steps);
        assert_eq!(result.failed_step, Some(SaveStep::Write));
        assert!(result.rolled_back);
        assert_eq!(result.error_message, "write broke");
        assert_eq!(*steps.log.borrow(), vec!["prepare", "write"]);
        assert_eq!(fs::read_to_string(&config).unwrap(), "GRUB_TIMEOUT=5\n");
    }

    #[test]
    fn failed_rollback_keeps_step_error() {
        let (dir, mut manager, config) = setup();
        let mut entries = ConfigEntries::from_pairs([("GRUB_TIMEOUT", "10")]).unwrap();
        let lines = vec!["GRUB_TIMEOUT=5".to_string()];
        let steps = Steps {
            fail_at: Some("write"),
            target: Some(config.clone()),
            wipe_before_write: Some(dir.path().join("backups")),
            ..Default::default()
        };

        let result = run(&mut manager, &mut entries, &lines, &steps);
        assert!(!result.success);
        assert_eq!(result.failed_step, Some(SaveStep::Write));
        assert!(!result.rolled_back);
        assert_eq!(result.error_message, "write broke");
        assert!(manager.last_backup().is_some_and(|p| !p.exists()));
        assert_eq!(fs::read_to_string(&config).unwrap(), "GRUB_TIMEOUT=\"10\"\n");
    }
}
