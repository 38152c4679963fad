use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use crate::background::BackgroundPlan;
use crate::backup_manager::{BackupInfo, BackupManager};
use crate::config::GrubPaths;
use crate::error::{CommandError, ServiceError};
use crate::executor::CommandExecutor;
use crate::grub::{flatten, GrubMenuParser, MenuEntry, MenuNode};
use crate::grub_config::{ConfigEntries, GrubConfigGenerator, GrubConfigLoader};
use crate::grub_validate::GrubValidator;
use crate::hidden_entries::{HiddenEntries, HiddenEntriesStore};
use crate::line_processor::{KeyNormalizer, LineClassifier};
use crate::lock::ApplyLock;
use crate::save_manager::{
    ConfigWriter, GrubUpdater, HiddenEntryApplier, ResourcePreparer, SaveCollaborators, SaveManager, SaveRequest,
    SaveResult, StepResult,
};

const DEFAULT_COLOR_NORMAL: &str = "light-gray/black";
const DEFAULT_COLOR_HIGHLIGHT: &str = "white/dark-gray";

/// Drops every `menuentry`/`submenu` block whose single-quoted title is in
/// `hidden`. Blocks are delimited by counting `{` and `}` per line, so
/// braces inside strings or comments are counted too.
pub fn filter_hidden_entries(content: &str, hidden: &HiddenEntries) -> String {
    let mut out = String::with_capacity(content.len());
    let mut skipping = false;
    let mut skip_level: i64 = 0;
    let mut current_level: i64 = 0;

    for line in content.split_inclusive('\n') {
        let stripped = line.trim();
        let is_entry_start = stripped.starts_with("menuentry ") || stripped.starts_with("submenu ");

        if !skipping && is_entry_start {
            if let Some(title) = stripped.split('\'').nth(1) {
                if hidden.contains(title) {
                    debug!("hiding menu entry '{}'", title);
                    skipping = true;
                    skip_level = current_level;
                }
            }
        }

        let opened = line.matches('{').count() as i64;
        let closed = line.matches('}').count() as i64;
        current_level += opened - closed;

        if skipping {
            if current_level <= skip_level {
                skipping = false;
            }
            continue;
        }
        out.push_str(line);
    }

    out
}

/// The side effects of an apply, each run through the privileged executor.
pub struct ApplySteps {
    executor: Rc<dyn CommandExecutor>,
    paths: GrubPaths,
    hidden_store: HiddenEntriesStore,
}

impl ApplySteps {
    pub fn new(executor: Rc<dyn CommandExecutor>, paths: GrubPaths) -> Self {
        let hidden_store = HiddenEntriesStore::new(&paths.hidden_entries, &paths.hidden_entries_hook);
        Self {
            executor,
            paths,
            hidden_store,
        }
    }

    pub fn color_script(normal: &str, highlight: &str) -> String {
        format!(
            "#!/bin/sh\n\
             cat << 'EOF'\n\
             set color_normal={normal}\n\
             set color_highlight={highlight}\n\
             set menu_color_normal={normal}\n\
             set menu_color_highlight={highlight}\n\
             EOF\n"
        )
    }

    fn install_color_script(&self, entries: &ConfigEntries) -> Result<(), CommandError> {
        let normal = entries.get("GRUB_COLOR_NORMAL").filter(|v| !v.is_empty());
        let highlight = entries.get("GRUB_COLOR_HIGHLIGHT").filter(|v| !v.is_empty());
        let script = Self::color_script(
            normal.unwrap_or(DEFAULT_COLOR_NORMAL),
            highlight.unwrap_or(DEFAULT_COLOR_HIGHLIGHT),
        );
        let dest = &self.paths.color_script;
        self.executor.write_file_privileged(dest, &script)?;
        self.executor.make_executable(dest)?;
        info!("color script installed to {}", dest.display());
        Ok(())
    }

    fn remove_color_script(&self) {
        let path = &self.paths.color_script;
        if !path.exists() {
            return;
        }
        match self.executor.remove_file_privileged(path) {
            Ok(()) => info!("color script removed from {}", path.display()),
            Err(e) => warn!("failed to remove color script: {}", e),
        }
    }

    pub fn background_plan(&self, entries: &ConfigEntries) -> BackgroundPlan {
        let value = entries.get("GRUB_BACKGROUND").unwrap_or_default();
        BackgroundPlan::for_value(value, &self.paths.backgrounds_dir)
    }

    /// Backgrounds outside `/boot/grub/` are unreadable to GRUB on some
    /// layouts; copy them next to the boot files and point the entry there.
    /// Solid colors are rendered to a PNG in the same place.
    fn install_background(&self, entries: &mut ConfigEntries) -> StepResult {
        let plan = self.background_plan(entries);
        let Some(dest) = plan.destination() else {
            return Ok(());
        };

        self.executor
            .create_dir_privileged(&self.paths.backgrounds_dir)
            .map_err(|e| format!("Failed to create backgrounds directory: {e}"))?;
        match &plan {
            BackgroundPlan::Copy { src, .. } => {
                self.executor
                    .copy_file_privileged(src, dest)
                    .map_err(|e| format!("Failed to copy background image: {e}"))?;
                info!("background image copied to {}", dest.display());
            }
            BackgroundPlan::Solid { color, .. } => {
                self.executor
                    .write_bytes_privileged(dest, &color.to_png())
                    .map_err(|e| format!("Failed to write solid background image: {e}"))?;
                info!("solid background #{} written to {}", color.hex(), dest.display());
            }
            BackgroundPlan::Keep => {}
        }

        entries
            .set("GRUB_BACKGROUND", dest.to_string_lossy())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Rewrites the live grub.cfg without the hidden blocks. Returns
    /// `false` when there was nothing to do.
    pub fn hide_in_grub_cfg(&self, hidden: &HiddenEntries) -> Result<bool, CommandError> {
        if hidden.is_empty() {
            return Ok(false);
        }
        let Some(grub_cfg) = self.paths.find_grub_cfg() else {
            warn!("grub.cfg not found, cannot hide entries");
            return Ok(false);
        };

        let content = fs::read_to_string(&grub_cfg)?;
        let filtered = filter_hidden_entries(&content, hidden);
        if filtered == content {
            debug!("no hidden entries present in {}", grub_cfg.display());
            return Ok(false);
        }
        self.executor.write_file_privileged(&grub_cfg, &filtered)?;
        info!("hid {} entries in {}", hidden.len(), grub_cfg.display());
        Ok(true)
    }
}

impl ResourcePreparer for ApplySteps {
    fn prepare_resources(&self, entries: &mut ConfigEntries) -> StepResult {
        let has_colors = ["GRUB_COLOR_NORMAL", "GRUB_COLOR_HIGHLIGHT"]
            .iter()
            .any(|k| entries.get(k).is_some_and(|v| !v.is_empty()));

        if has_colors {
            if let Err(e) = self.install_color_script(entries) {
                warn!("color script installation failed: {}", e);
            }
        } else {
            self.remove_color_script();
        }

        self.install_background(entries)
    }
}

impl ConfigWriter for ApplySteps {
    fn write_config(&self, content: &str) -> StepResult {
        debug!("writing configuration to {}", self.paths.config.display());
        self.executor
            .write_file_privileged(&self.paths.config, content)
            .map_err(|e| format!("Failed to write config: {e}"))
    }
}

impl GrubUpdater for ApplySteps {
    fn update_grub(&self) -> StepResult {
        self.executor
            .update_grub()
            .map_err(|e| format!("update-grub failed: {e}"))
    }
}

impl HiddenEntryApplier for ApplySteps {
    fn apply_hidden(&self, hidden: &HiddenEntries) -> StepResult {
        self.hidden_store
            .save(hidden, self.executor.as_ref())
            .map_err(|e| format!("Failed to save hidden entries: {e}"))?;
        self.hide_in_grub_cfg(hidden)
            .map(|_| ())
            .map_err(|e| format!("Failed to apply hidden entries: {e}"))
    }
}

/// Loaded state plus the apply workflow around it.
pub struct GrubService {
    paths: GrubPaths,
    loader: GrubConfigLoader,
    parser: GrubMenuParser,
    hidden_store: HiddenEntriesStore,
    save_manager: SaveManager,
    steps: ApplySteps,
    executor: Rc<dyn CommandExecutor>,

    entries: ConfigEntries,
    original_lines: Vec<String>,
    menu: Vec<MenuNode>,
    hidden_entries: HiddenEntries,
    hidden_keys: BTreeSet<String>,
    loaded: bool,
}

impl GrubService {
    pub fn new(paths: GrubPaths, executor: Rc<dyn CommandExecutor>) -> Self {
        let backup_manager = BackupManager::new(&paths.config)
            .with_backup_dir(&paths.backup_dir)
            .with_executor(executor.clone());

        Self {
            loader: GrubConfigLoader::new(&paths.config),
            parser: GrubMenuParser::from_candidates(&paths.grub_cfg_candidates),
            hidden_store: HiddenEntriesStore::new(&paths.hidden_entries, &paths.hidden_entries_hook),
            save_manager: SaveManager::new(backup_manager, GrubConfigGenerator::new()),
            steps: ApplySteps::new(executor.clone(), paths.clone()),
            executor,
            paths,
            entries: ConfigEntries::new(),
            original_lines: Vec::new(),
            menu: Vec::new(),
            hidden_entries: HiddenEntries::new(),
            hidden_keys: BTreeSet::new(),
            loaded: false,
        }
    }

    pub fn load(&mut self) -> Result<(), ServiceError> {
        let (entries, lines) = self.loader.load()?;
        self.parser = GrubMenuParser::from_candidates(&self.paths.grub_cfg_candidates);
        self.menu = self.parser.parse_menu_tree()?;
        self.hidden_entries = self.hidden_store.load();

        info!(
            config_entries = entries.len(),
            menu_entries = flatten(&self.menu).len(),
            hidden = self.hidden_entries.len(),
            "GRUB configuration loaded"
        );
        self.entries = entries;
        self.original_lines = lines;
        self.loaded = true;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Validate, back up, write, run update-grub, hide entries. Any failure
    /// from the write on restores the backup. Never returns `Err`: the
    /// outcome is in the `SaveResult`.
    pub fn save_and_apply(&mut self) -> SaveResult {
        if !self.loaded {
            return SaveResult::failed(ServiceError::NotLoaded.to_string());
        }

        let lock = match self.acquire_lock() {
            Ok(lock) => lock,
            Err(e) => {
                error!("{}", e);
                return SaveResult::failed(e.to_string());
            }
        };

        let Self {
            save_manager,
            steps,
            entries,
            original_lines,
            hidden_keys,
            hidden_entries,
            ..
        } = self;
        let steps: &ApplySteps = steps;
        let result = save_manager.execute_save(
            SaveRequest {
                entries,
                original_lines: original_lines.as_slice(),
                hidden_keys: &*hidden_keys,
                hidden_entries: &*hidden_entries,
            },
            &SaveCollaborators {
                resources: steps,
                writer: steps,
                updater: steps,
                hidden: steps,
            },
        );
        drop(lock);

        if result.success {
            if let Err(e) = self.load() {
                warn!("reload after apply failed: {}", e);
            }
        }
        result
    }

    /// The file content an apply would write, after validation, without
    /// touching disk. The background entry shows where the apply will put
    /// the image; nothing is copied or generated.
    pub fn preview(&self) -> Result<String, ServiceError> {
        if !self.loaded {
            return Err(ServiceError::NotLoaded);
        }
        let mut entries = self.entries.clone();
        let plan = self.steps.background_plan(&entries);
        if let BackgroundPlan::Solid { .. } = plan {
            // Nothing on disk to validate yet.
            entries.set("GRUB_BACKGROUND", "")?;
        }
        GrubValidator::validate_all(&mut entries)?;
        if let Some(dest) = plan.destination() {
            entries.set("GRUB_BACKGROUND", dest.to_string_lossy())?;
        }
        Ok(self
            .save_manager
            .generator()
            .generate(&entries, &self.original_lines, Some(&self.hidden_keys)))
    }

    /// Restores a backup (newest if `None`), reloads, and regenerates
    /// grub.cfg.
    pub fn restore_backup(&mut self, backup_path: Option<&Path>) -> Result<PathBuf, ServiceError> {
        let _lock = self.acquire_lock()?;
        let restored = self.save_manager.backup_manager().restore_backup(backup_path)?;
        info!("restored backup {}", restored.display());
        self.load()?;
        self.executor.update_grub()?;
        let hidden = self.hidden_entries.clone();
        self.steps.hide_in_grub_cfg(&hidden)?;
        Ok(restored)
    }

    /// Re-applies the stored hidden titles to grub.cfg. Entry point for the
    /// kernel post-install hook.
    pub fn apply_hidden_now(&self) -> Result<bool, ServiceError> {
        let _lock = self.acquire_lock()?;
        let hidden = self.hidden_store.load();
        Ok(self.steps.hide_in_grub_cfg(&hidden)?)
    }

    /// Serializes every writer of the config and grub.cfg.
    fn acquire_lock(&self) -> Result<ApplyLock, ServiceError> {
        match &self.paths.lock_file {
            Some(path) => ApplyLock::acquire(path),
            None => Ok(ApplyLock::none()),
        }
    }

    pub fn create_backup(&self) -> Result<PathBuf, ServiceError> {
        Ok(self.save_manager.backup_manager().create_backup()?)
    }

    pub fn list_backups(&self) -> Vec<BackupInfo> {
        self.save_manager.backup_manager().backup_infos()
    }

    pub fn delete_backup(&self, path: &Path) -> Result<(), ServiceError> {
        Ok(self.save_manager.backup_manager().delete_backup(path)?)
    }

    pub fn entries(&self) -> &ConfigEntries {
        &self.entries
    }

    pub fn set_entry(&mut self, key: &str, value: &str) -> Result<(), ServiceError> {
        self.entries.set(key, value)?;
        Ok(())
    }

    /// Forgets `key` and drops its active lines, so the next apply deletes
    /// it from the file. Commented-out lines stay.
    pub fn unset_entry(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        let before = self.original_lines.len();
        self.original_lines.retain(|line| {
            if LineClassifier::is_empty(line) || !LineClassifier::has_key_value(line) {
                return true;
            }
            let parsed = KeyNormalizer::normalize(LineClassifier::extract_key_part(line));
            parsed.is_commented || parsed.clean_key != key
        });
        removed || self.original_lines.len() != before
    }

    pub fn hidden_entries(&self) -> &HiddenEntries {
        &self.hidden_entries
    }

    pub fn hide_entry(&mut self, title: impl Into<String>) -> bool {
        self.hidden_entries.insert(title.into())
    }

    pub fn unhide_entry(&mut self, title: &str) -> bool {
        self.hidden_entries.remove(title)
    }

    pub fn hidden_keys(&self) -> &BTreeSet<String> {
        &self.hidden_keys
    }

    pub fn hide_key(&mut self, key: impl Into<String>) -> bool {
        self.hidden_keys.insert(key.into())
    }

    /// Stops commenting out `key`. When the file only has the key in a
    /// commented line, that line's value becomes the entry again.
    pub fn unhide_key(&mut self, key: &str) -> bool {
        let mut changed = self.hidden_keys.remove(key);
        if !self.entries.contains_key(key) {
            if let Some(value) = self.commented_value(key) {
                changed |= self.entries.set(key, value).is_ok();
            }
        }
        changed
    }

    fn commented_value(&self, key: &str) -> Option<String> {
        self.original_lines.iter().rev().find_map(|line| {
            if !LineClassifier::has_key_value(line) {
                return None;
            }
            let parsed = KeyNormalizer::normalize(LineClassifier::extract_key_part(line));
            if !parsed.is_commented || parsed.clean_key != key {
                return None;
            }
            let (_, value) = line.split_once('=')?;
            Some(value.trim().trim_matches('"').trim_matches('\'').to_string())
        })
    }

    pub fn menu_tree(&self) -> &[MenuNode] {
        &self.menu
    }

    pub fn menu_entries(&self) -> Vec<MenuEntry> {
        flatten(&self.menu)
    }

    pub fn grub_cfg_path(&self) -> Option<&Path> {
        self.parser.grub_cfg_path()
    }

    pub fn paths(&self) -> &GrubPaths {
        &self.paths
    }

    pub fn executor(&self) -> Rc<dyn CommandExecutor> {
        self.executor.clone()
    }
}
