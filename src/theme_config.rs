use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::theme_config_path;
use crate::error::ThemeError;
use crate::executor::CommandExecutor;
use crate::grub_config::ConfigEntries;

/// Every knob of the generated `theme.txt`. Missing JSON fields take the
/// stock GRUB look.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfiguration {
    pub background_image: String,
    pub desktop_color: String,

    pub menu_left: String,
    pub menu_top: String,
    pub menu_width: String,
    pub menu_height: String,
    pub item_height: String,
    pub item_spacing: String,
    pub item_padding: String,

    pub normal_fg: String,
    pub normal_bg: String,
    pub highlight_fg: String,
    pub highlight_bg: String,

    pub title_text: String,
    pub label_text: String,
    pub label_left: String,
    pub label_top: String,
    pub label_color: String,

    pub progress_left: String,
    pub progress_bottom: String,
    pub progress_width: String,
    pub progress_height: String,
    pub progress_fg: String,
    pub progress_bg: String,
    pub progress_border: String,

    pub font_normal: String,
    pub font_highlight: String,
    pub font_label: String,
    pub font_normal_size: String,
    pub font_highlight_size: String,
    pub font_label_size: String,

    pub enabled: bool,
}

impl Default for ThemeConfiguration {
    fn default() -> Self {
        Self {
            background_image: String::new(),
            desktop_color: "#000000".into(),
            menu_left: "10%".into(),
            menu_top: "25%".into(),
            menu_width: "80%".into(),
            menu_height: "50%".into(),
            item_height: "32".into(),
            item_spacing: "5".into(),
            item_padding: "10".into(),
            normal_fg: "light-gray".into(),
            normal_bg: "black".into(),
            highlight_fg: "white".into(),
            highlight_bg: "dark-gray".into(),
            title_text: String::new(),
            label_text: "GNU GRUB version %v".into(),
            label_left: "5%".into(),
            label_top: "2%".into(),
            label_color: "light-gray".into(),
            progress_left: "5%".into(),
            progress_bottom: "90%".into(),
            progress_width: "90%".into(),
            progress_height: "12".into(),
            progress_fg: "light-gray".into(),
            progress_bg: "black".into(),
            progress_border: "white".into(),
            font_normal: "unicode".into(),
            font_highlight: "unicode".into(),
            font_label: "unicode".into(),
            font_normal_size: "14".into(),
            font_highlight_size: "16".into(),
            font_label_size: "12".into(),
            enabled: true,
        }
    }
}

fn split_pair(value: Option<&str>, default_fg: &str, default_bg: &str) -> (String, String) {
    match value.and_then(|v| v.split_once('/')) {
        Some((fg, bg)) if !bg.contains('/') => (fg.trim().to_string(), bg.trim().to_string()),
        _ => (default_fg.to_string(), default_bg.to_string()),
    }
}

/// `theme_config.json` next to the installed theme.
#[derive(Debug, Clone)]
pub struct ThemeConfigManager {
    config_path: PathBuf,
}

impl Default for ThemeConfigManager {
    fn default() -> Self {
        Self::new(theme_config_path())
    }
}

impl ThemeConfigManager {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();
        debug!("theme config at {}", config_path.display());
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Defaults when the file is missing or unreadable.
    pub fn load(&self) -> ThemeConfiguration {
        if !self.config_path.exists() {
            info!("no theme config found, using defaults");
            return ThemeConfiguration::default();
        }
        let loaded = fs::read_to_string(&self.config_path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()));
        match loaded {
            Ok(config) => {
                info!("theme configuration loaded from {}", self.config_path.display());
                config
            }
            Err(e) => {
                error!("failed to load theme config: {}", e);
                ThemeConfiguration::default()
            }
        }
    }

    pub fn save(&self, config: &ThemeConfiguration, executor: &dyn CommandExecutor) -> Result<(), ThemeError> {
        let json = serde_json::to_string_pretty(config)?;
        let mut tmp = tempfile::Builder::new().prefix("grubconf-theme-").suffix(".json").tempfile()?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;

        if let Some(dir) = self.config_path.parent() {
            executor
                .create_dir_privileged(dir)
                .map_err(|e| ThemeError::command("Failed to create config directory", e))?;
        }
        executor
            .copy_file_privileged(tmp.path(), &self.config_path)
            .map_err(|e| ThemeError::command("Failed to copy config file", e))?;

        info!("theme configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Builds a configuration from theme keys that older setups kept in
    /// `/etc/default/grub`.
    pub fn load_from_grub_config(&self, entries: &ConfigEntries) -> ThemeConfiguration {
        let d = ThemeConfiguration::default();
        let get = |key: &str, default: &str| entries.get(key).unwrap_or(default).to_string();

        let (normal_fg, normal_bg) = split_pair(entries.get("GRUB_COLOR_NORMAL"), &d.normal_fg, &d.normal_bg);
        let (highlight_fg, highlight_bg) =
            split_pair(entries.get("GRUB_COLOR_HIGHLIGHT"), &d.highlight_fg, &d.highlight_bg);

        info!("theme configuration migrated from GRUB config");
        ThemeConfiguration {
            background_image: get("GRUB_BACKGROUND", ""),
            normal_fg,
            normal_bg,
            highlight_fg,
            highlight_bg,
            menu_left: get("GRUB_MENU_LEFT", &d.menu_left),
            menu_top: get("GRUB_MENU_TOP", &d.menu_top),
            menu_width: get("GRUB_MENU_WIDTH", &d.menu_width),
            menu_height: get("GRUB_MENU_HEIGHT", &d.menu_height),
            item_height: get("GRUB_ITEM_HEIGHT", &d.item_height),
            item_spacing: get("GRUB_ITEM_SPACING", &d.item_spacing),
            item_padding: get("GRUB_ITEM_PADDING", &d.item_padding),
            title_text: get("GRUB_TITLE_TEXT", &d.title_text),
            label_text: get("GRUB_LABEL_TEXT", &d.label_text),
            label_left: get("GRUB_LABEL_LEFT", &d.label_left),
            label_top: get("GRUB_LABEL_TOP", &d.label_top),
            label_color: get("GRUB_LABEL_COLOR", &d.label_color),
            progress_left: get("GRUB_PROGRESS_LEFT", &d.progress_left),
            progress_bottom: get("GRUB_PROGRESS_BOTTOM", &d.progress_bottom),
            progress_width: get("GRUB_PROGRESS_WIDTH", &d.progress_width),
            progress_height: get("GRUB_PROGRESS_HEIGHT", &d.progress_height),
            progress_fg: get("GRUB_PROGRESS_FG", &d.progress_fg),
            progress_bg: get("GRUB_PROGRESS_BG", &d.progress_bg),
            progress_border: get("GRUB_PROGRESS_BORDER", &d.progress_border),
            enabled: get("GRUB_USE_THEME", "true").eq_ignore_ascii_case("true"),
            ..d.clone()
        }
    }
}
