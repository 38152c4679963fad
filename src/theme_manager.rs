use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{error, info};

use crate::config::THEME_DIR;
use crate::error::ThemeError;
use crate::theme_generator::{THEME_BACKUP_FILE, THEME_FILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThemeMode {
    /// No custom `theme.txt`; GRUB's built-in look.
    Standard,
    Custom,
    /// A user-edited theme copied over `theme.txt`.
    CustomModified,
}

impl ThemeMode {
    pub const ALL: [ThemeMode; 3] = [ThemeMode::Standard, ThemeMode::Custom, ThemeMode::CustomModified];

    pub fn as_str(self) -> &'static str {
        match self {
            ThemeMode::Standard => "standard",
            ThemeMode::Custom => "custom",
            ThemeMode::CustomModified => "custom_modified",
        }
    }
}

impl fmt::Display for ThemeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemeMode {
    type Err = ThemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(ThemeMode::Standard),
            "custom" => Ok(ThemeMode::Custom),
            "custom_modified" | "modified" => Ok(ThemeMode::CustomModified),
            other => Err(ThemeError::Mode(format!("Unknown theme mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeSettings {
    pub theme_path: PathBuf,
    pub backup_path: PathBuf,
    pub modified_path: PathBuf,
}

impl Default for ThemeSettings {
    fn default() -> Self {
        let dir = Path::new(THEME_DIR);
        let data_dir = env::var_os("XDG_DATA_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            theme_path: dir.join(THEME_FILE),
            backup_path: dir.join(THEME_BACKUP_FILE),
            modified_path: data_dir.join("grubconf/theme_modif.txt"),
        }
    }
}

impl ThemeSettings {
    /// All three files inside `dir`; used by tests and alternate layouts.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            theme_path: dir.join(THEME_FILE),
            backup_path: dir.join(THEME_BACKUP_FILE),
            modified_path: dir.join("theme_modif.txt"),
        }
    }
}

pub trait ThemeProvider {
    fn mode(&self) -> ThemeMode;
    fn is_available(&self) -> bool;
    /// Returns a status message for the user.
    fn activate(&self) -> Result<String, ThemeError>;
    fn deactivate(&self) -> Result<String, ThemeError>;
    fn theme_content(&self) -> Option<String>;
}

fn read_theme(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            error!("failed to read theme {}: {}", path.display(), e);
            None
        }
    }
}

fn backup_once(settings: &ThemeSettings) -> Result<(), ThemeError> {
    if settings.theme_path.exists() && !settings.backup_path.exists() {
        fs::copy(&settings.theme_path, &settings.backup_path)?;
    }
    Ok(())
}

fn remove_theme_file(settings: &ThemeSettings) -> Result<bool, ThemeError> {
    if settings.theme_path.exists() {
        fs::remove_file(&settings.theme_path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

pub struct StandardThemeProvider {
    settings: ThemeSettings,
}

impl ThemeProvider for StandardThemeProvider {
    fn mode(&self) -> ThemeMode {
        ThemeMode::Standard
    }

    fn is_available(&self) -> bool {
        !self.settings.theme_path.exists()
    }

    fn activate(&self) -> Result<String, ThemeError> {
        if !self.settings.theme_path.exists() {
            return Ok("Already using standard theme".into());
        }
        backup_once(&self.settings)?;
        remove_theme_file(&self.settings)?;
        info!("standard theme activated");
        Ok("Standard GRUB theme activated".into())
    }

    fn deactivate(&self) -> Result<String, ThemeError> {
        Ok("Standard theme cannot be deactivated".into())
    }

    fn theme_content(&self) -> Option<String> {
        None
    }
}

pub struct CustomThemeProvider {
    settings: ThemeSettings,
}

impl ThemeProvider for CustomThemeProvider {
    fn mode(&self) -> ThemeMode {
        ThemeMode::Custom
    }

    fn is_available(&self) -> bool {
        self.settings.theme_path.exists()
    }

    /// Implicit: the custom theme is active whenever `theme.txt` exists.
    fn activate(&self) -> Result<String, ThemeError> {
        if self.is_available() {
            Ok("Custom theme is active".into())
        } else {
            Err(ThemeError::Mode("Custom theme.txt not found".into()))
        }
    }

    fn deactivate(&self) -> Result<String, ThemeError> {
        if remove_theme_file(&self.settings)? {
            info!("custom theme deactivated");
            Ok("Custom theme deactivated".into())
        } else {
            Ok("Custom theme already inactive".into())
        }
    }

    fn theme_content(&self) -> Option<String> {
        read_theme(&self.settings.theme_path)
    }
}

pub struct CustomModifiedThemeProvider {
    settings: ThemeSettings,
}

impl ThemeProvider for CustomModifiedThemeProvider {
    fn mode(&self) -> ThemeMode {
        ThemeMode::CustomModified
    }

    fn is_available(&self) -> bool {
        self.settings.modified_path.exists()
    }

    fn activate(&self) -> Result<String, ThemeError> {
        if !self.is_available() {
            return Err(ThemeError::Mode(format!(
                "Modified theme not found at {}",
                self.settings.modified_path.display()
            )));
        }
        if let Some(dir) = self.settings.theme_path.parent() {
            fs::create_dir_all(dir)?;
        }
        backup_once(&self.settings)?;
        fs::copy(&self.settings.modified_path, &self.settings.theme_path)?;
        info!("modified custom theme activated");
        Ok("Modified custom theme activated".into())
    }

    fn deactivate(&self) -> Result<String, ThemeError> {
        if remove_theme_file(&self.settings)? {
            info!("modified theme deactivated");
            Ok("Modified theme deactivated".into())
        } else {
            Ok("Modified theme already inactive".into())
        }
    }

    fn theme_content(&self) -> Option<String> {
        read_theme(&self.settings.modified_path)
    }
}

/// Switches between the standard look, the generated theme and a
/// user-modified copy of it.
pub struct ThemeManager {
    settings: ThemeSettings,
    providers: Vec<Box<dyn ThemeProvider>>,
}

impl ThemeManager {
    pub fn new(settings: ThemeSettings) -> Self {
        let providers: Vec<Box<dyn ThemeProvider>> = vec![
            Box::new(StandardThemeProvider {
                settings: settings.clone(),
            }),
            Box::new(CustomThemeProvider {
                settings: settings.clone(),
            }),
            Box::new(CustomModifiedThemeProvider {
                settings: settings.clone(),
            }),
        ];
        Self { settings, providers }
    }

    pub fn settings(&self) -> &ThemeSettings {
        &self.settings
    }

    pub fn provider(&self, mode: ThemeMode) -> Option<&dyn ThemeProvider> {
        self.providers.iter().find(|p| p.mode() == mode).map(|p| p.as_ref())
    }

    /// `CustomModified` when `theme.txt` matches the modified copy byte
    /// for byte.
    pub fn current_mode(&self) -> ThemeMode {
        if !self.settings.theme_path.exists() {
            return ThemeMode::Standard;
        }
        let current = self.provider(ThemeMode::Custom).and_then(|p| p.theme_content());
        let modified = self
            .provider(ThemeMode::CustomModified)
            .filter(|p| p.is_available())
            .and_then(|p| p.theme_content());
        match (current, modified) {
            (Some(c), Some(m)) if c == m => ThemeMode::CustomModified,
            _ => ThemeMode::Custom,
        }
    }

    pub fn available_modes(&self) -> Vec<ThemeMode> {
        self.providers
            .iter()
            .filter(|p| p.mode() == ThemeMode::Standard || p.is_available())
            .map(|p| p.mode())
            .collect()
    }

    pub fn activate_mode(&self, mode: ThemeMode) -> Result<String, ThemeError> {
        let provider = self
            .provider(mode)
            .ok_or_else(|| ThemeError::Mode(format!("Unknown theme mode: {mode}")))?;
        let message = provider.activate()?;
        info!("theme mode activated: {}", mode);
        Ok(message)
    }

    /// Content for `mode`, or for the current mode when `None`.
    pub fn theme_content(&self, mode: Option<ThemeMode>) -> Option<String> {
        let mode = mode.unwrap_or_else(|| self.current_mode());
        self.provider(mode).and_then(|p| p.theme_content())
    }

    pub fn write_theme_content(&self, content: &str, mode: ThemeMode) -> Result<PathBuf, ThemeError> {
        let target = match mode {
            ThemeMode::Standard => return Err(ThemeError::Mode("Cannot write to standard theme".into())),
            ThemeMode::Custom => &self.settings.theme_path,
            ThemeMode::CustomModified => &self.settings.modified_path,
        };
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(target, content)?;
        info!("theme content written to {}", target.display());
        Ok(target.clone())
    }
}
