use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::THEME_DIR;
use crate::error::ThemeError;
use crate::executor::CommandExecutor;
use crate::theme_config::ThemeConfiguration;

pub const THEME_FILE: &str = "theme.txt";
pub const THEME_BACKUP_FILE: &str = "theme.txt.bak";

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn font(name: &str, size: &str) -> String {
    quoted(&format!("{name} {size}"))
}

/// Renders GRUB gfxmenu `theme.txt` text.
pub struct ThemeContentBuilder;

impl ThemeContentBuilder {
    pub fn build(config: &ThemeConfiguration) -> String {
        let mut out = String::new();
        // `write!` into a String cannot fail.
        let _ = Self::write_globals(&mut out, config);
        let _ = Self::write_boot_menu(&mut out, config);
        let _ = Self::write_label(&mut out, config);
        let _ = Self::write_progress_bar(&mut out, config);
        out
    }

    fn write_globals(out: &mut String, c: &ThemeConfiguration) -> std::fmt::Result {
        writeln!(out, "# GRUB theme generated by grubconf")?;
        writeln!(out, "title-text: {}", quoted(&c.title_text))?;
        writeln!(out, "desktop-color: {}", quoted(&c.desktop_color))?;
        if let Some(name) = Path::new(&c.background_image).file_name() {
            writeln!(out, "desktop-image: {}", quoted(&name.to_string_lossy()))?;
        }
        writeln!(out, "message-font: {}", font(&c.font_normal, &c.font_normal_size))?;
        writeln!(out, "message-color: {}", quoted(&c.normal_fg))?;
        writeln!(out, "message-bg-color: {}", quoted(&c.normal_bg))?;
        writeln!(out)
    }

    fn write_boot_menu(out: &mut String, c: &ThemeConfiguration) -> std::fmt::Result {
        writeln!(out, "+ boot_menu {{")?;
        writeln!(out, "    left = {}", c.menu_left)?;
        writeln!(out, "    top = {}", c.menu_top)?;
        writeln!(out, "    width = {}", c.menu_width)?;
        writeln!(out, "    height = {}", c.menu_height)?;
        writeln!(out, "    item_font = {}", font(&c.font_normal, &c.font_normal_size))?;
        writeln!(out, "    item_color = {}", quoted(&c.normal_fg))?;
        writeln!(out, "    selected_item_font = {}", font(&c.font_highlight, &c.font_highlight_size))?;
        writeln!(out, "    selected_item_color = {}", quoted(&c.highlight_fg))?;
        writeln!(out, "    item_height = {}", c.item_height)?;
        writeln!(out, "    item_spacing = {}", c.item_spacing)?;
        writeln!(out, "    item_padding = {}", c.item_padding)?;
        writeln!(out, "}}")?;
        writeln!(out)
    }

    fn write_label(out: &mut String, c: &ThemeConfiguration) -> std::fmt::Result {
        if c.label_text.is_empty() {
            return Ok(());
        }
        writeln!(out, "+ label {{")?;
        writeln!(out, "    left = {}", c.label_left)?;
        writeln!(out, "    top = {}", c.label_top)?;
        writeln!(out, "    text = {}", quoted(&c.label_text))?;
        writeln!(out, "    font = {}", font(&c.font_label, &c.font_label_size))?;
        writeln!(out, "    color = {}", quoted(&c.label_color))?;
        writeln!(out, "}}")?;
        writeln!(out)
    }

    fn write_progress_bar(out: &mut String, c: &ThemeConfiguration) -> std::fmt::Result {
        writeln!(out, "+ progress_bar {{")?;
        writeln!(out, "    id = \"__timeout__\"")?;
        writeln!(out, "    left = {}", c.progress_left)?;
        writeln!(out, "    top = {}", c.progress_bottom)?;
        writeln!(out, "    width = {}", c.progress_width)?;
        writeln!(out, "    height = {}", c.progress_height)?;
        writeln!(out, "    font = {}", font(&c.font_label, &c.font_label_size))?;
        writeln!(out, "    text_color = {}", quoted(&c.progress_fg))?;
        writeln!(out, "    fg_color = {}", quoted(&c.progress_fg))?;
        writeln!(out, "    bg_color = {}", quoted(&c.progress_bg))?;
        writeln!(out, "    border_color = {}", quoted(&c.progress_border))?;
        writeln!(out, "    text = \"@TIMEOUT_NOTIFICATION_LONG@\"")?;
        writeln!(out, "}}")
    }
}

/// Installs and removes the custom theme under `/boot/grub/`.
#[derive(Debug, Clone)]
pub struct GrubThemeGenerator {
    theme_dir: PathBuf,
}

impl GrubThemeGenerator {
    pub fn new(theme_dir: impl Into<PathBuf>) -> Result<Self, ThemeError> {
        let theme_dir = theme_dir.into();
        if !theme_dir.to_string_lossy().starts_with("/boot/grub/") {
            return Err(ThemeError::InvalidThemeDir(theme_dir));
        }
        debug!("theme generator using {}", theme_dir.display());
        Ok(Self { theme_dir })
    }

    pub fn theme_dir(&self) -> &Path {
        &self.theme_dir
    }

    pub fn theme_path(&self) -> PathBuf {
        self.theme_dir.join(THEME_FILE)
    }

    /// Writes `theme.txt` and copies the background image next to it.
    /// A missing or uncopyable background only costs the image.
    pub fn generate_theme_from_config(
        &self,
        config: &ThemeConfiguration,
        executor: &dyn CommandExecutor,
    ) -> Result<PathBuf, ThemeError> {
        let content = ThemeContentBuilder::build(config);
        let theme_path = self.theme_path();

        executor.create_dir_privileged(&self.theme_dir).map_err(|e| {
            ThemeError::command(
                format!("Failed to create theme directory '{}'", self.theme_dir.display()),
                e,
            )
        })?;
        executor.write_file_privileged(&theme_path, &content).map_err(|e| {
            ThemeError::command(format!("Failed to copy theme.txt to {}", theme_path.display()), e)
        })?;
        info!("theme file installed: {} ({} bytes)", theme_path.display(), content.len());

        self.install_background(&config.background_image, executor);
        Ok(theme_path)
    }

    fn install_background(&self, background: &str, executor: &dyn CommandExecutor) {
        if background.is_empty() {
            return;
        }
        let src = Path::new(background);
        let Some(name) = src.file_name() else {
            return;
        };
        if !src.exists() {
            warn!("background image not found: {} (theme will use desktop color)", background);
            return;
        }
        let dest = self.theme_dir.join(name);
        match executor.copy_file_privileged(src, &dest) {
            Ok(()) => info!("background image installed: {}", dest.display()),
            Err(e) => warn!("failed to copy background image to {}: {}", dest.display(), e),
        }
    }

    /// Removes `theme.txt`, first saving it as `theme.txt.bak` unless a
    /// backup already exists. Returns `false` if there was no theme.
    pub fn remove_theme(&self, executor: &dyn CommandExecutor, keep_backup: bool) -> Result<bool, ThemeError> {
        let theme_path = self.theme_path();
        if !theme_path.exists() {
            info!("no theme.txt to remove");
            return Ok(false);
        }

        let backup_path = self.theme_dir.join(THEME_BACKUP_FILE);
        if keep_backup && !backup_path.exists() {
            if let Err(e) = executor.copy_file_privileged(&theme_path, &backup_path) {
                warn!("failed to back up theme before removal: {}", e);
            }
        }
        executor
            .remove_file_privileged(&theme_path)
            .map_err(|e| ThemeError::command("Failed to remove theme.txt", e))?;
        info!("theme file removed: {} (backup kept: {})", theme_path.display(), keep_backup);
        Ok(true)
    }
}

impl Default for GrubThemeGenerator {
    fn default() -> Self {
        Self {
            theme_dir: PathBuf::from(THEME_DIR),
        }
    }
}
