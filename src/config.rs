//! Paths, limits and other constants.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const GRUB_CONFIG_PATH: &str = "/etc/default/grub";
pub const GRUB_CFG_PATHS: &[&str] = &["/boot/grub/grub.cfg", "/boot/grub2/grub.cfg"];

pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tga"];
pub const ALLOWED_THEME_EXTENSIONS: &[&str] = &["txt"];

pub const ALLOWED_GRUB_COLOR_NAMES: &[&str] = &[
    "black",
    "blue",
    "brown",
    "cyan",
    "dark-gray",
    "green",
    "light-blue",
    "light-cyan",
    "light-gray",
    "light-green",
    "light-magenta",
    "light-red",
    "magenta",
    "red",
    "white",
    "yellow",
];

pub const BACKUP_MAX_COUNT: usize = 3;

pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const GRUB_TIMEOUT_MAX: u32 = 300;
pub const GRUB_TIMEOUT_DEFAULT: u32 = 5;

pub const HIDDEN_ENTRIES_CONFIG: &str = "/etc/grub.d/hidden_entries.json";
pub const HIDDEN_ENTRIES_HOOK: &str = "/etc/kernel/postinst.d/zz-grub-hide-entries";
pub const COLOR_SCRIPT_PATH: &str = "/etc/grub.d/05_grub_colors";
pub const GRUB_BACKGROUNDS_DIR: &str = "/boot/grub/backgrounds";
pub const THEME_DIR: &str = "/boot/grub/themes/custom";
pub const THEME_CONFIG_FILE: &str = "theme_config.json";
pub const APPLY_LOCK_PATH: &str = "/run/lock/grubconf.lock";

/// Every file and directory the service touches. Tests point these at a
/// scratch directory.
#[derive(Debug, Clone)]
pub struct GrubPaths {
    pub config: PathBuf,
    pub backup_dir: PathBuf,
    pub grub_cfg_candidates: Vec<PathBuf>,
    pub hidden_entries: PathBuf,
    pub hidden_entries_hook: PathBuf,
    pub color_script: PathBuf,
    pub backgrounds_dir: PathBuf,
    pub lock_file: Option<PathBuf>,
}

impl Default for GrubPaths {
    fn default() -> Self {
        let config = PathBuf::from(GRUB_CONFIG_PATH);
        let backup_dir = default_backup_dir(&config);
        GrubPaths {
            config,
            backup_dir,
            grub_cfg_candidates: GRUB_CFG_PATHS.iter().map(PathBuf::from).collect(),
            hidden_entries: PathBuf::from(HIDDEN_ENTRIES_CONFIG),
            hidden_entries_hook: PathBuf::from(HIDDEN_ENTRIES_HOOK),
            color_script: PathBuf::from(COLOR_SCRIPT_PATH),
            backgrounds_dir: PathBuf::from(GRUB_BACKGROUNDS_DIR),
            lock_file: Some(PathBuf::from(APPLY_LOCK_PATH)),
        }
    }
}

impl GrubPaths {
    /// First existing grub.cfg, in candidate order. Not the newest one: a
    /// stale, unused grub.cfg can be more recent than the live one.
    pub fn find_grub_cfg(&self) -> Option<PathBuf> {
        self.grub_cfg_candidates.iter().find(|p| p.exists()).cloned()
    }
}

pub fn theme_config_path() -> PathBuf {
    Path::new(THEME_DIR).join(THEME_CONFIG_FILE)
}

/// Root writes backups next to the config; other users get a per-user data
/// directory they can write without elevation.
pub fn default_backup_dir(config: &Path) -> PathBuf {
    let config_dir = config.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"));
    if nix::unistd::geteuid().is_root() {
        return config_dir;
    }
    if let Some(data) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(data).join("grubconf").join("backups");
    }
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".local/share/grubconf/backups"),
        None => config_dir,
    }
}
