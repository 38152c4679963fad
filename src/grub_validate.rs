use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::config::{
    ALLOWED_GRUB_COLOR_NAMES, ALLOWED_IMAGE_EXTENSIONS, ALLOWED_THEME_EXTENSIONS, GRUB_TIMEOUT_DEFAULT,
    GRUB_TIMEOUT_MAX,
};
use crate::error::ValidationError;
use crate::grub_config::ConfigEntries;
use crate::security;

static GFXMODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(auto|\d{3,4}x\d{3,4})$").unwrap());
static TIMEOUT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());
static KERNEL_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_=-]+$").unwrap());

/// Bare kernel flags that pass without a warning.
const KNOWN_KERNEL_PARAMS: &[&str] = &[
    "quiet", "splash", "nomodeset", "ro", "rw", "initrd", "root", "console", "loglevel", "debug",
    "noresume", "acpi", "pci", "usb", "scsi", "ata", "ide", "nvme", "ahci", "xhci", "ehci", "ohci",
    "uhci", "pata", "sata", "raid", "lvm", "crypt", "dm", "md", "btrfs", "ext4", "xfs", "zfs", "swap",
    "resume", "uuid", "label", "partuuid", "gpt", "mbr", "bios", "efi", "uefi", "secureboot", "tpm",
    "ima", "evm", "apparmor", "selinux", "audit", "syslog", "kmsg", "printk", "panic", "reboot",
    "poweroff", "halt", "emergency", "single", "rescue", "recovery",
];

/// Per-field checks. Each returns the normalized value to store.
pub struct GrubValidator;

impl GrubValidator {
    /// Empty means the default of 5 seconds.
    pub fn validate_timeout(value: &str) -> Result<u32, ValidationError> {
        if value.is_empty() {
            return Ok(GRUB_TIMEOUT_DEFAULT);
        }
        if !TIMEOUT_RE.is_match(value) {
            return Err(ValidationError::new("Timeout must be a non-negative integer"));
        }
        match value.parse::<u32>() {
            Ok(t) if t <= GRUB_TIMEOUT_MAX => Ok(t),
            _ => Err(ValidationError::new(format!(
                "Timeout must be between 0 and {GRUB_TIMEOUT_MAX} seconds"
            ))),
        }
    }

    pub fn validate_gfxmode(value: &str) -> Result<String, ValidationError> {
        if value.is_empty() || value.eq_ignore_ascii_case("auto") {
            return Ok("auto".to_string());
        }
        if !GFXMODE_RE.is_match(value) {
            return Err(ValidationError::new(
                "Invalid resolution format (use WIDTHxHEIGHT or 'auto')",
            ));
        }
        Ok(value.to_string())
    }

    /// `None` for an empty path. `allowed_extensions` are lowercase and
    /// carry no dot.
    pub fn validate_file_path(value: &str, allowed_extensions: &[&str]) -> Result<Option<PathBuf>, ValidationError> {
        if value.is_empty() {
            return Ok(None);
        }
        security::validate_file_path(value)?;

        let path = Path::new(value);
        if !path.exists() {
            return Err(ValidationError::new(format!("File does not exist: {value}")));
        }
        if !path.is_file() {
            return Err(ValidationError::new(format!("Path is not a file: {value}")));
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !allowed_extensions.contains(&ext.as_str()) {
            return Err(ValidationError::new(format!(
                "Extension not allowed. Allowed extensions: {}",
                allowed_extensions.join(", ")
            )));
        }

        if File::open(path).is_err() {
            return Err(ValidationError::new(format!("Cannot read file: {value}")));
        }
        Ok(Some(path.to_path_buf()))
    }

    /// Rejects shell metacharacters and malformed parameter names. Unknown
    /// bare flags are accepted with a warning.
    pub fn validate_kernel_params(value: &str) -> Result<String, ValidationError> {
        if value.is_empty() {
            return Ok(String::new());
        }
        security::validate_kernel_params(value)?;

        for param in value.split_whitespace() {
            let key = param.split_once('=').map_or(param, |(k, _)| k);
            if !KERNEL_KEY_RE.is_match(key) {
                return Err(ValidationError::new(format!("Invalid kernel parameter: {key}")));
            }
        }
        for param in Self::nonstandard_kernel_params(value) {
            warn!("non-standard kernel parameter: {}", param);
        }
        Ok(value.to_string())
    }

    pub fn nonstandard_kernel_params(value: &str) -> Vec<&str> {
        value
            .split_whitespace()
            .filter(|p| !p.contains('=') && !KNOWN_KERNEL_PARAMS.contains(p))
            .collect()
    }

    /// `fg/bg` using GRUB's color names.
    pub fn validate_color_pair(value: &str, key: &str) -> Result<String, ValidationError> {
        if value.is_empty() {
            return Err(ValidationError::new(format!("{key} must not be empty")));
        }
        let Some((fg, bg)) = value.split_once('/') else {
            return Err(ValidationError::new(format!(
                "{key} must be in foreground/background form (e.g. light-gray/black)"
            )));
        };
        let (fg, bg) = (fg.trim(), bg.trim());

        for (color, role) in [(fg, "foreground"), (bg, "background")] {
            if !ALLOWED_GRUB_COLOR_NAMES.contains(&color) {
                return Err(ValidationError::new(format!(
                    "Invalid {role} color for {key}: {color}. Allowed colors: {}",
                    ALLOWED_GRUB_COLOR_NAMES.join(", ")
                )));
            }
        }
        Ok(format!("{fg}/{bg}"))
    }

    /// Validates every known key present in `entries`, writing back the
    /// normalized values. An empty background or theme stays empty so the
    /// generator drops its line.
    pub fn validate_all(entries: &mut ConfigEntries) -> Result<(), ValidationError> {
        if let Some(v) = entries.get("GRUB_TIMEOUT") {
            let timeout = Self::validate_timeout(v)?;
            Self::store(entries, "GRUB_TIMEOUT", timeout.to_string())?;
        }
        if let Some(v) = entries.get("GRUB_GFXMODE") {
            let mode = Self::validate_gfxmode(v)?;
            Self::store(entries, "GRUB_GFXMODE", mode)?;
        }

        Self::validate_optional_path(entries, "GRUB_BACKGROUND", ALLOWED_IMAGE_EXTENSIONS)?;
        Self::validate_optional_path(entries, "GRUB_THEME", ALLOWED_THEME_EXTENSIONS)?;

        if let Some(v) = entries.get("GRUB_CMDLINE_LINUX_DEFAULT") {
            let params = Self::validate_kernel_params(v)?;
            Self::store(entries, "GRUB_CMDLINE_LINUX_DEFAULT", params)?;
        }
        for key in ["GRUB_COLOR_NORMAL", "GRUB_COLOR_HIGHLIGHT"] {
            if let Some(v) = entries.get(key) {
                let pair = Self::validate_color_pair(v, key)?;
                Self::store(entries, key, pair)?;
            }
        }
        Ok(())
    }

    fn validate_optional_path(
        entries: &mut ConfigEntries,
        key: &str,
        allowed_extensions: &[&str],
    ) -> Result<(), ValidationError> {
        let Some(raw) = entries.get(key) else {
            return Ok(());
        };
        let value = match Self::validate_file_path(raw, allowed_extensions)? {
            Some(path) => path.to_string_lossy().into_owned(),
            None => String::new(),
        };
        Self::store(entries, key, value)
    }

    fn store(entries: &mut ConfigEntries, key: &str, value: String) -> Result<(), ValidationError> {
        entries
            .set(key, value)
            .map(|_| ())
            .map_err(|e| ValidationError::new(format!("Validation error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_bounds() {
        assert!(GrubValidator::validate_timeout("301").is_err());
        assert_eq!(GrubValidator::validate_timeout("").unwrap(), 5);
        assert_eq!(GrubValidator::validate_timeout("150").unwrap(), 150);
        assert_eq!(GrubValidator::validate_timeout("0").unwrap(), 0);
        assert!(GrubValidator::validate_timeout("-1").is_err());
        assert!(GrubValidator::validate_timeout("5s").is_err());
        assert!(GrubValidator::validate_timeout("99999999999999999999").is_err());
    }

    #[test]
    fn gfxmode_forms() {
        assert_eq!(GrubValidator::validate_gfxmode("").unwrap(), "auto");
        assert_eq!(GrubValidator::validate_gfxmode("AUTO").unwrap(), "auto");
        assert_eq!(GrubValidator::validate_gfxmode("1920x1080").unwrap(), "1920x1080");
        assert!(GrubValidator::validate_gfxmode("1920x1080x32").is_err());
        assert!(GrubValidator::validate_gfxmode("big").is_err());
    }

    #[test]
    fn file_path_checks_in_order() {
        let dir = tempfile::tempdir_in("/tmp").unwrap();
        let png = dir.path().join("bg.PNG");
        let gif = dir.path().join("bg.gif");
        std::fs::write(&png, b"png").unwrap();
        std::fs::write(&gif, b"gif").unwrap();
        let png_str = png.to_string_lossy().into_owned();

        assert_eq!(GrubValidator::validate_file_path("", ALLOWED_IMAGE_EXTENSIONS).unwrap(), None);
        assert_eq!(
            GrubValidator::validate_file_path(&png_str, ALLOWED_IMAGE_EXTENSIONS).unwrap(),
            Some(png.clone())
        );
        let err = GrubValidator::validate_file_path(&gif.to_string_lossy(), ALLOWED_IMAGE_EXTENSIONS).unwrap_err();
        assert!(err.to_string().contains("Extension not allowed"));
        let err = GrubValidator::validate_file_path(&dir.path().to_string_lossy(), ALLOWED_IMAGE_EXTENSIONS)
            .unwrap_err();
        assert!(err.to_string().contains("not a file"));
        let err = GrubValidator::validate_file_path("/tmp/../etc/passwd", ALLOWED_IMAGE_EXTENSIONS).unwrap_err();
        assert!(err.to_string().starts_with("Security error"));
        let err = GrubValidator::validate_file_path("/boot/nope/missing.png", ALLOWED_IMAGE_EXTENSIONS).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn kernel_params() {
        assert_eq!(GrubValidator::validate_kernel_params("").unwrap(), "");
        assert_eq!(
            GrubValidator::validate_kernel_params("quiet splash loglevel=3").unwrap(),
            "quiet splash loglevel=3"
        );
        assert!(GrubValidator::validate_kernel_params("quiet; reboot").is_err());
        assert!(GrubValidator::validate_kernel_params("init=$(sh)").is_err());
        assert_eq!(
            GrubValidator::nonstandard_kernel_params("quiet mitigations=off fancyflag"),
            vec!["fancyflag"]
        );
    }

    #[test]
    fn color_pairs() {
        assert_eq!(
            GrubValidator::validate_color_pair(" light-gray / black ", "GRUB_COLOR_NORMAL").unwrap(),
            "light-gray/black"
        );
        assert!(GrubValidator::validate_color_pair("", "GRUB_COLOR_NORMAL").is_err());
        assert!(GrubValidator::validate_color_pair("white", "GRUB_COLOR_NORMAL").is_err());
        assert!(GrubValidator::validate_color_pair("pink/black", "GRUB_COLOR_NORMAL").is_err());
    }

    #[test]
    fn validate_all_normalizes_in_place() {
        let mut entries = ConfigEntries::from_pairs([
            ("GRUB_TIMEOUT", ""),
            ("GRUB_GFXMODE", "Auto"),
            ("GRUB_BACKGROUND", ""),
            ("GRUB_COLOR_NORMAL", "white / blue"),
            ("GRUB_DISTRIBUTOR", "Debian"),
        ])
        .unwrap();
        GrubValidator::validate_all(&mut entries).unwrap();
        assert_eq!(entries.get("GRUB_TIMEOUT"), Some("5"));
        assert_eq!(entries.get("GRUB_GFXMODE"), Some("auto"));
        assert_eq!(entries.get("GRUB_BACKGROUND"), Some(""));
        assert_eq!(entries.get("GRUB_COLOR_NORMAL"), Some("white/blue"));
        assert_eq!(entries.get("GRUB_DISTRIBUTOR"), Some("Debian"));
    }

    #[test]
    fn validate_all_stops_at_first_bad_field() {
        let mut entries = ConfigEntries::from_pairs([("GRUB_TIMEOUT", "301")]).unwrap();
        assert!(GrubValidator::validate_all(&mut entries).is_err());
        assert_eq!(entries.get("GRUB_TIMEOUT"), Some("301"));
    }
}
