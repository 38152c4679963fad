//! Editing of `/etc/default/grub`, grub.cfg regeneration and boot menu
//! entry hiding, with backups and rollback around every apply.

pub mod background;
pub mod backup_manager;
pub mod colorprint;
pub mod config;
pub mod error;
pub mod executor;
pub mod grub;
pub mod grub_config;
pub mod grub_service;
pub mod grub_validate;
pub mod hidden_entries;
pub mod line_processor;
pub mod lock;
pub mod save_manager;
pub mod security;
pub mod theme_config;
pub mod theme_generator;
pub mod theme_manager;

pub use error::{BackupError, CommandError, ConfigError, ServiceError, ThemeError, ValidationError};
pub use grub_service::GrubService;
pub use save_manager::SaveResult;
