use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Edit GRUB settings, hide boot menu entries and manage backups.
#[derive(Parser)]
#[command(name = "grubconf", version, about)]
pub struct TopLevel {
    #[command(subcommand)]
    pub command: TopLevelCommand,

    /// Settings file to edit instead of /etc/default/grub
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// grub.cfg to read and rewrite instead of the detected one
    #[arg(long, global = true, value_name = "FILE")]
    pub grub_cfg: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR")]
    pub backup_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum TopLevelCommand {
    /// Print the current settings
    Show,
    /// Print the boot menu with index paths
    Menu,
    /// Set KEY=VALUE pairs, then apply
    Set {
        #[arg(required = true, value_name = "KEY=VALUE")]
        assignments: Vec<String>,
    },
    /// Remove settings, then apply
    Unset {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Hide boot menu entries by title, then apply
    Hide {
        #[arg(required = true)]
        titles: Vec<String>,
    },
    Unhide {
        #[arg(required = true)]
        titles: Vec<String>,
    },
    /// Comment out settings on the next apply
    HideKey {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    UnhideKey {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Validate, back up, write, run update-grub and hide entries
    Apply {
        /// Print the file that would be written and stop
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-hide stored entries in grub.cfg (run by the kernel hook)
    ApplyHidden,
    Backup(Backup),
    Theme(Theme),
}

#[derive(Args)]
pub struct Backup {
    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Subcommand)]
pub enum BackupCommand {
    List,
    Create,
    /// Restore a backup (newest if omitted) and regenerate grub.cfg
    Restore { path: Option<PathBuf> },
    Delete { path: PathBuf },
}

#[derive(Args)]
pub struct Theme {
    #[command(subcommand)]
    pub command: ThemeCommand,
}

#[derive(Subcommand)]
pub enum ThemeCommand {
    /// Print the theme configuration and current mode
    Show,
    /// Build the theme configuration from GRUB_* keys and save it
    Migrate,
    /// Generate theme.txt from the saved configuration and install it
    Install,
    Remove {
        /// Do not keep theme.txt.bak
        #[arg(long)]
        no_backup: bool,
    },
    /// Print available modes, or switch to MODE
    Mode { mode: Option<String> },
}
