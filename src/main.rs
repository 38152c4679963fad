mod cli;

use std::io;
use std::process;
use std::rc::Rc;

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use cli::{BackupCommand, ThemeCommand, TopLevel, TopLevelCommand};
use grubconf::backup_manager::{format_size, format_time};
use grubconf::colorprint::Bcolors;
use grubconf::config::{default_backup_dir, GrubPaths};
use grubconf::executor::{CommandExecutor, SecureCommandExecutor};
use grubconf::grub::{find_path, path_to_string, MenuNode};
use grubconf::hidden_entries::HiddenEntries;
use grubconf::theme_config::ThemeConfigManager;
use grubconf::theme_generator::GrubThemeGenerator;
use grubconf::theme_manager::{ThemeManager, ThemeMode, ThemeSettings};
use grubconf::{GrubService, ServiceError, ThemeError};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Theme(#[from] ThemeError),

    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    Apply(String),
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn grub_paths(args: &TopLevel) -> GrubPaths {
    let mut paths = GrubPaths::default();
    if let Some(config) = &args.config {
        paths.backup_dir = default_backup_dir(config);
        paths.config = config.clone();
    }
    if let Some(dir) = &args.backup_dir {
        paths.backup_dir = dir.clone();
    }
    if let Some(grub_cfg) = &args.grub_cfg {
        paths.grub_cfg_candidates = vec![grub_cfg.clone()];
    }
    debug!(?paths, "resolved paths");
    paths
}

fn apply(service: &mut GrubService, colors: &Bcolors) -> Result<(), CliError> {
    let result = service.save_and_apply();
    if result.success {
        println!("{}", colors.okgreen("Configuration applied"));
        return Ok(());
    }

    let mut message = match result.failed_step {
        Some(step) => format!("{step} step failed: {}", result.error_message),
        None => result.error_message.clone(),
    };
    if result.rolled_back {
        message.push_str(" (previous configuration restored)");
    }
    Err(CliError::Apply(message))
}

fn print_menu(
    nodes: &[MenuNode],
    path: &mut Vec<usize>,
    hidden: &HiddenEntries,
    default: Option<&str>,
    colors: &Bcolors,
) {
    for (i, node) in nodes.iter().enumerate() {
        path.push(i);
        let index = path_to_string(path);
        let indent = "  ".repeat(path.len() - 1);
        let title = if node.is_submenu() {
            colors.header(&format!("{} >", node.title()))
        } else {
            node.title().to_string()
        };

        let mut line = format!("{indent}{} {title}", colors.dim(&index));
        if default.is_some_and(|d| d == index || d == node.title()) {
            line.push_str(&colors.okgreen(" (default)"));
        }
        if hidden.contains(node.title()) {
            line.push_str(&colors.warning(" [hidden]"));
        }
        println!("{line}");

        print_menu(node.children(), path, hidden, default, colors);
        path.pop();
    }
}

fn run_backup(service: &mut GrubService, command: BackupCommand, colors: &Bcolors) -> Result<(), CliError> {
    match command {
        BackupCommand::List => {
            let backups = service.list_backups();
            if backups.is_empty() {
                println!("No backups found");
            }
            for info in backups {
                let status = if info.is_valid {
                    colors.okgreen("valid")
                } else {
                    colors.fail("invalid")
                };
                println!(
                    "{}  {:>9}  {}  {}",
                    format_time(info.timestamp),
                    format_size(info.size_bytes),
                    status,
                    info.path.display()
                );
            }
        }
        BackupCommand::Create => {
            let path = service.create_backup()?;
            println!("{} {}", colors.okgreen("Backup created:"), path.display());
        }
        BackupCommand::Restore { path } => {
            let restored = service.restore_backup(path.as_deref())?;
            println!("{} {}", colors.okgreen("Restored:"), restored.display());
        }
        BackupCommand::Delete { path } => {
            service.delete_backup(&path)?;
            println!("Deleted {}", path.display());
        }
    }
    Ok(())
}

fn run_theme(
    service: &mut GrubService,
    executor: Rc<dyn CommandExecutor>,
    command: ThemeCommand,
    colors: &Bcolors,
) -> Result<(), CliError> {
    let config_manager = ThemeConfigManager::default();
    let themes = ThemeManager::new(ThemeSettings::default());

    match command {
        ThemeCommand::Show => {
            let config = config_manager.load();
            let json = serde_json::to_string_pretty(&config).map_err(ThemeError::from)?;
            println!("{}", colors.bold(&format!("Mode: {}", themes.current_mode())));
            println!("{json}");
        }
        ThemeCommand::Migrate => {
            service.load()?;
            let config = config_manager.load_from_grub_config(service.entries());
            config_manager.save(&config, executor.as_ref())?;
            println!("Theme configuration saved to {}", config_manager.config_path().display());
        }
        ThemeCommand::Install => {
            let config = config_manager.load();
            if !config.enabled {
                return Err(CliError::Usage("Theme is disabled in the theme configuration".into()));
            }
            let theme_path = GrubThemeGenerator::default().generate_theme_from_config(&config, executor.as_ref())?;
            println!("Theme installed to {}", theme_path.display());

            service.load()?;
            service.set_entry("GRUB_THEME", &theme_path.to_string_lossy())?;
            apply(service, colors)?;
        }
        ThemeCommand::Remove { no_backup } => {
            let removed = GrubThemeGenerator::default().remove_theme(executor.as_ref(), !no_backup)?;
            if !removed {
                println!("No theme installed");
            }
            service.load()?;
            if service.unset_entry("GRUB_THEME") {
                apply(service, colors)?;
            }
        }
        ThemeCommand::Mode { mode: None } => {
            let current = themes.current_mode();
            for mode in themes.available_modes() {
                let marker = if mode == current { "*" } else { " " };
                println!("{marker} {mode}");
            }
        }
        ThemeCommand::Mode { mode: Some(name) } => {
            let mode: ThemeMode = name.parse()?;
            let message = themes.activate_mode(mode)?;
            println!("{}", colors.okgreen(&message));
        }
    }
    Ok(())
}

fn run(args: TopLevel, colors: &Bcolors) -> Result<(), CliError> {
    let paths = grub_paths(&args);
    let executor: Rc<dyn CommandExecutor> = Rc::new(SecureCommandExecutor::default());
    let mut service = GrubService::new(paths, executor.clone());

    match args.command {
        TopLevelCommand::Show => {
            service.load()?;
            println!("{}", colors.bold(&service.paths().config.display().to_string()));
            for (key, value) in service.entries().iter() {
                println!("{}={}", colors.okblue(key.as_str()), value);
            }
        }
        TopLevelCommand::Menu => {
            service.load()?;
            match service.grub_cfg_path() {
                Some(path) => println!("{}", colors.bold(&path.display().to_string())),
                None => return Err(CliError::Usage("grub.cfg not found".into())),
            }
            let default = service.entries().get("GRUB_DEFAULT");
            print_menu(service.menu_tree(), &mut Vec::new(), service.hidden_entries(), default, colors);
        }
        TopLevelCommand::Set { assignments } => {
            service.load()?;
            for assignment in &assignments {
                let (key, value) = assignment
                    .split_once('=')
                    .ok_or_else(|| CliError::Usage(format!("Expected KEY=VALUE, got '{assignment}'")))?;
                service.set_entry(key.trim(), value)?;
            }
            apply(&mut service, colors)?;
        }
        TopLevelCommand::Unset { keys } => {
            service.load()?;
            for key in &keys {
                if !service.unset_entry(key) {
                    warn!("{} is not set", key);
                }
            }
            apply(&mut service, colors)?;
        }
        TopLevelCommand::Hide { titles } => {
            service.load()?;
            for title in titles {
                if find_path(service.menu_tree(), &title).is_none() {
                    warn!("no menu entry titled '{}' in grub.cfg", title);
                }
                service.hide_entry(title);
            }
            apply(&mut service, colors)?;
        }
        TopLevelCommand::Unhide { titles } => {
            service.load()?;
            for title in &titles {
                if !service.unhide_entry(title) {
                    warn!("'{}' was not hidden", title);
                }
            }
            apply(&mut service, colors)?;
        }
        TopLevelCommand::HideKey { keys } => {
            service.load()?;
            for key in keys {
                service.hide_key(key);
            }
            apply(&mut service, colors)?;
        }
        TopLevelCommand::UnhideKey { keys } => {
            service.load()?;
            for key in &keys {
                if !service.unhide_key(key) {
                    warn!("{} is not commented out", key);
                }
            }
            apply(&mut service, colors)?;
        }
        TopLevelCommand::Apply { dry_run: true } => {
            service.load()?;
            print!("{}", service.preview()?);
        }
        TopLevelCommand::Apply { dry_run: false } => {
            service.load()?;
            apply(&mut service, colors)?;
        }
        TopLevelCommand::ApplyHidden => {
            let changed = service.apply_hidden_now()?;
            debug!(changed, "hidden entries re-applied");
        }
        TopLevelCommand::Backup(backup) => run_backup(&mut service, backup.command, colors)?,
        TopLevelCommand::Theme(theme) => run_theme(&mut service, executor, theme.command, colors)?,
    }
    Ok(())
}

fn main() {
    let args = TopLevel::parse();
    setup_logging(args.verbose);
    let colors = Bcolors::new();

    if let Err(e) = run(args, &colors) {
        eprintln!("{} {e}", colors.fail("error:"));
        process::exit(1);
    }
}
