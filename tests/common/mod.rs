#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use grubconf::config::GrubPaths;
use grubconf::error::CommandError;
use grubconf::executor::CommandExecutor;
use grubconf::GrubService;
use tempfile::TempDir;

pub const DEFAULT_GRUB: &str = r#"# If you change this file, run 'update-grub' afterwards to update
# /boot/grub/grub.cfg.

GRUB_DEFAULT=0
GRUB_TIMEOUT_STYLE=hidden
GRUB_TIMEOUT=5
GRUB_DISTRIBUTOR=`lsb_release -i -s 2> /dev/null || echo Debian`
GRUB_CMDLINE_LINUX_DEFAULT="quiet splash"
GRUB_CMDLINE_LINUX=""

# Uncomment to disable graphical terminal
#GRUB_TERMINAL=console
"#;

pub const GRUB_CFG: &str = "\
### BEGIN /etc/grub.d/10_linux ###
menuentry 'Ubuntu' --class ubuntu --class gnu-linux {
\trecordfail
\tlinux\t/boot/vmlinuz-6.8.0-45-generic root=UUID=abcd ro quiet splash
\tinitrd\t/boot/initrd.img-6.8.0-45-generic
}
submenu 'Advanced options for Ubuntu' {
\tmenuentry 'Ubuntu, with Linux 6.8.0-45-generic' --class ubuntu {
\t\tlinux\t/boot/vmlinuz-6.8.0-45-generic root=UUID=abcd ro quiet splash
\t}
\tmenuentry 'Ubuntu, with Linux 6.8.0-45-generic (recovery mode)' --class ubuntu {
\t\tlinux\t/boot/vmlinuz-6.8.0-45-generic root=UUID=abcd ro recovery nomodeset
\t}
}
### END /etc/grub.d/10_linux ###
### BEGIN /etc/grub.d/30_os-prober ###
menuentry 'Windows Boot Manager (on /dev/nvme0n1p1)' --class windows {
\tchainloader /EFI/Microsoft/Boot/bootmgfw.efi
}
### END /etc/grub.d/30_os-prober ###
";

/// Does privileged operations directly on the scratch filesystem.
#[derive(Default)]
pub struct FakeExecutor {
    pub fail_update: Cell<bool>,
    pub updates: Cell<usize>,
    pub commands: RefCell<Vec<String>>,
}

impl CommandExecutor for FakeExecutor {
    fn execute(&self, commands: &[String]) -> Result<(), CommandError> {
        self.commands.borrow_mut().extend_from_slice(commands);
        Ok(())
    }

    fn copy_file_privileged(&self, src: &Path, dst: &Path) -> Result<(), CommandError> {
        fs::copy(src, dst)?;
        Ok(())
    }

    fn make_executable(&self, path: &Path) -> Result<(), CommandError> {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
        Ok(())
    }

    fn remove_file_privileged(&self, path: &Path) -> Result<(), CommandError> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn create_dir_privileged(&self, path: &Path) -> Result<(), CommandError> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn update_grub(&self) -> Result<(), CommandError> {
        self.updates.set(self.updates.get() + 1);
        if self.fail_update.get() {
            return Err(CommandError::Failed {
                code: Some(1),
                stderr: "grub-mkconfig: syntax error at line 12".to_string(),
            });
        }
        Ok(())
    }
}

/// A fake root under /tmp with `/etc/default/grub` and a grub.cfg.
pub struct Sandbox {
    pub dir: TempDir,
    pub paths: GrubPaths,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir_in("/tmp").unwrap();
        let root = dir.path().to_path_buf();
        for sub in ["etc/default", "etc/grub.d", "etc/kernel/postinst.d", "boot/grub"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }

        let paths = GrubPaths {
            config: root.join("etc/default/grub"),
            backup_dir: root.join("backups"),
            grub_cfg_candidates: vec![root.join("boot/grub/grub.cfg"), root.join("boot/grub2/grub.cfg")],
            hidden_entries: root.join("etc/grub.d/hidden_entries.json"),
            hidden_entries_hook: root.join("etc/kernel/postinst.d/zz-grub-hide-entries"),
            color_script: root.join("etc/grub.d/05_grub_colors"),
            backgrounds_dir: root.join("boot/grub/backgrounds"),
            lock_file: Some(root.join("grubconf.lock")),
        };
        fs::write(&paths.config, DEFAULT_GRUB).unwrap();
        fs::write(&paths.grub_cfg_candidates[0], GRUB_CFG).unwrap();

        Sandbox { dir, paths }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn service(&self, executor: &Rc<FakeExecutor>) -> GrubService {
        let executor: Rc<dyn CommandExecutor> = executor.clone();
        GrubService::new(self.paths.clone(), executor)
    }

    pub fn loaded_service(&self, executor: &Rc<FakeExecutor>) -> GrubService {
        let mut service = self.service(executor);
        service.load().unwrap();
        service
    }

    pub fn config_text(&self) -> String {
        fs::read_to_string(&self.paths.config).unwrap()
    }

    pub fn grub_cfg(&self) -> PathBuf {
        self.paths.grub_cfg_candidates[0].clone()
    }

    pub fn grub_cfg_text(&self) -> String {
        fs::read_to_string(self.grub_cfg()).unwrap()
    }

    pub fn backup_count(&self) -> usize {
        match fs::read_dir(&self.paths.backup_dir) {
            Ok(dir) => dir.count(),
            Err(_) => 0,
        }
    }
}
