//! Privileged command execution.
//!
//! Every write outside the user's home goes through a [`CommandExecutor`]:
//! the commands are written to a `set -e` bash script and run once, either
//! directly as root or through `pkexec`.

use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::config::COMMAND_TIMEOUT;
use crate::error::CommandError;
use crate::security::{shell_quote, validate_line};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

const UPDATE_GRUB_SCRIPT: &[&str] = &[
    "if command -v update-grub >/dev/null 2>&1; then",
    "  update-grub",
    "elif command -v grub-mkconfig >/dev/null 2>&1 && [ -d /boot/grub ]; then",
    "  grub-mkconfig -o /boot/grub/grub.cfg",
    "elif command -v grub2-mkconfig >/dev/null 2>&1; then",
    "  grub2-mkconfig -o /boot/grub2/grub.cfg",
    "else",
    "  echo 'no GRUB update command found (update-grub, grub-mkconfig, grub2-mkconfig)' >&2",
    "  exit 1",
    "fi",
];

pub trait CommandExecutor {
    /// Runs `commands` as one script; the first failing line aborts it.
    fn execute(&self, commands: &[String]) -> Result<(), CommandError>;

    fn copy_file_privileged(&self, src: &Path, dst: &Path) -> Result<(), CommandError> {
        self.execute(&[format!(
            "cp {} {}",
            shell_quote(&src.to_string_lossy()),
            shell_quote(&dst.to_string_lossy())
        )])
    }

    fn write_file_privileged(&self, dst: &Path, content: &str) -> Result<(), CommandError> {
        self.write_bytes_privileged(dst, content.as_bytes())
    }

    fn write_bytes_privileged(&self, dst: &Path, content: &[u8]) -> Result<(), CommandError> {
        let mut tmp = tempfile::Builder::new().prefix("grubconf-").tempfile()?;
        tmp.write_all(content)?;
        tmp.flush()?;
        self.copy_file_privileged(tmp.path(), dst)
    }

    fn make_executable(&self, path: &Path) -> Result<(), CommandError> {
        self.execute(&[format!("chmod +x {}", shell_quote(&path.to_string_lossy()))])
    }

    fn remove_file_privileged(&self, path: &Path) -> Result<(), CommandError> {
        self.execute(&[format!("rm -f {}", shell_quote(&path.to_string_lossy()))])
    }

    fn create_dir_privileged(&self, path: &Path) -> Result<(), CommandError> {
        self.execute(&[format!("mkdir -p {}", shell_quote(&path.to_string_lossy()))])
    }

    /// Regenerates grub.cfg with whichever of `update-grub`,
    /// `grub-mkconfig` or `grub2-mkconfig` is installed.
    fn update_grub(&self) -> Result<(), CommandError> {
        let script: Vec<String> = UPDATE_GRUB_SCRIPT.iter().map(|s| s.to_string()).collect();
        self.execute(&script)
    }
}

/// Runs scripts for real, elevating through `pkexec` when not root.
#[derive(Debug, Clone)]
pub struct SecureCommandExecutor {
    timeout: Duration,
}

impl Default for SecureCommandExecutor {
    fn default() -> Self {
        Self {
            timeout: COMMAND_TIMEOUT,
        }
    }
}

impl SecureCommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build_script(commands: &[String]) -> Result<String, CommandError> {
        let mut script = String::from("#!/bin/bash\nset -e\n");
        for cmd in commands {
            script.push_str(validate_line(cmd)?);
            script.push('\n');
        }
        Ok(script)
    }
}

impl CommandExecutor for SecureCommandExecutor {
    fn execute(&self, commands: &[String]) -> Result<(), CommandError> {
        let script = Self::build_script(commands)?;

        let mut file = tempfile::Builder::new()
            .prefix("grubconf-")
            .suffix(".sh")
            .tempfile()?;
        file.write_all(script.as_bytes())?;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o700))?;
        // Closed before exec, or the kernel reports ETXTBSY.
        let script_path = file.into_temp_path();

        let mut cmd = if nix::unistd::geteuid().is_root() {
            Command::new("/bin/bash")
        } else {
            let mut c = Command::new("pkexec");
            c.arg("/bin/bash");
            c
        };
        cmd.arg(&script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!("running privileged script with {} command(s)", commands.len());
        let mut child = cmd.spawn().map_err(CommandError::Spawn)?;

        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                error!("privileged script timed out after {:?}", self.timeout);
                return Err(CommandError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if status.success() {
            info!("privileged script completed");
            Ok(())
        } else {
            error!("privileged script failed: {}", stderr.trim());
            Err(CommandError::Failed {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}
