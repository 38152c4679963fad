use std::fs::{File, OpenOptions};
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

use crate::error::ServiceError;

/// Exclusive `flock` held for the duration of one apply. Dropping it
/// releases the lock.
pub struct ApplyLock {
    guard: Option<Flock<File>>,
}

impl ApplyLock {
    /// Fails with `ServiceError::Busy` if another process holds the lock.
    /// A lock file that cannot be opened (no `/run/lock`, read-only fs)
    /// degrades to running unguarded.
    pub fn acquire(path: &Path) -> Result<Self, ServiceError> {
        let file = match OpenOptions::new().create(true).truncate(false).write(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("cannot open lock file {}: {}; continuing without lock", path.display(), e);
                return Ok(Self { guard: None });
            }
        };

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!("apply lock acquired: {}", path.display());
                Ok(Self { guard: Some(lock) })
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(ServiceError::Busy(path.to_path_buf())),
            Err((_, errno)) => {
                warn!("flock on {} failed: {}; continuing without lock", path.display(), errno);
                Ok(Self { guard: None })
            }
        }
    }

    /// No-op guard for callers configured without a lock file.
    pub fn none() -> Self {
        Self { guard: None }
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}
