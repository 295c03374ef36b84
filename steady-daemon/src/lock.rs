//! Exclusive instance lock.
//!
//! The worker holds an `flock` on `<program>.lock` for as long as it lives.
//! Taking the lock is atomic, which closes the window the peer query leaves
//! open when two launches race. The lock is released by the kernel when the
//! holder exits, so a crashed worker never leaves a stale lock behind.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use steady_core::ProcessId;

use crate::error::{io_err, DaemonError};
use crate::paths::LOCK_POLL_INTERVAL;

const LOCK_FILE_MODE: u32 = 0o600;

/// Diagnostic content of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub started_at: String,
}

/// A held instance lock. Dropping it releases the lock.
pub struct InstanceLock {
    path: PathBuf,
    _file: Flock<File>,
}

impl fmt::Debug for InstanceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl InstanceLock {
    /// Take the lock without waiting.
    ///
    /// Fails with [`DaemonError::AlreadyRunning`] when another process holds it.
    pub fn try_acquire(path: &Path, pid: ProcessId) -> Result<Self, DaemonError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(LOCK_FILE_MODE)
            .open(path)
            .map_err(|e| io_err(path, e))?;

        let locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(DaemonError::AlreadyRunning {
                    path: path.to_path_buf(),
                    holder: Self::read_record(path).ok().map(|record| record.pid),
                });
            }
            Err((_, errno)) => return Err(io_err(path, std::io::Error::from(errno))),
        };

        let record = LockRecord {
            pid: pid.0,
            started_at: chrono::Utc::now().to_rfc3339(),
        };
        let content = serde_json::to_string(&record)?;
        let mut handle: &File = &locked;
        handle.set_len(0).map_err(|e| io_err(path, e))?;
        handle
            .write_all(content.as_bytes())
            .and_then(|()| handle.sync_all())
            .map_err(|e| io_err(path, e))?;

        tracing::debug!(path = %path.display(), pid = %pid, "instance lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            _file: locked,
        })
    }

    /// Take the lock, polling while another process holds it.
    ///
    /// A `-graceful` replacement uses this: the old primary keeps the lock
    /// until it has finished shutting down.
    pub fn acquire_waiting(
        path: &Path,
        pid: ProcessId,
        wait: Duration,
    ) -> Result<Self, DaemonError> {
        let deadline = Instant::now() + wait;
        loop {
            match Self::try_acquire(path, pid) {
                Err(DaemonError::AlreadyRunning { holder, .. }) if Instant::now() < deadline => {
                    tracing::debug!(holder = ?holder, "waiting for previous primary to release lock");
                    sleep(LOCK_POLL_INTERVAL);
                }
                Err(DaemonError::AlreadyRunning { .. }) => {
                    return Err(DaemonError::LockTimeout {
                        path: path.to_path_buf(),
                        waited_secs: wait.as_secs(),
                    });
                }
                other => return other,
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record written by the current (or last) holder.
    pub fn read_record(path: &Path) -> Result<LockRecord, DaemonError> {
        let content = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_is_refused_and_names_holder() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("worker.lock");

        let held = InstanceLock::try_acquire(&path, ProcessId(4821)).expect("first acquire");
        let err = InstanceLock::try_acquire(&path, ProcessId(4822)).unwrap_err();
        match &err {
            DaemonError::AlreadyRunning { holder, .. } => assert_eq!(*holder, Some(4821)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("pid 4821"), "got: {err}");
        assert_eq!(held.path(), path.as_path());
    }

    #[test]
    fn dropping_the_lock_releases_it() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("worker.lock");

        drop(InstanceLock::try_acquire(&path, ProcessId(1)).expect("first acquire"));
        let again = InstanceLock::try_acquire(&path, ProcessId(2)).expect("reacquire");
        drop(again);
        assert!(path.exists(), "lock file stays on disk");
    }

    #[test]
    fn record_describes_the_holder() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("worker.lock");

        let _held = InstanceLock::try_acquire(&path, ProcessId(77)).expect("acquire");
        let record = InstanceLock::read_record(&path).expect("record");
        assert_eq!(record.pid, 77);
        assert!(chrono::DateTime::parse_from_rfc3339(&record.started_at).is_ok());
    }

    #[test]
    fn waiting_acquire_times_out_while_held() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("worker.lock");

        let _held = InstanceLock::try_acquire(&path, ProcessId(1)).expect("acquire");
        let err = InstanceLock::acquire_waiting(&path, ProcessId(2), Duration::from_millis(250))
            .unwrap_err();
        assert!(matches!(err, DaemonError::LockTimeout { .. }), "got: {err}");
    }

    #[test]
    fn waiting_acquire_succeeds_once_released() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("worker.lock");

        let held = InstanceLock::try_acquire(&path, ProcessId(1)).expect("acquire");
        let releaser = std::thread::spawn(move || {
            sleep(Duration::from_millis(200));
            drop(held);
        });

        let lock = InstanceLock::acquire_waiting(&path, ProcessId(2), Duration::from_secs(5))
            .expect("acquire after release");
        releaser.join().expect("releaser thread");
        assert_eq!(InstanceLock::read_record(lock.path()).unwrap().pid, 2);
    }
}
