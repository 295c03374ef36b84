//! Size-based rotation of `<program>.out`.
//!
//! The worker writes the log through a descriptor it inherited at launch,
//! opened in append mode, so the file can't be renamed away from under it.
//! Rotation copies the live file to `.1` and truncates it in place instead:
//!   `<name>.<max_files>` deleted
//!   `<name>.<n>` → `<name>.<n+1>` for n = max_files-1 … 1
//!   `<name>` copied to `<name>.1`, then truncated to zero.
//!
//! Lines written between the copy and the truncate are lost.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use steady_core::{InstanceIdentity, Settings};

use crate::paths::log_path;

/// Rotate `log` if it has grown to `max_bytes` or more.
///
/// Returns `true` if rotation happened. A missing log is not an error, and a
/// `max_bytes` of 0 turns rotation off.
pub fn rotate_if_needed(log: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    if max_bytes == 0 {
        return Ok(false);
    }
    let size = match fs::metadata(log) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    if max_files > 0 {
        let oldest = numbered_path(log, max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..max_files).rev() {
            let src = numbered_path(log, n);
            if src.exists() {
                fs::rename(&src, numbered_path(log, n + 1))?;
            }
        }
        fs::copy(log, numbered_path(log, 1))?;
    }

    fs::OpenOptions::new().write(true).open(log)?.set_len(0)?;
    Ok(true)
}

/// Rotate this program's log according to `settings`.
///
/// Failures are logged and otherwise ignored; rotation is retried on the
/// next tick.
pub fn rotate_log(identity: &InstanceIdentity, settings: &Settings) {
    let log = match log_path(identity) {
        Ok(path) => path,
        Err(err) => {
            tracing::debug!(error = %err, "no log path, skipping rotation");
            return;
        }
    };
    match rotate_if_needed(&log, settings.log_max_bytes, settings.log_max_files) {
        Ok(true) => tracing::info!(path = %log.display(), "log file rotated"),
        Ok(false) => {}
        Err(err) => tracing::warn!(path = %log.display(), error = %err, "log rotation failed"),
    }
}

/// Path of the `n`-th rotated copy, e.g. `worker.out.2`.
pub fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}
