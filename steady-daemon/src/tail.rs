//! `-tail`: print the worker log and keep following it.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use notify::{recommended_watcher, Event, RecursiveMode, Watcher};

use crate::error::{io_err, DaemonError};
use crate::paths::TAIL_POLL_INTERVAL;

/// Follower the process turns into, so `-tail` never shows up as a peer.
const TAIL_PROGRAM: &str = "tail";

/// Replace this process with `tail -n +1 -F <path>`.
///
/// A follower left running under this program's name would be counted as a
/// running instance by `-reload` and signalled by `-stop`. Only returns on
/// failure; callers fall back to [`follow`] unless the log is missing.
pub fn exec_tail(path: &Path) -> DaemonError {
    if !path.is_file() {
        return DaemonError::LogNotFound {
            path: path.to_path_buf(),
        };
    }
    let err = Command::new(TAIL_PROGRAM).args(["-n", "+1", "-F"]).arg(path).exec();
    io_err(TAIL_PROGRAM, err)
}

/// Copy `path` to `out`, then keep copying whatever is appended until `stop`
/// is set.
///
/// File events wake the loop early; without them it still polls every
/// [`TAIL_POLL_INTERVAL`]. When the file shrinks below what was already read
/// it was truncated by rotation, and reading restarts from the top.
pub fn follow(path: &Path, out: &mut impl Write, stop: &AtomicBool) -> Result<(), DaemonError> {
    if !path.is_file() {
        return Err(DaemonError::LogNotFound {
            path: path.to_path_buf(),
        });
    }

    let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;

    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut offset = 0u64;
    loop {
        offset = drain(&mut file, offset, out).map_err(|e| io_err(path, e))?;
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        match event_rx.recv_timeout(TAIL_POLL_INTERVAL) {
            Ok(Err(err)) => tracing::debug!(error = %err, "log watch event error"),
            Ok(Ok(_)) | Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

/// Write everything past `offset` to `out` and return the new offset.
fn drain(file: &mut File, offset: u64, out: &mut impl Write) -> io::Result<u64> {
    let len = file.metadata()?.len();
    let start = if len < offset { 0 } else { offset };
    if len == start {
        return Ok(start);
    }

    file.seek(SeekFrom::Start(start))?;
    let copied = io::copy(&mut (&mut *file).take(len - start), out)?;
    out.flush()?;
    Ok(start + copied)
}

#[cfg(test)]
mod tests {
    use std::fs::{self, OpenOptions};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn wait_for(buf: &SharedBuf, expected: &str) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while buf.text() != expected && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(25));
        }
        assert_eq!(buf.text(), expected);
    }

    #[test]
    fn missing_log_is_an_error() {
        let dir = TempDir::new().unwrap();
        let stop = AtomicBool::new(false);
        let err = follow(&dir.path().join("worker.out"), &mut Vec::<u8>::new(), &stop).unwrap_err();
        assert!(matches!(err, DaemonError::LogNotFound { .. }), "got: {err}");
    }

    #[test]
    fn exec_refuses_missing_log_without_replacing_the_process() {
        let dir = TempDir::new().unwrap();
        let err = exec_tail(&dir.path().join("worker.out"));
        assert!(matches!(err, DaemonError::LogNotFound { .. }), "got: {err}");
    }

    #[test]
    fn prints_existing_content_and_appends() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("worker.out");
        fs::write(&log, "first\n").unwrap();

        let buf = SharedBuf::default();
        let stop = Arc::new(AtomicBool::new(false));
        let follower = {
            let (log, mut buf, stop) = (log.clone(), buf.clone(), stop.clone());
            thread::spawn(move || follow(&log, &mut buf, &stop))
        };

        wait_for(&buf, "first\n");
        let mut writer = OpenOptions::new().append(true).open(&log).unwrap();
        writer.write_all(b"second\n").unwrap();
        wait_for(&buf, "first\nsecond\n");

        stop.store(true, Ordering::Relaxed);
        follower.join().unwrap().unwrap();
    }

    #[test]
    fn restarts_after_truncation() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("worker.out");
        fs::write(&log, "old line that is long\n").unwrap();

        let buf = SharedBuf::default();
        let stop = Arc::new(AtomicBool::new(false));
        let follower = {
            let (log, mut buf, stop) = (log.clone(), buf.clone(), stop.clone());
            thread::spawn(move || follow(&log, &mut buf, &stop))
        };

        wait_for(&buf, "old line that is long\n");
        let writer = OpenOptions::new().write(true).open(&log).unwrap();
        writer.set_len(0).unwrap();
        thread::sleep(TAIL_POLL_INTERVAL * 2);
        fs::write(&log, "new\n").unwrap();
        wait_for(&buf, "old line that is long\nnew\n");

        stop.store(true, Ordering::Relaxed);
        follower.join().unwrap().unwrap();
    }

    #[test]
    fn drain_reads_from_offset() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("worker.out");
        fs::write(&log, "abcdef").unwrap();

        let mut file = File::open(&log).unwrap();
        let mut out = Vec::new();
        assert_eq!(drain(&mut file, 2, &mut out).unwrap(), 6);
        assert_eq!(out, b"cdef");
        assert_eq!(drain(&mut file, 6, &mut out).unwrap(), 6);
        assert_eq!(drain(&mut file, 10, &mut out).unwrap(), 6);
        assert_eq!(out, b"cdefabcdef");
    }
}
