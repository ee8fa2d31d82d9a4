use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, Instant};

/// Poll cadence while another process holds the lock. Staging is a copy
/// plus a rename, so contention clears quickly.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Exclusive advisory lock held across launcher staging.
///
/// Several executors can decide to stage at the same moment; only one
/// may replace the binary while the others wait and then observe the
/// fresh copy. Released when dropped.
pub struct StageLock {
    _file: File,
}

impl StageLock {
    pub fn acquire(lock_path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create staging lock directory: {parent:?}")
            })?;
        }

        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open staging lock: {lock_path:?}"))?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { _file: file }),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(anyhow!(
                            "Another process held the staging lock past {:?}: {lock_path:?}",
                            timeout
                        ));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("Failed to lock staging lock: {lock_path:?}"))
                }
            }
        }
    }
}
