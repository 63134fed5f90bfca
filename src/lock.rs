//! Advisory file locks shared between ddev processes.
//!
//! Lock order when several are needed: `<approot>/.ddev/start.lock`, then
//! `<user-config>/router.lock`, then `<user-config>/.global_config.lock`.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An exclusive lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Take the lock without waiting. `Ok(None)` when another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Option<FileLock>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Filesystem(format!("Cannot create '{}': {}", parent.display(), e))
            })?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                Error::Filesystem(format!("Failed to open lock file '{}': {}", path.display(), e))
            })?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                // PID is for diagnostics only.
                let _ = file.set_len(0);
                let _ = writeln!(file, "{}", std::process::id());
                let _ = file.flush();
                debug!("Acquired lock {}", path.display());
                Ok(Some(FileLock {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || is_contended(&e) => Ok(None),
            Err(e) => Err(Error::Filesystem(format!(
                "Cannot lock '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    /// Poll for the lock until `timeout` elapses or `cancel` fires.
    pub async fn acquire(
        path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<FileLock> {
        let started = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if started.elapsed() >= timeout {
                return Err(Error::LockContended {
                    path: path.to_path_buf(),
                    holder_pid: holder_pid(path),
                    waited: started.elapsed(),
                });
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Block the current thread until the lock is free.
    pub fn acquire_blocking(path: &Path) -> Result<FileLock> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Filesystem(format!("Cannot create '{}': {}", parent.display(), e))
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                Error::Filesystem(format!("Failed to open lock file '{}': {}", path.display(), e))
            })?;
        file.lock_exclusive()
            .map_err(|e| Error::Filesystem(format!("Cannot lock '{}': {}", path.display(), e)))?;
        Ok(FileLock {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// PID recorded by the current holder, if readable.
pub fn holder_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_holder_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("start.lock");
        let first = FileLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        assert!(FileLock::try_acquire(&path).unwrap().is_none());
        assert_eq!(holder_pid(&path), Some(std::process::id()));
        drop(first);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn acquire_times_out_with_lock_contended() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("router.lock");
        let _held = FileLock::try_acquire(&path).unwrap().unwrap();
        let err = FileLock::acquire(&path, Duration::from_millis(250), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::LockContended { holder_pid, .. } => {
                assert_eq!(holder_pid, Some(std::process::id()))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn acquire_observes_cancellation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("router.lock");
        let _held = FileLock::try_acquire(&path).unwrap().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = FileLock::acquire(&path, Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("start.lock");
        let held = FileLock::try_acquire(&path).unwrap().unwrap();
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(held);
        });
        let lock = FileLock::acquire(&path, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(lock.path(), path.as_path());
        releaser.await.unwrap();
    }
}
