//! Process Lock File Module
//!
//! Prevents two sync daemons from opening the same queue database, which
//! would break single-flight delivery and sled's own locking.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// PID lock file held for the lifetime of the daemon.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".paraclate.lock";

    /// Acquire the lock for `data_dir`, creating the directory if needed.
    ///
    /// Fails if a live process already holds it. Stale locks are replaced.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);

        if lock_path.exists() {
            match Self::holder(&lock_path) {
                Some(pid) if pid != std::process::id() && Self::is_process_running(pid) => {
                    bail!(
                        "Another paraclate-sync instance is already using {} (PID: {})\n\
                         If no other instance is running, remove the stale lock file:\n  rm {}",
                        data_dir.display(),
                        pid,
                        lock_path.display()
                    );
                }
                _ => {
                    tracing::info!(path = %lock_path.display(), "Removing stale lock file");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
            }
        }

        let pid = std::process::id();
        fs::write(&lock_path, format!("{pid}\n"))
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        tracing::debug!(pid, path = %lock_path.display(), "Acquired process lock");

        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    /// PID recorded in an existing lock file, if readable.
    fn holder(lock_path: &Path) -> Option<u32> {
        fs::read_to_string(lock_path).ok()?.trim().parse().ok()
    }

    #[cfg(unix)]
    fn is_process_running(pid: u32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
    }

    #[cfg(not(unix))]
    fn is_process_running(_pid: u32) -> bool {
        true
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Release the lock (called automatically on drop)
    pub fn release(&mut self) {
        if self.owned {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                tracing::warn!(error = %e, "Failed to remove lock file");
            }
            self.owned = false;
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_written_and_released() {
        let temp_dir = tempdir().unwrap();
        let lock_path;
        {
            let lock = ProcessLock::acquire(temp_dir.path()).unwrap();
            lock_path = lock.path().to_path_buf();
            let pid: u32 = fs::read_to_string(&lock_path).unwrap().trim().parse().unwrap();
            assert_eq!(pid, std::process::id());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_stale_lock_replaced() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(ProcessLock::LOCK_FILE_NAME), "999999999\n").unwrap();

        let lock = ProcessLock::acquire(temp_dir.path()).unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn test_garbage_lock_replaced() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(ProcessLock::LOCK_FILE_NAME), "not a pid").unwrap();
        assert!(ProcessLock::acquire(temp_dir.path()).is_ok());
    }
}
