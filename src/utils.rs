use crate::errors::{GsError, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Spinner helpers for long-running commands
pub mod spinner;

/// Atomic file operations to prevent corruption during writes
pub mod atomic_file {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    /// Replace a JSON file atomically using a temporary file + rename strategy
    pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(data)?;
        write_string(path, &content)
    }

    /// Replace a file atomically using a temporary file + rename strategy
    pub fn write_string(path: &Path, content: &str) -> Result<()> {
        // Create temporary file in the same directory as the target
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .map_err(|e| GsError::config(format!("Failed to write temporary file: {e}")))?;
        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| GsError::config(format!("Failed to write temporary file: {e}")))?;
        drop(file);

        atomic_rename(&temp_path, path)
    }

    /// Append one line to a file with a single write, then flush it to disk.
    ///
    /// The line must not contain a newline; one is added.
    pub fn append_line(path: &Path, line: &str) -> Result<()> {
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| GsError::config(format!("Failed to open {}: {e}", path.display())))?;
        file.write_all(record.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| GsError::config(format!("Failed to append to {}: {e}", path.display())))?;
        Ok(())
    }

    /// Platform-specific atomic rename operation
    #[cfg(windows)]
    fn atomic_rename(temp_path: &Path, final_path: &Path) -> Result<()> {
        const MAX_RETRIES: u32 = 3;
        const RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

        let mut attempt = 1;
        loop {
            match fs::rename(temp_path, final_path) {
                Ok(()) => return Ok(()),
                Err(e) if attempt == MAX_RETRIES => {
                    let _ = fs::remove_file(temp_path);
                    return Err(GsError::config(format!(
                        "Failed to finalize file write after {MAX_RETRIES} attempts on Windows: {e}"
                    )));
                }
                Err(_) => {
                    // Transient sharing violations from scanners and indexers
                    std::thread::sleep(RETRY_DELAY);
                    attempt += 1;
                }
            }
        }
    }

    #[cfg(not(windows))]
    fn atomic_rename(temp_path: &Path, final_path: &Path) -> Result<()> {
        fs::rename(temp_path, final_path)
            .map_err(|e| GsError::config(format!("Failed to finalize file write: {e}")))?;
        Ok(())
    }
}

/// Async utilities to prevent blocking operations
pub mod async_ops {
    use super::*;
    use tokio::task;

    /// Run a potentially blocking Git operation in a background thread
    pub async fn run_git_operation<F, R>(operation: F) -> Result<R>
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        task::spawn_blocking(operation)
            .await
            .map_err(|e| GsError::config(format!("Background task failed: {e}")))?
    }
}

/// Repository-level advisory locking
pub mod file_locking {
    use super::*;
    use fs2::FileExt;
    use std::fs::{File, OpenOptions};
    use std::io::Write;
    use std::path::PathBuf;

    /// An exclusive advisory lock held for the lifetime of the value.
    ///
    /// The OS releases the lock if the process dies, so a crashed command
    /// never leaves the repository wedged.
    #[derive(Debug)]
    pub struct FileLock {
        file: File,
        lock_path: PathBuf,
    }

    impl FileLock {
        /// Try to acquire the lock immediately; never waits.
        pub fn try_acquire(lock_path: &Path) -> Result<Self> {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(lock_path)
                .map_err(|e| {
                    GsError::config(format!("Failed to open lock file {lock_path:?}: {e}"))
                })?;

            if file.try_lock_exclusive().is_err() {
                return Err(GsError::LockBusy(lock_path.display().to_string()));
            }

            // Holder pid is informational only
            let _ = file.set_len(0);
            let _ = writeln!(file, "{}", std::process::id());

            tracing::debug!("Acquired repository lock {:?}", lock_path);
            Ok(Self {
                file,
                lock_path: lock_path.to_path_buf(),
            })
        }

        pub fn path(&self) -> &Path {
            &self.lock_path
        }
    }

    impl Drop for FileLock {
        fn drop(&mut self) {
            let _ = self.file.set_len(0);
            let _ = FileExt::unlock(&self.file);
            tracing::debug!("Released repository lock {:?}", self.lock_path);
        }
    }
}
