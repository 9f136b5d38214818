//! The repository-private metadata directory.
//!
//! Everything ghoststack persists lives under `<git-common-dir>/ghoststack/`,
//! next to Git's own bookkeeping and outside tracked history. A
//! [`MetadataStore`] is opened once per command and handed to every
//! component that reads or writes there.

use crate::errors::{GsError, Result};
use crate::git::GitRepository;
use crate::utils::atomic_file;
use crate::utils::file_locking::FileLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const STORE_DIR: &str = "ghoststack";
pub const CONFIG_FILE: &str = "config.json";
pub const STACK_FILE: &str = "stack.json";
pub const OPLOG_FILE: &str = "oplog.jsonl";
pub const SYNC_STATE_FILE: &str = "sync_state.json";
pub const LOCK_FILE: &str = "ghoststack.lock";

#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    /// Store for the repository's common git directory, shared by all worktrees
    pub fn for_repository(repo: &GitRepository) -> Self {
        Self::at(repo.common_dir().join(STORE_DIR))
    }

    pub fn at<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// Initialized once `gs init` has written the stack graph
    pub fn is_initialized(&self) -> bool {
        self.path(STACK_FILE).exists()
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(GsError::not_initialized(
                "Repository is not initialized for ghoststack. Run `gs init` first.",
            ))
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            GsError::config(format!(
                "Failed to create metadata directory {}: {e}",
                self.root.display()
            ))
        })
    }

    /// Take the repository lock for a mutating command. Never waits.
    pub fn lock(&self) -> Result<FileLock> {
        self.create()?;
        FileLock::try_acquire(&self.path(LOCK_FILE))
    }

    pub fn exists(&self, file: &str) -> bool {
        self.path(file).exists()
    }

    /// Read a JSON document; `None` if the file does not exist
    pub fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>> {
        let path = self.path(file);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_str(&content).map_err(|e| {
            GsError::config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        Ok(Some(value))
    }

    /// Replace a JSON document atomically
    pub fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        self.create()?;
        atomic_file::write_json(&self.path(file), value)
    }

    pub fn append_line(&self, file: &str, line: &str) -> Result<()> {
        self.create()?;
        atomic_file::append_line(&self.path(file), line)
    }

    pub fn remove(&self, file: &str) -> Result<()> {
        match fs::remove_file(self.path(file)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_document_reads_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::at(tmp.path().join(STORE_DIR));

        let value: Option<Vec<String>> = store.read_json(STACK_FILE).unwrap();
        assert!(value.is_none());
        assert!(!store.is_initialized());
        assert!(matches!(
            store.ensure_initialized(),
            Err(GsError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_write_then_read_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::at(tmp.path().join(STORE_DIR));

        store.write_json(STACK_FILE, &vec![1, 2, 3]).unwrap();
        let value: Option<Vec<i32>> = store.read_json(STACK_FILE).unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
        assert!(store.is_initialized());

        store.remove(STACK_FILE).unwrap();
        store.remove(STACK_FILE).unwrap();
        assert!(!store.exists(STACK_FILE));
    }

    #[test]
    fn test_store_lives_in_common_git_dir() {
        let tmp = TempDir::new().unwrap();
        git2::Repository::init(tmp.path()).unwrap();
        let repo = GitRepository::open(tmp.path()).unwrap();

        let store = MetadataStore::for_repository(&repo);
        assert!(store.root().ends_with(".git/ghoststack"));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::at(tmp.path().join(STORE_DIR));

        let _held = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(GsError::LockBusy(_))));
    }
}
