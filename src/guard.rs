//! Safety Guard: keeps uncommitted work out of the way of mutating commands.

use crate::errors::{GsError, Result};
use crate::git::{StashPop, Vcs};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Uncommitted state saved before an operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeSnapshot {
    /// Whether the tree had changes when the operation started
    pub dirty: bool,
    /// Stash commit holding them
    pub stash: Option<String>,
}

impl WorktreeSnapshot {
    pub fn clean() -> Self {
        Self::default()
    }
}

pub struct SafetyGuard<'a, V: Vcs + ?Sized> {
    vcs: &'a V,
    auto_stash: bool,
}

impl<'a, V: Vcs + ?Sized> SafetyGuard<'a, V> {
    pub fn new(vcs: &'a V, auto_stash: bool) -> Self {
        Self { vcs, auto_stash }
    }

    /// Snapshot a dirty tree. Must run before the operation's first write.
    pub fn protect(&self, operation_id: &str) -> Result<WorktreeSnapshot> {
        if !self.vcs.is_dirty()? {
            return Ok(WorktreeSnapshot::clean());
        }
        if !self.auto_stash {
            return Err(GsError::dirty(
                "You have uncommitted changes. Commit or stash them, or enable `sync.auto_stash`",
            ));
        }

        let stash = self
            .vcs
            .stash_save(&format!("ghoststack: before operation {operation_id}"))?;
        info!("Saved uncommitted changes as {}", stash);

        if self.vcs.is_dirty()? {
            // Put back what we took rather than run on a half-cleaned tree
            if let Err(e) = self.vcs.stash_pop(&stash) {
                warn!("Could not reapply snapshot {}: {}", stash, e);
            }
            return Err(GsError::dirty(
                "Working tree is still dirty after saving a snapshot",
            ));
        }

        Ok(WorktreeSnapshot {
            dirty: true,
            stash: Some(stash),
        })
    }

    /// Reapply a snapshot taken by [`SafetyGuard::protect`]
    pub fn restore(&self, snapshot: &WorktreeSnapshot, operation_id: &str) -> Result<()> {
        let Some(stash) = &snapshot.stash else {
            return Ok(());
        };

        match self.vcs.stash_pop(stash)? {
            StashPop::Restored => {
                info!("Restored uncommitted changes from {}", stash);
                Ok(())
            }
            StashPop::Conflict { files } => Err(GsError::RestoreConflict {
                branch: self
                    .vcs
                    .current_branch()?
                    .unwrap_or_else(|| "HEAD".to_string()),
                operation_id: operation_id.to_string(),
                stash: stash.clone(),
                files,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitRepository;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(repo_path: &Path, args: &[&str]) {
        Command::new("git")
            .args(args)
            .current_dir(repo_path)
            .output()
            .unwrap();
    }

    fn create_test_repo() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path();
        git(path, &["init"]);
        git(path, &["config", "user.name", "Test"]);
        git(path, &["config", "user.email", "test@test.com"]);
        git(path, &["config", "commit.gpgsign", "false"]);
        std::fs::write(path.join("README.md"), "# Test").unwrap();
        git(path, &["add", "."]);
        git(path, &["commit", "-m", "Initial commit"]);
        temp_dir
    }

    #[test]
    fn test_clean_tree_needs_no_snapshot() {
        let temp_dir = create_test_repo();
        let repo = GitRepository::open(temp_dir.path()).unwrap();

        let snapshot = SafetyGuard::new(&repo, true).protect("op").unwrap();
        assert_eq!(snapshot, WorktreeSnapshot::clean());
        SafetyGuard::new(&repo, true).restore(&snapshot, "op").unwrap();
    }

    #[test]
    fn test_dirty_tree_round_trip() {
        let temp_dir = create_test_repo();
        std::fs::write(temp_dir.path().join("README.md"), "# Edited").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "draft").unwrap();
        let repo = GitRepository::open(temp_dir.path()).unwrap();
        let guard = SafetyGuard::new(&repo, true);

        let snapshot = guard.protect("op").unwrap();
        assert!(snapshot.dirty);
        assert!(snapshot.stash.is_some());
        assert!(!repo.is_dirty().unwrap());

        guard.restore(&snapshot, "op").unwrap();
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("notes.txt")).unwrap(),
            "draft"
        );
    }

    #[test]
    fn test_dirty_tree_refused_without_auto_stash() {
        let temp_dir = create_test_repo();
        std::fs::write(temp_dir.path().join("README.md"), "# Edited").unwrap();
        let repo = GitRepository::open(temp_dir.path()).unwrap();

        let result = SafetyGuard::new(&repo, false).protect("op");
        assert!(matches!(result, Err(GsError::DirtyTreeUnsafe(_))));
        assert!(repo.is_dirty().unwrap());
    }
}
