//! Capability interface over the underlying version-control system.
//!
//! The stack engine only talks to history through [`Vcs`]. Any backend
//! offering these primitives can drive it; [`super::GitRepository`] is the
//! libgit2 implementation.

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Where an interrupted replay stands, persisted so a later
/// `sync --continue` can pick it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseProgress {
    /// Tip the remaining commits get replayed onto
    pub onto: String,
    /// Commit whose replay stopped on a conflict
    pub conflicted_commit: String,
    /// Commits still to replay after the conflicted one, oldest first
    pub remaining: Vec<String>,
    /// Old commit -> replayed commit, in replay order
    pub rewritten: Vec<(String, String)>,
}

/// A conflict left in the working tree for the user to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub files: Vec<String>,
    pub progress: RebaseProgress,
}

/// Result of replaying a commit range onto a new base
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    Applied {
        new_tip: String,
        rewritten: Vec<(String, String)>,
    },
    Conflict(ConflictInfo),
    /// The deadline passed before the range finished; nothing was kept
    TimedOut,
}

/// Result of reapplying a working-tree snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StashPop {
    Restored,
    Conflict { files: Vec<String> },
}

/// One branch marker move inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefUpdate {
    pub branch: String,
    /// `None` deletes the branch
    pub new_tip: Option<String>,
}

impl RefUpdate {
    pub fn set<B: Into<String>, T: Into<String>>(branch: B, tip: T) -> Self {
        Self {
            branch: branch.into(),
            new_tip: Some(tip.into()),
        }
    }

    pub fn delete<B: Into<String>>(branch: B) -> Self {
        Self {
            branch: branch.into(),
            new_tip: None,
        }
    }
}

pub trait Vcs {
    /// Whether the working tree or index has changes, untracked files included
    fn is_dirty(&self) -> Result<bool>;

    /// Checked-out branch, `None` for a detached HEAD
    fn current_branch(&self) -> Result<Option<String>>;

    /// Every local branch and its tip
    fn list_refs(&self) -> Result<BTreeMap<String, String>>;

    fn branch_tip(&self, name: &str) -> Result<Option<String>>;

    fn create_branch(&self, name: &str, at: &str) -> Result<()>;

    fn delete_branch(&self, name: &str) -> Result<()>;

    /// Switch to a branch. `force` discards index and working-tree state.
    fn checkout(&self, name: &str, force: bool) -> Result<()>;

    fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>>;

    /// Replay the commits reachable from `tip` but not from `base` onto `onto`.
    ///
    /// No branch ref moves; the caller applies the returned tip. On conflict
    /// the conflicted commit is left applied in the working tree on a
    /// detached HEAD.
    fn rebase(
        &self,
        onto: &str,
        base: &str,
        tip: &str,
        deadline: Option<Instant>,
    ) -> Result<RebaseOutcome>;

    /// Commit the staged resolution of `progress.conflicted_commit` and
    /// replay the rest of the range.
    fn continue_rebase(
        &self,
        progress: &RebaseProgress,
        deadline: Option<Instant>,
    ) -> Result<RebaseOutcome>;

    /// Drop any in-progress conflict state from the index and working tree
    fn abort_rebase(&self) -> Result<()>;

    /// Whether a conflicted replay is waiting in the working tree
    fn is_rebase_in_progress(&self) -> bool;

    /// Move several branch markers as one atomic step
    fn update_refs(&self, updates: &[RefUpdate]) -> Result<()>;

    /// Save uncommitted changes, untracked files included; returns the stash ref
    fn stash_save(&self, message: &str) -> Result<String>;

    /// Reapply and drop a stash. On conflict the stash is kept.
    fn stash_pop(&self, stash_ref: &str) -> Result<StashPop>;

    /// Paths that differ between two commits
    fn changed_files(&self, old: &str, new: &str) -> Result<Vec<String>>;
}
