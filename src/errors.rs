use std::fmt;

/// Process exit codes for the `gs` binary
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    /// Environmental failure (VCS, filesystem)
    pub const FAILURE: i32 = 1;
    /// The user asked for something invalid
    pub const USER_ERROR: i32 = 2;
    /// A rebase or snapshot restore is waiting on manual resolution
    pub const CONFLICT: i32 = 3;
    /// Another mutating command holds the repository lock
    pub const LOCK_BUSY: i32 = 4;
    /// Undo refused because history moved on
    pub const NOT_REVERSIBLE: i32 = 5;
}

/// Stack topology violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("invalid parent '{parent}' for '{name}': {reason}")]
    InvalidParent {
        name: String,
        parent: String,
        reason: String,
    },

    #[error("branch '{0}' is already tracked")]
    DuplicateName(String),

    #[error("branch '{0}' is not tracked")]
    Untracked(String),

    #[error("branch '{0}' is orphaned; prune it with `gs stack prune {0}`")]
    Orphaned(String),

    #[error("branch '{0}' is not orphaned; remove it with `gs stack remove {0}` first")]
    NotOrphaned(String),

    #[error("stack graph is corrupt: {0}")]
    Corrupt(String),
}

/// GhostStack Error Types
#[derive(Debug, thiserror::Error)]
pub enum GsError {
    /// Cycle, duplicate, or missing parent
    #[error("Invalid topology: {0}")]
    InvalidTopology(#[from] TopologyError),

    /// A mutating command would touch a dirty tree without a snapshot
    #[error("Unsafe working tree: {0}")]
    DirtyTreeUnsafe(String),

    /// A rebase step stopped on a conflict
    #[error(
        "Sync halted on branch '{branch}' (operation {operation_id}){}\n\
         Resolve the conflicts, stage them with `git add`, then run `gs stack sync --continue`, \
         or run `gs stack sync --abort` to roll the stack back",
        FileList(.files)
    )]
    RebaseConflict {
        branch: String,
        operation_id: String,
        files: Vec<String>,
    },

    /// Reapplying the working-tree snapshot conflicted
    #[error(
        "Could not restore your uncommitted changes on '{branch}' (operation {operation_id}){}\n\
         The snapshot is kept as stash {stash}; resolve the conflicts and drop it with `git stash drop` \
         once your changes are back",
        FileList(.files)
    )]
    RestoreConflict {
        branch: String,
        operation_id: String,
        stash: String,
        files: Vec<String>,
    },

    /// Another mutating command is running
    #[error("Repository is busy: another ghoststack command holds {0}")]
    LockBusy(String),

    /// Undo would clobber changes made after the operation
    #[error("Operation {operation_id} cannot be undone: {reason}")]
    NotReversible {
        operation_id: String,
        reason: String,
    },

    /// The version-control adapter failed
    #[error("Git {primitive} failed: {message}")]
    AdapterFailure {
        primitive: &'static str,
        message: String,
    },

    /// A sync is paused and must be continued or aborted first
    #[error(
        "A sync is in progress (operation {operation_id}, stopped at '{branch}')\n\
         Run `gs stack sync --continue` or `gs stack sync --abort`"
    )]
    SyncInProgress {
        operation_id: String,
        branch: String,
    },

    #[error("No sync in progress; nothing to continue or abort")]
    NoSyncInProgress,

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

struct FileList<'a>(&'a [String]);

impl fmt::Display for FileList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        write!(f, "\nConflicted files: {}", self.0.join(", "))
    }
}

impl GsError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GsError::Config(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        GsError::Validation(msg.into())
    }

    pub fn not_initialized<S: Into<String>>(msg: S) -> Self {
        GsError::NotInitialized(msg.into())
    }

    pub fn dirty<S: Into<String>>(msg: S) -> Self {
        GsError::DirtyTreeUnsafe(msg.into())
    }

    /// Wrap a git2 failure, naming the adapter primitive that failed
    pub fn adapter(primitive: &'static str, err: git2::Error) -> Self {
        GsError::AdapterFailure {
            primitive,
            message: err.message().to_string(),
        }
    }

    /// Adapter failure that did not originate in libgit2
    pub fn adapter_msg<S: Into<String>>(primitive: &'static str, msg: S) -> Self {
        GsError::AdapterFailure {
            primitive,
            message: msg.into(),
        }
    }

    pub fn not_reversible<S: Into<String>>(operation_id: impl fmt::Display, reason: S) -> Self {
        GsError::NotReversible {
            operation_id: operation_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Exit code the CLI reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            GsError::RebaseConflict { .. } | GsError::RestoreConflict { .. } => {
                exit_code::CONFLICT
            }
            GsError::LockBusy(_) => exit_code::LOCK_BUSY,
            GsError::NotReversible { .. } => exit_code::NOT_REVERSIBLE,
            GsError::AdapterFailure { .. } | GsError::Io(_) | GsError::Json(_) => {
                exit_code::FAILURE
            }
            GsError::InvalidTopology(_)
            | GsError::DirtyTreeUnsafe(_)
            | GsError::SyncInProgress { .. }
            | GsError::NoSyncInProgress
            | GsError::OperationNotFound(_)
            | GsError::NotInitialized(_)
            | GsError::Config(_)
            | GsError::Validation(_) => exit_code::USER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, GsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        let conflict = GsError::RebaseConflict {
            branch: "a".into(),
            operation_id: "op".into(),
            files: vec![],
        };
        let busy = GsError::LockBusy("lock".into());
        let ambiguous = GsError::not_reversible("op", "tip moved");
        let user = GsError::from(TopologyError::DuplicateName("a".into()));
        let env = GsError::adapter_msg("rebase", "boom");

        assert_eq!(conflict.exit_code(), exit_code::CONFLICT);
        assert_eq!(busy.exit_code(), exit_code::LOCK_BUSY);
        assert_eq!(ambiguous.exit_code(), exit_code::NOT_REVERSIBLE);
        assert_eq!(user.exit_code(), exit_code::USER_ERROR);
        assert_eq!(env.exit_code(), exit_code::FAILURE);
    }

    #[test]
    fn test_conflict_message_names_branch_operation_and_next_step() {
        let err = GsError::RebaseConflict {
            branch: "feature/a".into(),
            operation_id: "1234".into(),
            files: vec!["conflict.txt".into()],
        };
        let message = err.to_string();
        assert!(message.contains("feature/a"));
        assert!(message.contains("1234"));
        assert!(message.contains("--continue"));
        assert!(message.contains("--abort"));
        assert!(message.contains("conflict.txt"));
    }

    #[test]
    fn test_adapter_failure_names_primitive() {
        let err = GsError::adapter_msg("stash_pop", "index locked");
        assert_eq!(err.to_string(), "Git stash_pop failed: index locked");
    }
}
