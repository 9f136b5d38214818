use crate::errors::Result;
use crate::git::Vcs;
use crate::guard::WorktreeSnapshot;
use crate::stack::{BranchNode, StackGraph};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// What a mutating command did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    AddBranch { name: String },
    RemoveBranch { name: String },
    Prune { name: String },
    Sync,
    SyncContinue,
    SyncAbort,
    Undo { target: Uuid },
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::AddBranch { name } => write!(f, "stack add {name}"),
            OperationKind::RemoveBranch { name } => write!(f, "stack remove {name}"),
            OperationKind::Prune { name } => write!(f, "stack prune {name}"),
            OperationKind::Sync => f.write_str("stack sync"),
            OperationKind::SyncContinue => f.write_str("stack sync --continue"),
            OperationKind::SyncAbort => f.write_str("stack sync --abort"),
            OperationKind::Undo { target } => write!(f, "undo {target}"),
        }
    }
}

/// Terminal status of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationResult {
    Success,
    /// Halted on `branch`; resumable with `sync --continue`
    Conflict { branch: String },
    Aborted,
    Failed { error: String },
    /// Finished, but the working-tree snapshot did not reapply cleanly
    RestoreConflict { stash: String },
    /// Never finalized; closed by a later command
    Interrupted,
}

impl OperationResult {
    /// Whether the recorded post-state is trustworthy enough to reverse
    pub fn is_reversible(&self) -> bool {
        matches!(
            self,
            OperationResult::Success | OperationResult::RestoreConflict { .. }
        )
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationResult::Success => f.write_str("success"),
            OperationResult::Conflict { branch } => write!(f, "conflict on {branch}"),
            OperationResult::Aborted => f.write_str("aborted"),
            OperationResult::Failed { error } => write!(f, "failed: {error}"),
            OperationResult::RestoreConflict { stash } => {
                write!(f, "done, snapshot kept as {stash}")
            }
            OperationResult::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// One branch as captured in a [`StateSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchState {
    /// Tracked node, `None` when untracked
    pub node: Option<BranchNode>,
    /// Git ref tip, `None` when the branch does not exist
    pub ref_tip: Option<String>,
}

impl BranchState {
    /// Tip as the conservative undo rule compares it
    pub fn tips(&self) -> (Option<&str>, Option<&str>) {
        (
            self.ref_tip.as_deref(),
            self.node.as_ref().map(|n| n.tip.as_str()),
        )
    }
}

/// Checked-out branch plus the captured state of a set of branches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub head: Option<String>,
    pub branches: BTreeMap<String, BranchState>,
}

impl StateSnapshot {
    pub fn capture<V: Vcs + ?Sized>(
        vcs: &V,
        graph: &StackGraph,
        branches: &[String],
    ) -> Result<Self> {
        let mut captured = BTreeMap::new();
        for name in branches {
            captured.insert(
                name.clone(),
                BranchState {
                    node: graph.get(name).cloned(),
                    ref_tip: vcs.branch_tip(name)?,
                },
            );
        }
        Ok(Self {
            head: vcs.current_branch()?,
            branches: captured,
        })
    }
}

/// Written when an operation starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginEntry {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub kind: OperationKind,
    pub affected: Vec<String>,
    pub pre: StateSnapshot,
    /// Working-tree snapshot taken before the first side effect
    pub snapshot: WorktreeSnapshot,
}

/// Written when an operation reaches a terminal status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishEntry {
    pub id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub result: OperationResult,
    /// `None` only for interrupted operations
    pub post: Option<StateSnapshot>,
}

/// One line of `oplog.jsonl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEntry {
    Begin(BeginEntry),
    Finish(FinishEntry),
}

/// A begin entry joined with its finish entry, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRecord {
    #[serde(flatten)]
    pub begin: BeginEntry,
    pub finish: Option<FinishEntry>,
}

impl OperationRecord {
    pub fn id(&self) -> Uuid {
        self.begin.id
    }

    pub fn is_finished(&self) -> bool {
        self.finish.is_some()
    }

    pub fn result(&self) -> Option<&OperationResult> {
        self.finish.as_ref().map(|f| &f.result)
    }

    pub fn post(&self) -> Option<&StateSnapshot> {
        self.finish.as_ref().and_then(|f| f.post.as_ref())
    }
}
