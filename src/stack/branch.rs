use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a tracked branch stands relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchStatus {
    /// Base matches the parent's tip
    Clean,
    /// Parent moved since the branch was last rebased
    NeedsRestack,
    /// A sync stopped on this branch
    Conflicted,
    /// Parent was removed from the stack
    Orphaned,
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BranchStatus::Clean => "clean",
            BranchStatus::NeedsRestack => "needs-restack",
            BranchStatus::Conflicted => "conflicted",
            BranchStatus::Orphaned => "orphaned",
        };
        f.write_str(label)
    }
}

/// A tracked branch in the stack graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchNode {
    /// Branch name, also its key in the graph
    pub name: String,
    /// Parent branch name (trunk or another tracked branch)
    pub parent: String,
    /// Commit the branch's own commits start from
    pub base: String,
    /// Last known tip commit
    pub tip: String,
    /// Stored status; `needs-restack` is also derived on read
    pub status: BranchStatus,
    /// When this branch was added to the stack
    pub created_at: DateTime<Utc>,
    /// When this node last changed
    pub updated_at: DateTime<Utc>,
}

impl BranchNode {
    pub fn new(name: String, parent: String, base: String, tip: String) -> Self {
        let now = Utc::now();
        Self {
            name,
            parent,
            base,
            tip,
            status: BranchStatus::Clean,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_orphaned(&self) -> bool {
        self.status == BranchStatus::Orphaned
    }

    pub fn set_status(&mut self, status: BranchStatus) {
        if self.status != status {
            self.status = status;
            self.updated_at = Utc::now();
        }
    }

    /// Record a completed rebase onto `base`
    pub fn rebased(&mut self, base: String, tip: String) {
        self.base = base;
        self.tip = tip;
        self.status = BranchStatus::Clean;
        self.updated_at = Utc::now();
    }
}
