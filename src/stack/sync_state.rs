use super::plan::{BatchPlan, BranchUpdate};
use crate::errors::{GsError, Result};
use crate::git::RebaseProgress;
use crate::guard::WorktreeSnapshot;
use crate::oplog::StateSnapshot;
use crate::store::{MetadataStore, SYNC_STATE_FILE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Where an in-progress sync stands. No state file means idle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Syncing,
    Conflicted,
    Aborting,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    Conflict,
    Timeout,
    Cancelled,
}

/// Why and where a walk stopped
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    pub branch: String,
    pub reason: HaltReason,
    /// Parent tip the branch was being replayed onto
    pub onto: Option<String>,
    pub files: Vec<String>,
    /// Present when a conflict waits in the working tree
    pub progress: Option<RebaseProgress>,
}

/// A branch whose tip moved during the walk
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BranchChange {
    pub branch: String,
    pub old_tip: String,
    pub new_tip: String,
}

/// State for an in-progress sync operation
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SyncState {
    /// Operation that started the walk
    pub operation_id: Uuid,
    pub phase: SyncPhase,
    /// Branch user was on before sync started
    pub original_branch: Option<String>,
    /// Every branch to visit, chain by chain
    pub walk: Vec<String>,
    /// Index into `walk` of the branch being processed
    pub position: usize,
    /// Nodes and ref tips of every walked branch before the walk
    pub pre_walk: StateSnapshot,
    /// Branches whose refs the walk has moved
    pub touched: BTreeSet<String>,
    /// Batch written ahead of being applied
    pub pending: Option<BatchPlan>,
    pub halt: Option<Halt>,
    pub changes: Vec<BranchChange>,
    /// Uncommitted changes saved before the walk, restored when it ends
    pub parked: WorktreeSnapshot,
    pub started_at: DateTime<Utc>,
}

impl SyncState {
    pub fn new(
        operation_id: Uuid,
        walk: Vec<String>,
        pre_walk: StateSnapshot,
        parked: WorktreeSnapshot,
    ) -> Self {
        Self {
            operation_id,
            phase: SyncPhase::Syncing,
            original_branch: pre_walk.head.clone(),
            walk,
            position: 0,
            pre_walk,
            touched: BTreeSet::new(),
            pending: None,
            halt: None,
            changes: Vec::new(),
            parked,
            started_at: Utc::now(),
        }
    }

    /// Branch the walk is on (or stopped at)
    pub fn current_branch(&self) -> Option<&str> {
        self.halt
            .as_ref()
            .map(|halt| halt.branch.as_str())
            .or_else(|| self.walk.get(self.position).map(String::as_str))
    }

    /// Remember a branch move, keeping the tip it had before the walk
    pub fn record_change(&mut self, update: &BranchUpdate) {
        self.touched.insert(update.branch.clone());
        if update.old_tip == update.new_tip {
            return;
        }
        match self.changes.iter_mut().find(|c| c.branch == update.branch) {
            Some(change) => change.new_tip = update.new_tip.clone(),
            None => self.changes.push(BranchChange {
                branch: update.branch.clone(),
                old_tip: update.old_tip.clone(),
                new_tip: update.new_tip.clone(),
            }),
        }
    }

    /// Error for commands that cannot run while this sync is paused
    pub fn in_progress_error(&self) -> GsError {
        GsError::SyncInProgress {
            operation_id: self.operation_id.to_string(),
            branch: self.current_branch().unwrap_or("-").to_string(),
        }
    }

    /// Save sync state to disk
    pub fn save(&self, store: &MetadataStore) -> Result<()> {
        store.write_json(SYNC_STATE_FILE, self)?;
        tracing::debug!("Saved sync state ({:?}, position {})", self.phase, self.position);
        Ok(())
    }

    /// Load sync state from disk
    pub fn load(store: &MetadataStore) -> Result<Self> {
        Self::load_existing(store)?.ok_or(GsError::NoSyncInProgress)
    }

    pub fn load_existing(store: &MetadataStore) -> Result<Option<Self>> {
        store.read_json(SYNC_STATE_FILE)
    }

    /// Delete sync state file
    pub fn delete(store: &MetadataStore) -> Result<()> {
        store.remove(SYNC_STATE_FILE)?;
        tracing::debug!("Deleted sync state file");
        Ok(())
    }

    /// Check if sync state exists
    pub fn exists(store: &MetadataStore) -> bool {
        store.exists(SYNC_STATE_FILE)
    }
}
