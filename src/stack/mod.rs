//! Stack management module
//!
//! This module implements the core stacked-branch functionality:
//! - The Stack Graph of tracked branches and their parents
//! - Batch planning for descendant ref moves
//! - The sync walk and its persisted state
//! - The manager that wraps every command in an Operation Record

pub mod branch;
pub mod graph;
pub mod manager;
pub mod plan;
pub mod sync;
pub mod sync_state;

pub use branch::{BranchNode, BranchStatus};
pub use graph::StackGraph;
pub use manager::{BranchView, StackManager, StackView, StatusReport, SyncSummary, UndoReport};
pub use plan::{plan_batch, BatchPlan, BranchUpdate, Replay};
pub use sync::{
    AbortReport, CancelToken, SyncOptions, SyncOrchestrator, SyncOutcome, SyncReport,
};
pub use sync_state::{BranchChange, Halt, HaltReason, SyncPhase, SyncState};
