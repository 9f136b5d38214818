//! Undo Log: an append-only journal of every mutating operation.
//!
//! Each operation writes a `begin` line (kind, affected branches, pre-state,
//! working-tree snapshot) and later exactly one `finish` line (terminal
//! result, post-state). Reversal compares the post-state with the live
//! repository and refuses when anything has moved on.

pub mod journal;
pub mod record;
pub mod undo;

pub use journal::Journal;
pub use record::{
    BeginEntry, BranchState, FinishEntry, JournalEntry, OperationKind, OperationRecord,
    OperationResult, StateSnapshot,
};
pub use undo::{apply_undo, plan_undo, UndoPlan};
