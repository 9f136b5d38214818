//! Hook for reviewing what a sync rewrote.
//!
//! After a sync completes, every rewritten branch is reported as one
//! [`RewriteEvent`]. A reviewer may rank the touched files and hand back
//! hints for display. Ranking itself lives outside this crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteEvent {
    pub branch: String,
    pub old_commit: String,
    pub new_commit: String,
    pub changed_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactHint {
    pub path: String,
    /// Higher is more likely to need attention
    pub score: f32,
    pub reason: String,
}

pub trait ImpactReviewer {
    fn review(&self, events: &[RewriteEvent]) -> Vec<ImpactHint>;
}

/// Reviewer that never has anything to say
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReviewer;

impl ImpactReviewer for NoopReviewer {
    fn review(&self, _events: &[RewriteEvent]) -> Vec<ImpactHint> {
        Vec::new()
    }
}
