//! Sync Orchestrator: rebases every chain onto its parent's current tip.
//!
//! The walk is a persisted state machine (see [`SyncState`]). Refs only
//! move when a whole batch is applied, and every batch is written into the
//! state file before it is applied, so a crash or an abandoned step never
//! leaves a half-moved stack behind.

use super::branch::BranchStatus;
use super::graph::StackGraph;
use super::plan::{plan_batch, BatchPlan, Replay};
use super::sync_state::{BranchChange, Halt, HaltReason, SyncPhase, SyncState};
use crate::errors::{GsError, Result};
use crate::git::{RebaseOutcome, RefUpdate, Vcs};
use crate::guard::WorktreeSnapshot;
use crate::oplog::StateSnapshot;
use crate::review::{ImpactHint, ImpactReviewer, RewriteEvent};
use crate::store::MetadataStore;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared flag asking a running walk to stop at the next step boundary
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Abandon a single branch replay after this long
    pub step_timeout: Option<Duration>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed,
    Halted(Halt),
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub operation_id: Uuid,
    pub outcome: SyncOutcome,
    pub changes: Vec<BranchChange>,
    pub hints: Vec<ImpactHint>,
    /// Snapshot parked for the walk, handed back once it is over
    #[serde(skip)]
    pub released: Option<WorktreeSnapshot>,
}

impl SyncReport {
    pub fn is_completed(&self) -> bool {
        self.outcome == SyncOutcome::Completed
    }

    pub fn halt(&self) -> Option<&Halt> {
        match &self.outcome {
            SyncOutcome::Halted(halt) => Some(halt),
            SyncOutcome::Completed => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AbortReport {
    pub operation_id: Uuid,
    /// Branches whose refs went back to their pre-walk tips
    pub restored: Vec<String>,
    #[serde(skip)]
    pub released: WorktreeSnapshot,
}

pub struct SyncOrchestrator<'a, V: Vcs + ?Sized> {
    vcs: &'a V,
    store: &'a MetadataStore,
    reviewer: &'a dyn ImpactReviewer,
    options: SyncOptions,
}

impl<'a, V: Vcs + ?Sized> SyncOrchestrator<'a, V> {
    pub fn new(
        vcs: &'a V,
        store: &'a MetadataStore,
        reviewer: &'a dyn ImpactReviewer,
        options: SyncOptions,
    ) -> Self {
        Self {
            vcs,
            store,
            reviewer,
            options,
        }
    }

    /// Branches a fresh sync visits, chain by chain, trunk side first
    pub fn plan_walk(graph: &StackGraph) -> Vec<String> {
        graph.walk_order().into_iter().flatten().collect()
    }

    /// Start a new walk. `pre_walk` must cover every branch in
    /// [`SyncOrchestrator::plan_walk`].
    pub fn start(
        &self,
        operation_id: Uuid,
        pre_walk: StateSnapshot,
        parked: WorktreeSnapshot,
    ) -> Result<SyncReport> {
        if let Some(existing) = SyncState::load_existing(self.store)? {
            return Err(existing.in_progress_error());
        }

        let graph = StackGraph::load(self.store)?;
        let walk = Self::plan_walk(&graph);
        info!("Syncing {} branch(es) onto '{}'", walk.len(), graph.trunk);

        let state = SyncState::new(operation_id, walk, pre_walk, parked);
        state.save(self.store)?;
        self.run(state, graph)
    }

    /// Finish the halted branch, then carry on with the walk
    pub fn resume(&self) -> Result<SyncReport> {
        let mut state = SyncState::load(self.store)?;
        if state.phase == SyncPhase::Aborting {
            return Err(GsError::validation(
                "An abort was interrupted; run `gs stack sync --abort` to finish it",
            ));
        }
        let mut graph = StackGraph::load(self.store)?;

        if let Some(plan) = state.pending.take() {
            info!("Re-applying interrupted batch of {} branch(es)", plan.updates.len());
            self.apply_batch(&mut state, &mut graph, &plan)?;
            state.position += 1;
            state.save(self.store)?;
        }

        match state.halt.clone() {
            Some(Halt {
                branch,
                reason: HaltReason::Conflict,
                onto: Some(onto),
                progress: Some(progress),
                ..
            }) => {
                let old_tip = self.branch_tip(&graph, &branch)?;
                info!("Continuing '{}' after conflict resolution", branch);

                match self.vcs.continue_rebase(&progress, self.deadline())? {
                    RebaseOutcome::Applied { new_tip, rewritten } => {
                        state.halt = None;
                        state.phase = SyncPhase::Syncing;
                        self.commit_step(
                            &mut state,
                            &mut graph,
                            &Replay {
                                branch: &branch,
                                onto: &onto,
                                old_tip: &old_tip,
                                new_tip: &new_tip,
                                rewritten: &rewritten,
                            },
                        )?;
                    }
                    RebaseOutcome::Conflict(info) => {
                        return self.halt(
                            state,
                            Halt {
                                branch,
                                reason: HaltReason::Conflict,
                                onto: Some(onto),
                                files: info.files,
                                progress: Some(info.progress),
                            },
                        );
                    }
                    RebaseOutcome::TimedOut => {
                        warn!("Continuing '{}' exceeded the step timeout", branch);
                        // The branch restarts from scratch next time
                        self.vcs.abort_rebase()?;
                        return self.halt(
                            state,
                            Halt {
                                branch,
                                reason: HaltReason::Timeout,
                                onto: Some(onto),
                                files: Vec::new(),
                                progress: None,
                            },
                        );
                    }
                }
            }
            Some(halt) => {
                // Replays run in memory, but a new conflict would overwrite the tree
                if self.vcs.is_dirty()? {
                    return Err(GsError::dirty(
                        "Commit or stash your changes before continuing the sync",
                    ));
                }
                debug!("Retrying '{}' from scratch", halt.branch);
                state.halt = None;
            }
            None => {}
        }

        state.phase = SyncPhase::Syncing;
        state.save(self.store)?;
        self.run(state, graph)
    }

    /// Roll every branch the walk touched back to its pre-walk state.
    /// Safe to repeat after an interruption.
    pub fn abort(&self) -> Result<AbortReport> {
        let mut state = SyncState::load(self.store)?;
        state.phase = SyncPhase::Aborting;
        state.save(self.store)?;

        let conflict_waiting = matches!(
            &state.halt,
            Some(Halt {
                reason: HaltReason::Conflict,
                ..
            })
        );
        if conflict_waiting || self.vcs.is_rebase_in_progress() {
            self.vcs.abort_rebase()?;
        }

        // A write-ahead batch may have moved refs before `touched` caught up
        let mut restore_set = state.touched.clone();
        if let Some(plan) = &state.pending {
            restore_set.extend(plan.branches().map(str::to_string));
        }

        let updates: Vec<RefUpdate> = restore_set
            .iter()
            .map(|branch| {
                match state
                    .pre_walk
                    .branches
                    .get(branch)
                    .and_then(|before| before.ref_tip.clone())
                {
                    Some(tip) => RefUpdate::set(branch.clone(), tip),
                    None => RefUpdate::delete(branch.clone()),
                }
            })
            .collect();
        self.vcs.update_refs(&updates)?;

        let mut graph = StackGraph::load(self.store)?;
        for (name, before) in &state.pre_walk.branches {
            graph.restore_node(name, before.node.clone());
        }
        graph.save(self.store)?;

        self.return_to_original(&state)?;
        SyncState::delete(self.store)?;

        let restored: Vec<String> = restore_set.into_iter().collect();
        info!("Sync aborted; restored {} branch(es)", restored.len());
        Ok(AbortReport {
            operation_id: state.operation_id,
            restored,
            released: state.parked,
        })
    }

    fn run(&self, mut state: SyncState, mut graph: StackGraph) -> Result<SyncReport> {
        while state.position < state.walk.len() {
            let branch = state.walk[state.position].clone();

            // Requests made mid-step are honored here, once the step is done
            if self.options.cancel.is_cancelled() {
                info!("Sync cancelled before '{}'", branch);
                self.mark_conflicted(&mut graph, &branch)?;
                return self.halt(
                    state,
                    Halt {
                        branch,
                        reason: HaltReason::Cancelled,
                        onto: None,
                        files: Vec::new(),
                        progress: None,
                    },
                );
            }

            let node = match graph.get(&branch) {
                Some(node) if !node.is_orphaned() => node.clone(),
                _ => {
                    warn!("'{}' left the stack during the sync; skipping", branch);
                    state.position += 1;
                    continue;
                }
            };

            let parent_tip = self.branch_tip(&graph, &node.parent)?;
            let tip = self.branch_tip(&graph, &branch)?;

            if node.base == parent_tip {
                if node.tip != tip || node.status != BranchStatus::Clean {
                    if let Some(stored) = graph.get_mut(&branch) {
                        stored.rebased(parent_tip.clone(), tip.clone());
                    }
                    graph.save(self.store)?;
                }
                debug!("'{}' is already on top of '{}'", branch, node.parent);
                state.position += 1;
                state.save(self.store)?;
                continue;
            }

            info!("Rebasing '{}' onto '{}'", branch, node.parent);
            match self
                .vcs
                .rebase(&parent_tip, &node.base, &tip, self.deadline())?
            {
                RebaseOutcome::Applied { new_tip, rewritten } => {
                    self.commit_step(
                        &mut state,
                        &mut graph,
                        &Replay {
                            branch: &branch,
                            onto: &parent_tip,
                            old_tip: &tip,
                            new_tip: &new_tip,
                            rewritten: &rewritten,
                        },
                    )?;
                }
                RebaseOutcome::Conflict(info) => {
                    self.mark_conflicted(&mut graph, &branch)?;
                    return self.halt(
                        state,
                        Halt {
                            branch,
                            reason: HaltReason::Conflict,
                            onto: Some(parent_tip),
                            files: info.files,
                            progress: Some(info.progress),
                        },
                    );
                }
                RebaseOutcome::TimedOut => {
                    warn!("Rebasing '{}' exceeded the step timeout", branch);
                    self.mark_conflicted(&mut graph, &branch)?;
                    return self.halt(
                        state,
                        Halt {
                            branch,
                            reason: HaltReason::Timeout,
                            onto: Some(parent_tip),
                            files: Vec::new(),
                            progress: None,
                        },
                    );
                }
            }
        }

        self.complete(state)
    }

    /// Plan, write ahead, apply, then advance past the branch
    fn commit_step(
        &self,
        state: &mut SyncState,
        graph: &mut StackGraph,
        replay: &Replay<'_>,
    ) -> Result<()> {
        let refs = self.vcs.list_refs()?;
        let plan = plan_batch(graph, &refs, replay);

        state.pending = Some(plan.clone());
        state.save(self.store)?;

        self.apply_batch(state, graph, &plan)?;

        state.pending = None;
        state.position += 1;
        state.save(self.store)
    }

    /// Move every ref in the batch in one transaction, then record the
    /// new bases and tips in one graph replace. Idempotent.
    fn apply_batch(
        &self,
        state: &mut SyncState,
        graph: &mut StackGraph,
        plan: &BatchPlan,
    ) -> Result<()> {
        let updates: Vec<RefUpdate> = plan
            .updates
            .iter()
            .map(|update| RefUpdate::set(&update.branch, &update.new_tip))
            .collect();
        self.vcs.update_refs(&updates)?;

        for update in &plan.updates {
            if let Some(node) = graph.get_mut(&update.branch) {
                node.rebased(update.new_base.clone(), update.new_tip.clone());
            }
            state.record_change(update);
        }
        graph.save(self.store)?;

        debug!(
            "Applied batch: {}",
            plan.branches().collect::<Vec<_>>().join(", ")
        );
        Ok(())
    }

    fn halt(&self, mut state: SyncState, halt: Halt) -> Result<SyncReport> {
        state.phase = SyncPhase::Conflicted;
        state.halt = Some(halt.clone());
        state.save(self.store)?;

        Ok(SyncReport {
            operation_id: state.operation_id,
            outcome: SyncOutcome::Halted(halt),
            changes: state.changes,
            hints: Vec::new(),
            released: None,
        })
    }

    fn complete(&self, state: SyncState) -> Result<SyncReport> {
        self.return_to_original(&state)?;

        let events = self.rewrite_events(&state.changes)?;
        let hints = if events.is_empty() {
            Vec::new()
        } else {
            self.reviewer.review(&events)
        };

        SyncState::delete(self.store)?;
        info!("Sync complete; {} branch(es) rewritten", state.changes.len());

        Ok(SyncReport {
            operation_id: state.operation_id,
            outcome: SyncOutcome::Completed,
            changes: state.changes,
            hints,
            released: Some(state.parked),
        })
    }

    fn return_to_original(&self, state: &SyncState) -> Result<()> {
        let Some(original) = &state.original_branch else {
            return Ok(());
        };
        if self.vcs.branch_tip(original)?.is_none() {
            warn!("Original branch '{}' no longer exists", original);
            return Ok(());
        }

        let elsewhere = self.vcs.current_branch()?.as_deref() != Some(original.as_str());
        if elsewhere || self.vcs.is_rebase_in_progress() {
            self.vcs.checkout(original, true)?;
        }
        Ok(())
    }

    fn rewrite_events(&self, changes: &[BranchChange]) -> Result<Vec<RewriteEvent>> {
        changes
            .iter()
            .map(|change| {
                Ok(RewriteEvent {
                    branch: change.branch.clone(),
                    old_commit: change.old_tip.clone(),
                    new_commit: change.new_tip.clone(),
                    changed_files: self.vcs.changed_files(&change.old_tip, &change.new_tip)?,
                })
            })
            .collect()
    }

    fn mark_conflicted(&self, graph: &mut StackGraph, branch: &str) -> Result<()> {
        if let Some(node) = graph.get_mut(branch) {
            node.set_status(BranchStatus::Conflicted);
        }
        graph.save(self.store)
    }

    /// Live ref tip; tracked branches fall back to the recorded tip
    fn branch_tip(&self, graph: &StackGraph, name: &str) -> Result<String> {
        if let Some(tip) = self.vcs.branch_tip(name)? {
            return Ok(tip);
        }
        match graph.get(name) {
            Some(node) => Ok(node.tip.clone()),
            None => Err(GsError::validation(format!(
                "Branch '{name}' does not exist"
            ))),
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.options.step_timeout.map(|timeout| Instant::now() + timeout)
    }
}
