use super::branch::{BranchNode, BranchStatus};
use super::graph::StackGraph;
use super::sync::{AbortReport, SyncOptions, SyncOrchestrator, SyncOutcome, SyncReport};
use super::sync_state::{HaltReason, SyncPhase, SyncState};
use crate::config::{self, Settings};
use crate::errors::{GsError, Result};
use crate::git::{GitRepository, Vcs};
use crate::guard::{SafetyGuard, WorktreeSnapshot};
use crate::oplog::{
    apply_undo, plan_undo, BeginEntry, Journal, OperationKind, OperationRecord, OperationResult,
    StateSnapshot,
};
use crate::review::{ImpactReviewer, NoopReviewer};
use crate::store::MetadataStore;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// A tracked branch as shown by `stack list` and `status`
#[derive(Debug, Clone, Serialize)]
pub struct BranchView {
    pub name: String,
    pub parent: String,
    pub base: String,
    pub tip: String,
    /// Stored status with `needs-restack` derived from the live parent tip
    pub status: BranchStatus,
    /// Position in its chain, 1 for branches directly on trunk
    pub depth: usize,
    pub current: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackView {
    pub trunk: String,
    pub chains: Vec<Vec<BranchView>>,
    pub orphans: Vec<BranchView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub operation_id: Uuid,
    pub phase: SyncPhase,
    pub branch: Option<String>,
    pub reason: Option<HaltReason>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub current_branch: Option<String>,
    pub dirty: bool,
    pub stack: StackView,
    pub sync: Option<SyncSummary>,
    /// Operations that started but never finished
    pub interrupted: Vec<OperationRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UndoReport {
    pub operation_id: Uuid,
    pub target: Uuid,
    pub kind: OperationKind,
    pub restored: Vec<String>,
}

/// Context handed to a mutation once its record is open
struct OpContext {
    id: Uuid,
    snapshot: WorktreeSnapshot,
    pre: StateSnapshot,
}

/// What a mutation produced, and which snapshot to reapply afterwards
struct Finished<T> {
    value: T,
    result: OperationResult,
    restore: Option<WorktreeSnapshot>,
}

/// Entry point for every stack command.
///
/// Mutations run as: repository lock, Safety Guard snapshot, `begin`
/// record, the action itself, `finish` record, snapshot restore.
pub struct StackManager<V: Vcs = GitRepository> {
    vcs: V,
    store: MetadataStore,
    settings: Settings,
    reviewer: Box<dyn ImpactReviewer + Send>,
}

impl StackManager<GitRepository> {
    /// Manager for `repo` with layered settings
    pub fn from_repository(repo: GitRepository) -> Result<Self> {
        let store = MetadataStore::for_repository(&repo);
        let settings = config::load(Some(&store))?;
        Ok(Self::new(repo, store, settings))
    }
}

impl<V: Vcs> StackManager<V> {
    pub fn new(vcs: V, store: MetadataStore, settings: Settings) -> Self {
        Self {
            vcs,
            store,
            settings,
            reviewer: Box::new(NoopReviewer),
        }
    }

    pub fn with_reviewer(mut self, reviewer: Box<dyn ImpactReviewer + Send>) -> Self {
        self.reviewer = reviewer;
        self
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Sync options from settings; a cancel token is added by the caller
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            step_timeout: self.settings.sync.step_timeout_secs.map(Duration::from_secs),
            ..SyncOptions::default()
        }
    }

    /// Create the metadata store and an empty stack on `trunk`
    pub fn init(&self, trunk: Option<&str>, force: bool) -> Result<StackGraph> {
        let _lock = self.store.lock()?;

        let trunk = match trunk {
            Some(trunk) => trunk.to_string(),
            None => self.detect_trunk()?,
        };
        if self.vcs.branch_tip(&trunk)?.is_none() {
            return Err(GsError::validation(format!(
                "Trunk branch '{trunk}' does not exist; create it (or make a first commit) before `gs init`"
            )));
        }

        let graph = if self.store.is_initialized() {
            if !force {
                return Err(GsError::validation(
                    "Repository is already initialized. Use --force to reinitialize",
                ));
            }
            if let Some(state) = SyncState::load_existing(&self.store)? {
                return Err(state.in_progress_error());
            }
            let mut graph = StackGraph::load(&self.store)?;
            if graph.trunk != trunk {
                if !graph.branches.is_empty() {
                    return Err(GsError::validation(format!(
                        "Branches are still tracked on '{}'; remove them before changing trunk",
                        graph.trunk
                    )));
                }
                graph.trunk = trunk.clone();
            }
            graph
        } else {
            StackGraph::new(trunk.clone())
        };

        self.store.create()?;
        graph.save(&self.store)?;

        let mut repo_settings = config::load_repo_file(&self.store)?;
        repo_settings.trunk = Some(trunk.clone());
        config::save_repo_file(&self.store, &repo_settings)?;

        info!("Initialized ghoststack with trunk '{}'", trunk);
        Ok(graph)
    }

    fn detect_trunk(&self) -> Result<String> {
        if let Some(trunk) = &self.settings.trunk {
            return Ok(trunk.clone());
        }
        if let Some(current) = self.vcs.current_branch()? {
            return Ok(current);
        }
        for candidate in ["main", "master"] {
            if self.vcs.branch_tip(candidate)?.is_some() {
                return Ok(candidate.to_string());
            }
        }
        Err(GsError::validation(
            "Could not determine a trunk branch; pass --trunk",
        ))
    }

    /// Track `name` on top of `parent` (default: the current branch).
    /// An existing branch is adopted; otherwise it is created at the
    /// parent's tip.
    pub fn add_branch(
        &self,
        name: &str,
        parent: Option<&str>,
        checkout: Option<bool>,
    ) -> Result<BranchNode> {
        let _lock = self.store.lock()?;
        self.store.ensure_initialized()?;
        self.ensure_no_sync()?;

        if !git2::Branch::name_is_valid(name).unwrap_or(false) {
            return Err(GsError::validation(format!(
                "'{name}' is not a valid branch name"
            )));
        }

        let graph = StackGraph::load(&self.store)?;
        let parent = match parent {
            Some(parent) => parent.to_string(),
            None => self
                .vcs
                .current_branch()?
                .unwrap_or_else(|| graph.trunk.clone()),
        };
        graph.check_add(name, &parent)?;
        let parent_tip = self.tip_of(&graph, &parent)?;

        let existing = self.vcs.branch_tip(name)?;
        let base = match &existing {
            Some(tip) => self.vcs.merge_base(&parent_tip, tip)?.ok_or_else(|| {
                GsError::validation(format!(
                    "'{name}' shares no history with '{parent}'"
                ))
            })?,
            None => parent_tip.clone(),
        };
        let checkout = checkout.unwrap_or(self.settings.stack.checkout_on_add);

        let affected = vec![name.to_string()];
        self.record_operation(
            OperationKind::AddBranch {
                name: name.to_string(),
            },
            &affected,
            None,
            true,
            |ctx| {
                let tip = match existing {
                    Some(tip) => tip,
                    None => {
                        self.vcs.create_branch(name, &parent_tip)?;
                        parent_tip.clone()
                    }
                };

                let node = BranchNode::new(name.to_string(), parent.clone(), base, tip);
                let mut graph = StackGraph::load(&self.store)?;
                graph.add(node.clone())?;
                graph.save(&self.store)?;

                if checkout {
                    self.vcs.checkout(name, false)?;
                }

                info!("Added '{}' on top of '{}'", name, parent);
                Ok(Finished {
                    value: node,
                    result: OperationResult::Success,
                    restore: Some(ctx.snapshot.clone()),
                })
            },
        )
    }

    /// Stop tracking `name`; returns the descendants that became orphaned.
    /// The git branch itself is kept.
    pub fn remove_branch(&self, name: &str) -> Result<Vec<String>> {
        let _lock = self.store.lock()?;
        self.store.ensure_initialized()?;
        self.ensure_no_sync()?;

        let graph = StackGraph::load(&self.store)?;
        if !graph.contains(name) {
            return Err(crate::errors::TopologyError::Untracked(name.to_string()).into());
        }
        let mut affected = vec![name.to_string()];
        affected.extend(graph.descendants(name));

        self.record_operation(
            OperationKind::RemoveBranch {
                name: name.to_string(),
            },
            &affected,
            None,
            true,
            |ctx| {
                let mut graph = StackGraph::load(&self.store)?;
                let (_, orphaned) = graph.remove(name)?;
                graph.save(&self.store)?;

                if !orphaned.is_empty() {
                    warn!("Orphaned {}: prune or re-add them", orphaned.join(", "));
                }
                Ok(Finished {
                    value: orphaned,
                    result: OperationResult::Success,
                    restore: Some(ctx.snapshot.clone()),
                })
            },
        )
    }

    /// Delete an orphaned node
    pub fn prune_branch(&self, name: &str) -> Result<()> {
        let _lock = self.store.lock()?;
        self.store.ensure_initialized()?;
        self.ensure_no_sync()?;

        StackGraph::load(&self.store)?.check_prune(name)?;

        let affected = vec![name.to_string()];
        self.record_operation(
            OperationKind::Prune {
                name: name.to_string(),
            },
            &affected,
            None,
            true,
            |ctx| {
                let mut graph = StackGraph::load(&self.store)?;
                graph.prune(name)?;
                graph.save(&self.store)?;
                Ok(Finished {
                    value: (),
                    result: OperationResult::Success,
                    restore: Some(ctx.snapshot.clone()),
                })
            },
        )
    }

    /// Rebase every chain onto its parent's current tip
    pub fn sync(&self, options: SyncOptions) -> Result<SyncReport> {
        let _lock = self.store.lock()?;
        self.store.ensure_initialized()?;
        self.ensure_no_sync()?;

        let graph = StackGraph::load(&self.store)?;
        let walk = SyncOrchestrator::<V>::plan_walk(&graph);

        self.record_operation(OperationKind::Sync, &walk, None, true, |ctx| {
            let orchestrator = self.orchestrator(options);
            let report = orchestrator.start(ctx.id, ctx.pre.clone(), ctx.snapshot.clone())?;
            Ok(Self::finish_sync(report))
        })
    }

    /// Resume a halted sync after the conflict has been resolved and staged
    pub fn sync_continue(&self, options: SyncOptions) -> Result<SyncReport> {
        let _lock = self.store.lock()?;
        self.store.ensure_initialized()?;
        let state = SyncState::load(&self.store)?;

        // The record spans the whole walk, so undoing it reverts the sync
        self.record_operation(
            OperationKind::SyncContinue,
            &state.walk,
            Some(state.pre_walk.clone()),
            false,
            |_ctx| {
                let report = self.orchestrator(options).resume()?;
                Ok(Self::finish_sync(report))
            },
        )
    }

    /// Roll a halted sync back
    pub fn sync_abort(&self) -> Result<AbortReport> {
        let _lock = self.store.lock()?;
        self.store.ensure_initialized()?;
        let state = SyncState::load(&self.store)?;

        self.record_operation(
            OperationKind::SyncAbort,
            &state.walk,
            None,
            false,
            |_ctx| {
                let report = self.orchestrator(SyncOptions::default()).abort()?;
                let restore = Some(report.released.clone());
                Ok(Finished {
                    value: report,
                    result: OperationResult::Aborted,
                    restore,
                })
            },
        )
    }

    /// Reverse an operation (default: the most recent finished one)
    pub fn undo(&self, target: Option<&str>) -> Result<UndoReport> {
        let _lock = self.store.lock()?;
        self.store.ensure_initialized()?;
        self.ensure_no_sync()?;

        let journal = Journal::new(&self.store);
        journal.close_interrupted()?;
        let record = match target {
            Some(id) => journal.find(id)?,
            None => journal
                .last_finished()?
                .ok_or_else(|| GsError::OperationNotFound("no operations recorded".into()))?,
        };

        let graph = StackGraph::load(&self.store)?;
        let current = StateSnapshot::capture(&self.vcs, &graph, &record.begin.affected)?;
        let plan = plan_undo(&record, &current)?;

        self.record_operation(
            OperationKind::Undo {
                target: record.id(),
            },
            &record.begin.affected,
            None,
            true,
            |ctx| {
                let mut graph = StackGraph::load(&self.store)?;
                apply_undo(&self.vcs, &self.store, &mut graph, &plan)?;
                info!("Undid operation {} ({})", record.id(), record.begin.kind);

                Ok(Finished {
                    value: UndoReport {
                        operation_id: ctx.id,
                        target: record.id(),
                        kind: record.begin.kind.clone(),
                        restored: plan.affected.clone(),
                    },
                    result: OperationResult::Success,
                    restore: Some(ctx.snapshot.clone()),
                })
            },
        )
    }

    /// The stack with live statuses
    pub fn list(&self) -> Result<StackView> {
        self.store.ensure_initialized()?;
        let graph = StackGraph::load(&self.store)?;
        let current = self.vcs.current_branch()?;

        let view = |node: &BranchNode, depth: usize| -> Result<BranchView> {
            let parent_tip = if node.is_orphaned() {
                None
            } else {
                Some(self.tip_of(&graph, &node.parent)?)
            };
            Ok(BranchView {
                name: node.name.clone(),
                parent: node.parent.clone(),
                base: node.base.clone(),
                tip: self.vcs.branch_tip(&node.name)?.unwrap_or_else(|| node.tip.clone()),
                status: graph.derived_status(node, parent_tip.as_deref()),
                depth,
                current: current.as_deref() == Some(node.name.as_str()),
            })
        };

        let mut chains = Vec::new();
        for chain in graph.walk_order() {
            let mut views = Vec::new();
            for (index, name) in chain.iter().enumerate() {
                if let Some(node) = graph.get(name) {
                    views.push(view(node, index + 1)?);
                }
            }
            chains.push(views);
        }
        let orphans = graph
            .orphans()
            .into_iter()
            .map(|node| view(node, 0))
            .collect::<Result<Vec<_>>>()?;

        Ok(StackView {
            trunk: graph.trunk.clone(),
            chains,
            orphans,
        })
    }

    pub fn status(&self) -> Result<StatusReport> {
        let stack = self.list()?;
        let sync = SyncState::load_existing(&self.store)?.map(|state| SyncSummary {
            operation_id: state.operation_id,
            phase: state.phase,
            branch: state.current_branch().map(str::to_string),
            reason: state.halt.as_ref().map(|halt| halt.reason),
            files: state
                .halt
                .as_ref()
                .map(|halt| halt.files.clone())
                .unwrap_or_default(),
        });

        Ok(StatusReport {
            current_branch: self.vcs.current_branch()?,
            dirty: self.vcs.is_dirty()?,
            stack,
            sync,
            interrupted: Journal::new(&self.store).interrupted()?,
        })
    }

    /// Recorded operations, newest first
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<OperationRecord>> {
        self.store.ensure_initialized()?;
        let mut records = Journal::new(&self.store).load()?;
        records.reverse();
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    fn orchestrator(&self, options: SyncOptions) -> SyncOrchestrator<'_, V> {
        SyncOrchestrator::new(&self.vcs, &self.store, self.reviewer.as_ref(), options)
    }

    fn finish_sync(report: SyncReport) -> Finished<SyncReport> {
        let (result, restore) = match &report.outcome {
            SyncOutcome::Completed => (OperationResult::Success, report.released.clone()),
            // The snapshot stays parked in the sync state
            SyncOutcome::Halted(halt) => (
                OperationResult::Conflict {
                    branch: halt.branch.clone(),
                },
                None,
            ),
        };
        Finished {
            value: report,
            result,
            restore,
        }
    }

    fn ensure_no_sync(&self) -> Result<()> {
        match SyncState::load_existing(&self.store)? {
            Some(state) => Err(state.in_progress_error()),
            None => Ok(()),
        }
    }

    fn tip_of(&self, graph: &StackGraph, branch: &str) -> Result<String> {
        if let Some(tip) = self.vcs.branch_tip(branch)? {
            return Ok(tip);
        }
        graph
            .get(branch)
            .map(|node| node.tip.clone())
            .ok_or_else(|| GsError::validation(format!("Branch '{branch}' does not exist")))
    }

    /// Run a mutation inside an Operation Record. The caller holds the
    /// repository lock and has already rejected invalid requests.
    fn record_operation<T>(
        &self,
        kind: OperationKind,
        affected: &[String],
        pre: Option<StateSnapshot>,
        protect: bool,
        action: impl FnOnce(&OpContext) -> Result<Finished<T>>,
    ) -> Result<T> {
        let journal = Journal::new(&self.store);
        journal.close_interrupted()?;

        let id = Uuid::new_v4();
        let op_id = id.to_string();
        let guard = SafetyGuard::new(&self.vcs, self.settings.sync.auto_stash);

        // Nothing has been written to the repository before this point
        let snapshot = if protect {
            guard.protect(&op_id)?
        } else {
            WorktreeSnapshot::clean()
        };

        let pre = match pre {
            Some(pre) => pre,
            None => {
                let graph = StackGraph::load(&self.store)?;
                StateSnapshot::capture(&self.vcs, &graph, affected)?
            }
        };
        journal.begin(BeginEntry {
            id,
            started_at: Utc::now(),
            kind,
            affected: affected.to_vec(),
            pre: pre.clone(),
            snapshot: snapshot.clone(),
        })?;

        let ctx = OpContext { id, snapshot, pre };
        let outcome = action(&ctx);
        let post = StackGraph::load(&self.store)
            .and_then(|graph| StateSnapshot::capture(&self.vcs, &graph, affected))
            .map_err(|e| warn!("Could not capture post-state of {}: {}", id, e))
            .ok();

        match outcome {
            Ok(finished) => {
                let mut result = finished.result;
                let restored = match &finished.restore {
                    Some(snapshot) => guard.restore(snapshot, &op_id),
                    None => Ok(()),
                };
                if result == OperationResult::Success {
                    if let Err(GsError::RestoreConflict { stash, .. }) = &restored {
                        result = OperationResult::RestoreConflict {
                            stash: stash.clone(),
                        };
                    }
                }
                journal.finish(id, result, post)?;
                restored.map(|_| finished.value)
            }
            Err(err) => {
                journal.finish(
                    id,
                    OperationResult::Failed {
                        error: err.to_string(),
                    },
                    post,
                )?;

                // A snapshot parked by a sync stays with the sync state
                let parked = SyncState::load_existing(&self.store)
                    .ok()
                    .flatten()
                    .is_some_and(|state| state.parked == ctx.snapshot);
                if !parked {
                    if let Err(restore_err) = guard.restore(&ctx.snapshot, &op_id) {
                        warn!("Could not restore uncommitted changes: {}", restore_err);
                    }
                }
                Err(err)
            }
        }
    }
}
