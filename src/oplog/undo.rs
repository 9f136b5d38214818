use super::record::{OperationKind, OperationRecord, StateSnapshot};
use crate::errors::{GsError, Result};
use crate::git::{RefUpdate, Vcs};
use crate::stack::{BranchNode, StackGraph};
use crate::store::MetadataStore;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// What reversing one operation changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoPlan {
    pub target: Uuid,
    pub affected: Vec<String>,
    /// Refs moved or recreated, applied before the checkout
    pub ref_sets: Vec<RefUpdate>,
    /// Refs that did not exist before the operation, deleted last
    pub ref_deletes: Vec<RefUpdate>,
    pub head: Option<String>,
    pub nodes: BTreeMap<String, Option<BranchNode>>,
}

/// Decide whether `record` can be reversed from `current` (PURE)
///
/// Conservative: every affected branch must still sit exactly where the
/// operation left it, both its ref and its tracked tip.
pub fn plan_undo(record: &OperationRecord, current: &StateSnapshot) -> Result<UndoPlan> {
    let id = record.id();
    let finish = record
        .finish
        .as_ref()
        .ok_or_else(|| GsError::not_reversible(id, "the operation never finished"))?;

    if !finish.result.is_reversible() {
        return Err(GsError::not_reversible(
            id,
            format!("the operation ended as '{}'", finish.result),
        ));
    }
    if record.begin.kind == OperationKind::SyncAbort {
        return Err(GsError::not_reversible(
            id,
            "an abort only rolled a sync back; run `gs stack sync` again instead",
        ));
    }
    let post = finish
        .post
        .as_ref()
        .ok_or_else(|| GsError::not_reversible(id, "no post-state was recorded"))?;

    for branch in &record.begin.affected {
        let now = current.branches.get(branch).map(|state| state.tips());
        let then = post.branches.get(branch).map(|state| state.tips());
        if now != then {
            return Err(GsError::not_reversible(
                id,
                format!("'{branch}' has changed since the operation"),
            ));
        }
    }

    let mut ref_sets = Vec::new();
    let mut ref_deletes = Vec::new();
    let mut nodes = BTreeMap::new();
    for branch in &record.begin.affected {
        let Some(before) = record.begin.pre.branches.get(branch) else {
            continue;
        };
        let after_ref = current
            .branches
            .get(branch)
            .and_then(|state| state.ref_tip.as_deref());

        match (&before.ref_tip, after_ref) {
            (Some(tip), Some(now)) if tip == now => {}
            (Some(tip), _) => ref_sets.push(RefUpdate::set(branch.clone(), tip.clone())),
            (None, Some(_)) => ref_deletes.push(RefUpdate::delete(branch.clone())),
            (None, None) => {}
        }
        nodes.insert(branch.clone(), before.node.clone());
    }

    Ok(UndoPlan {
        target: id,
        affected: record.begin.affected.clone(),
        ref_sets,
        ref_deletes,
        head: record.begin.pre.head.clone(),
        nodes,
    })
}

/// Apply a plan produced by [`plan_undo`]
pub fn apply_undo<V: Vcs + ?Sized>(
    vcs: &V,
    store: &MetadataStore,
    graph: &mut StackGraph,
    plan: &UndoPlan,
) -> Result<()> {
    vcs.update_refs(&plan.ref_sets)?;

    if let Some(head) = &plan.head {
        if vcs.branch_tip(head)?.is_some() {
            if vcs.current_branch()?.as_deref() != Some(head.as_str()) {
                vcs.checkout(head, false)?;
            }
        } else {
            warn!("Previously checked-out branch '{}' no longer exists", head);
        }
    }

    let current = vcs.current_branch()?;
    let deletes: Vec<RefUpdate> = plan
        .ref_deletes
        .iter()
        .filter(|update| {
            let checked_out = current.as_deref() == Some(update.branch.as_str());
            if checked_out {
                warn!("Keeping '{}' because it is checked out", update.branch);
            }
            !checked_out
        })
        .cloned()
        .collect();
    vcs.update_refs(&deletes)?;

    for (name, node) in &plan.nodes {
        graph.restore_node(name, node.clone());
    }
    graph.validate()?;
    graph.save(store)?;

    debug!("Reversed operation {}", plan.target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::WorktreeSnapshot;
    use crate::oplog::record::{BeginEntry, BranchState, FinishEntry, OperationResult};
    use chrono::Utc;

    fn state(ref_tip: Option<&str>, node_tip: Option<&str>) -> BranchState {
        BranchState {
            node: node_tip.map(|tip| {
                BranchNode::new("a".into(), "main".into(), "m0".into(), tip.into())
            }),
            ref_tip: ref_tip.map(str::to_string),
        }
    }

    fn snapshot(head: &str, a: BranchState) -> StateSnapshot {
        StateSnapshot {
            head: Some(head.to_string()),
            branches: BTreeMap::from([("a".to_string(), a)]),
        }
    }

    fn record(
        kind: OperationKind,
        pre: StateSnapshot,
        result: OperationResult,
        post: StateSnapshot,
    ) -> OperationRecord {
        let id = Uuid::new_v4();
        OperationRecord {
            begin: BeginEntry {
                id,
                started_at: Utc::now(),
                kind,
                affected: vec!["a".into()],
                pre,
                snapshot: WorktreeSnapshot::clean(),
            },
            finish: Some(FinishEntry {
                id,
                finished_at: Utc::now(),
                result,
                post: Some(post),
            }),
        }
    }

    #[test]
    fn test_undo_add_deletes_new_branch_and_node() {
        let pre = snapshot("main", state(None, None));
        let post = snapshot("a", state(Some("m0"), Some("m0")));
        let op = record(
            OperationKind::AddBranch { name: "a".into() },
            pre,
            OperationResult::Success,
            post.clone(),
        );

        let plan = plan_undo(&op, &post).unwrap();
        assert!(plan.ref_sets.is_empty());
        assert_eq!(plan.ref_deletes, vec![RefUpdate::delete("a")]);
        assert_eq!(plan.head.as_deref(), Some("main"));
        assert_eq!(plan.nodes.get("a"), Some(&None));
    }

    #[test]
    fn test_undo_sync_moves_ref_back() {
        let pre = snapshot("main", state(Some("a1"), Some("a1")));
        let post = snapshot("main", state(Some("a2"), Some("a2")));
        let op = record(OperationKind::Sync, pre, OperationResult::Success, post.clone());

        let plan = plan_undo(&op, &post).unwrap();
        assert_eq!(plan.ref_sets, vec![RefUpdate::set("a", "a1")]);
        assert!(plan.ref_deletes.is_empty());
    }

    #[test]
    fn test_moved_branch_blocks_undo() {
        let pre = snapshot("main", state(Some("a1"), Some("a1")));
        let post = snapshot("main", state(Some("a2"), Some("a2")));
        let op = record(OperationKind::Sync, pre, OperationResult::Success, post);

        let current = snapshot("main", state(Some("a3"), Some("a2")));
        assert!(matches!(
            plan_undo(&op, &current),
            Err(GsError::NotReversible { .. })
        ));
    }

    #[test]
    fn test_halted_and_aborting_operations_are_not_reversible() {
        let pre = snapshot("main", state(Some("a1"), Some("a1")));
        let post = snapshot("main", state(Some("a1"), Some("a1")));

        let halted = record(
            OperationKind::Sync,
            pre.clone(),
            OperationResult::Conflict { branch: "a".into() },
            post.clone(),
        );
        assert!(plan_undo(&halted, &post).is_err());

        let abort = record(
            OperationKind::SyncAbort,
            pre,
            OperationResult::Success,
            post.clone(),
        );
        assert!(plan_undo(&abort, &post).is_err());
    }
}
