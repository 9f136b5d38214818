//! End-to-end sync scenarios against real repositories

#[path = "integration/test_helpers.rs"]
mod test_helpers;

use ghoststack::errors::GsError;
use ghoststack::oplog::{OperationKind, OperationResult};
use ghoststack::stack::{
    BatchPlan, BranchStatus, BranchUpdate, HaltReason, StackGraph, SyncOptions, SyncPhase,
    SyncState,
};
use std::time::Duration;
use test_helpers::TestRepo;

/// main <- a <- b where `a` and `main` both edit README.md
fn conflicting_stack() -> TestRepo {
    let repo = TestRepo::new();
    let manager = repo.manager();
    manager.init(Some("main"), false).unwrap();

    manager.add_branch("a", Some("main"), None).unwrap();
    repo.commit("README.md", "# From a\n", "Edit readme on a");
    manager.add_branch("b", Some("a"), None).unwrap();
    repo.commit("b.txt", "b\n", "Add b");

    repo.git(&["checkout", "main"]);
    repo.commit("README.md", "# From main\n", "Edit readme on main");
    repo
}

fn status_of(repo: &TestRepo, branch: &str) -> BranchStatus {
    repo.manager()
        .list()
        .unwrap()
        .chains
        .iter()
        .flatten()
        .find(|view| view.name == branch)
        .map(|view| view.status)
        .unwrap()
}

#[test]
fn test_sync_rebases_chain_after_trunk_moves() {
    let repo = TestRepo::with_stack();
    let a_before = repo.tip("a");
    let b_before = repo.tip("b");
    let main_tip = repo.commit("trunk.txt", "trunk\n", "Trunk work");
    let manager = repo.manager();

    let report = manager.sync(SyncOptions::default()).unwrap();
    assert!(report.is_completed());
    assert_eq!(report.changes.len(), 2);

    let a = repo.tip("a");
    let b = repo.tip("b");
    assert_ne!(a, a_before);
    assert_ne!(b, b_before);
    assert_eq!(repo.tip("a~1"), main_tip);
    assert_eq!(repo.tip("b~1"), a);

    let graph = StackGraph::load(manager.store()).unwrap();
    assert_eq!(graph.get("a").unwrap().base, main_tip);
    assert_eq!(graph.get("a").unwrap().tip, a);
    assert_eq!(graph.get("b").unwrap().base, a);
    assert_eq!(graph.get("b").unwrap().tip, b);

    assert_eq!(status_of(&repo, "a"), BranchStatus::Clean);
    assert_eq!(status_of(&repo, "b"), BranchStatus::Clean);
    assert_eq!(repo.current_branch(), "main");
    assert!(!SyncState::exists(manager.store()));
}

#[test]
fn test_second_sync_changes_nothing() {
    let repo = TestRepo::with_stack();
    repo.commit("trunk.txt", "trunk\n", "Trunk work");
    let manager = repo.manager();

    manager.sync(SyncOptions::default()).unwrap();
    let a = repo.tip("a");
    let b = repo.tip("b");
    let graph = StackGraph::load(manager.store()).unwrap();

    let report = manager.sync(SyncOptions::default()).unwrap();
    assert!(report.is_completed());
    assert!(report.changes.is_empty());
    assert_eq!(repo.tip("a"), a);
    assert_eq!(repo.tip("b"), b);

    let after = StackGraph::load(manager.store()).unwrap();
    assert_eq!(after.get("a").unwrap().base, graph.get("a").unwrap().base);
    assert_eq!(after.get("b").unwrap().tip, graph.get("b").unwrap().tip);
}

#[test]
fn test_sync_with_nothing_to_do_still_refreshes_tips() {
    let repo = TestRepo::with_stack();
    let manager = repo.manager();

    let report = manager.sync(SyncOptions::default()).unwrap();
    assert!(report.changes.is_empty());

    // Commits made after `stack add` are picked up as the new tips
    let graph = StackGraph::load(manager.store()).unwrap();
    assert_eq!(graph.get("a").unwrap().tip, repo.tip("a"));
    assert_eq!(graph.get("b").unwrap().tip, repo.tip("b"));
}

#[test]
fn test_conflict_halts_walk_and_abort_restores_tips() {
    let repo = conflicting_stack();
    let a_before = repo.tip("a");
    let b_before = repo.tip("b");
    let manager = repo.manager();

    let report = manager.sync(SyncOptions::default()).unwrap();
    let halt = report.halt().unwrap().clone();
    assert_eq!(halt.branch, "a");
    assert_eq!(halt.reason, HaltReason::Conflict);
    assert!(halt.files.contains(&"README.md".to_string()));

    assert_eq!(repo.tip("a"), a_before);
    assert_eq!(repo.tip("b"), b_before);
    assert_eq!(status_of(&repo, "a"), BranchStatus::Conflicted);
    assert!(repo.read("README.md").contains("<<<<<<<"));

    let status = manager.status().unwrap();
    let sync = status.sync.unwrap();
    assert_eq!(sync.branch.as_deref(), Some("a"));
    assert_eq!(sync.operation_id, report.operation_id);

    // Other mutations wait for the sync to be resolved
    assert!(matches!(
        manager.add_branch("c", Some("b"), None),
        Err(GsError::SyncInProgress { .. })
    ));
    assert!(matches!(
        manager.sync(SyncOptions::default()),
        Err(GsError::SyncInProgress { .. })
    ));

    let abort = manager.sync_abort().unwrap();
    assert_eq!(abort.operation_id, report.operation_id);
    assert_eq!(repo.tip("a"), a_before);
    assert_eq!(repo.tip("b"), b_before);
    assert_eq!(repo.current_branch(), "main");
    assert_eq!(repo.read("README.md"), "# From main\n");
    assert!(!SyncState::exists(manager.store()));
    assert_eq!(status_of(&repo, "a"), BranchStatus::NeedsRestack);

    let history = manager.history(Some(2)).unwrap();
    assert_eq!(history[0].begin.kind, OperationKind::SyncAbort);
    assert_eq!(history[0].result(), Some(&OperationResult::Aborted));
    assert_eq!(
        history[1].result(),
        Some(&OperationResult::Conflict { branch: "a".into() })
    );
}

#[test]
fn test_abort_without_sync_is_rejected() {
    let repo = TestRepo::with_stack();
    assert!(matches!(
        repo.manager().sync_abort(),
        Err(GsError::NoSyncInProgress)
    ));
    assert!(matches!(
        repo.manager().sync_continue(SyncOptions::default()),
        Err(GsError::NoSyncInProgress)
    ));
}

#[test]
fn test_continue_after_resolution_finishes_the_walk() {
    let repo = conflicting_stack();
    let main_tip = repo.tip("main");
    let manager = repo.manager();

    let report = manager.sync(SyncOptions::default()).unwrap();
    assert!(!report.is_completed());

    // Continuing with the conflict still in place halts again
    let again = manager.sync_continue(SyncOptions::default()).unwrap();
    assert_eq!(again.halt().unwrap().branch, "a");

    repo.write("README.md", "# Merged\n");
    repo.git(&["add", "README.md"]);

    let report = manager.sync_continue(SyncOptions::default()).unwrap();
    assert!(report.is_completed());

    let a = repo.tip("a");
    assert_eq!(repo.tip("a~1"), main_tip);
    assert_eq!(repo.tip("b~1"), a);
    assert_eq!(repo.git(&["show", "a:README.md"]), "# Merged");
    assert_eq!(repo.git(&["show", "b:b.txt"]), "b");

    assert_eq!(repo.current_branch(), "main");
    assert_eq!(status_of(&repo, "a"), BranchStatus::Clean);
    assert_eq!(status_of(&repo, "b"), BranchStatus::Clean);
    assert!(!SyncState::exists(manager.store()));

    let last = manager.history(Some(1)).unwrap().remove(0);
    assert_eq!(last.begin.kind, OperationKind::SyncContinue);
    assert_eq!(last.result(), Some(&OperationResult::Success));
}

#[test]
fn test_dirty_tree_survives_sync() {
    let repo = TestRepo::with_stack();
    repo.commit("trunk.txt", "trunk\n", "Trunk work");
    repo.write("README.md", "# Local edit\n");
    repo.write("scratch.txt", "untracked\n");

    let report = repo.manager().sync(SyncOptions::default()).unwrap();
    assert!(report.is_completed());

    assert_eq!(repo.read("README.md"), "# Local edit\n");
    assert_eq!(repo.read("scratch.txt"), "untracked\n");
    assert!(repo.git(&["stash", "list"]).is_empty());
}

#[test]
fn test_dirty_tree_comes_back_after_conflicted_sync_is_aborted() {
    let repo = conflicting_stack();
    repo.write("notes.txt", "keep me\n");
    let manager = repo.manager();

    let report = manager.sync(SyncOptions::default()).unwrap();
    assert!(!report.is_completed());
    // Parked with the sync state until the walk ends
    assert!(!repo.path.join("notes.txt").exists());

    manager.sync_abort().unwrap();
    assert_eq!(repo.read("notes.txt"), "keep me\n");
}

#[test]
fn test_cancel_before_first_step_touches_nothing() {
    let repo = TestRepo::with_stack();
    repo.commit("trunk.txt", "trunk\n", "Trunk work");
    let a_before = repo.tip("a");
    let b_before = repo.tip("b");
    let manager = repo.manager();

    let options = SyncOptions::default();
    options.cancel.cancel();
    let report = manager.sync(options).unwrap();

    let halt = report.halt().unwrap();
    assert_eq!(halt.reason, HaltReason::Cancelled);
    assert_eq!(halt.branch, "a");
    assert_eq!(repo.tip("a"), a_before);
    assert_eq!(repo.tip("b"), b_before);
    assert_eq!(status_of(&repo, "a"), BranchStatus::Conflicted);

    let report = manager.sync_continue(SyncOptions::default()).unwrap();
    assert!(report.is_completed());
    assert_eq!(repo.tip("a~1"), repo.tip("main"));
}

/// Sync of `with_stack` after trunk moved, cancelled before `a`, with a
/// batch for `a` written ahead but not yet applied. Returns `a`'s replayed tip.
fn halted_with_pending_batch(repo: &TestRepo) -> String {
    let manager = repo.manager();
    let a_before = repo.tip("a");
    let main_tip = repo.tip("main");

    let options = SyncOptions::default();
    options.cancel.cancel();
    assert!(!manager.sync(options).unwrap().is_completed());

    repo.git(&["checkout", "--detach", "main"]);
    repo.git(&["cherry-pick", &a_before]);
    let a_replayed = repo.git(&["rev-parse", "HEAD"]);
    repo.git(&["checkout", "main"]);

    let mut state = SyncState::load(manager.store()).unwrap();
    state.pending = Some(BatchPlan {
        updates: vec![BranchUpdate {
            branch: "a".into(),
            old_tip: a_before,
            new_base: main_tip,
            new_tip: a_replayed.clone(),
        }],
    });
    state.save(manager.store()).unwrap();
    a_replayed
}

#[test]
fn test_continue_reapplies_batch_written_ahead() {
    let repo = TestRepo::with_stack();
    repo.commit("trunk.txt", "trunk\n", "Trunk work");
    let main_tip = repo.tip("main");
    let a_replayed = halted_with_pending_batch(&repo);
    let manager = repo.manager();

    let report = manager.sync_continue(SyncOptions::default()).unwrap();
    assert!(report.is_completed());

    assert_eq!(repo.tip("a"), a_replayed);
    assert_eq!(repo.tip("a~1"), main_tip);
    assert_eq!(repo.tip("b~1"), a_replayed);
    let graph = StackGraph::load(manager.store()).unwrap();
    assert_eq!(graph.get("a").unwrap().base, main_tip);
    assert_eq!(graph.get("a").unwrap().tip, a_replayed);
    assert!(!SyncState::exists(manager.store()));
}

#[test]
fn test_abort_restores_refs_moved_by_batch_written_ahead() {
    let repo = TestRepo::with_stack();
    repo.commit("trunk.txt", "trunk\n", "Trunk work");
    let a_before = repo.tip("a");
    let b_before = repo.tip("b");
    let a_replayed = halted_with_pending_batch(&repo);
    // The ref moved but the process died before the walk recorded it
    repo.git(&["branch", "-f", "a", &a_replayed]);
    let manager = repo.manager();

    let report = manager.sync_abort().unwrap();

    assert!(report.restored.contains(&"a".to_string()));
    assert_eq!(repo.tip("a"), a_before);
    assert_eq!(repo.tip("b"), b_before);
    let graph = StackGraph::load(manager.store()).unwrap();
    assert_eq!(graph.get("a").unwrap().tip, a_before);
    assert!(!SyncState::exists(manager.store()));
}

#[test]
fn test_interrupted_abort_blocks_continue_and_can_be_finished() {
    let repo = TestRepo::with_stack();
    repo.commit("trunk.txt", "trunk\n", "Trunk work");
    let a_before = repo.tip("a");
    let a_replayed = halted_with_pending_batch(&repo);
    repo.git(&["branch", "-f", "a", &a_replayed]);
    let manager = repo.manager();

    let mut state = SyncState::load(manager.store()).unwrap();
    state.phase = SyncPhase::Aborting;
    state.save(manager.store()).unwrap();

    let err = manager
        .sync_continue(SyncOptions::default())
        .unwrap_err();
    assert!(matches!(err, GsError::Validation(_)));
    assert!(err.to_string().contains("--abort"));
    assert_eq!(
        SyncState::load(manager.store()).unwrap().phase,
        SyncPhase::Aborting
    );

    manager.sync_abort().unwrap();
    assert_eq!(repo.tip("a"), a_before);
    assert!(!SyncState::exists(manager.store()));
    assert!(matches!(
        manager.sync_abort(),
        Err(GsError::NoSyncInProgress)
    ));
}

#[test]
fn test_abort_keeps_untracked_files_created_during_the_halt() {
    let repo = conflicting_stack();
    let a_before = repo.tip("a");
    let manager = repo.manager();

    assert!(!manager.sync(SyncOptions::default()).unwrap().is_completed());
    repo.write("scratch-notes.txt", "while resolving\n");

    manager.sync_abort().unwrap();

    assert_eq!(repo.read("scratch-notes.txt"), "while resolving\n");
    assert_eq!(repo.read("README.md"), "# From main\n");
    assert_eq!(repo.tip("a"), a_before);
    assert_eq!(repo.current_branch(), "main");
}

#[test]
fn test_zero_step_timeout_halts_with_first_branch_conflicted() {
    let repo = TestRepo::with_stack();
    repo.commit("trunk.txt", "trunk\n", "Trunk work");
    let a_before = repo.tip("a");
    let manager = repo.manager();

    let options = SyncOptions {
        step_timeout: Some(Duration::ZERO),
        ..SyncOptions::default()
    };
    let report = manager.sync(options).unwrap();

    let halt = report.halt().unwrap();
    assert_eq!(halt.reason, HaltReason::Timeout);
    assert_eq!(halt.branch, "a");
    assert_eq!(repo.tip("a"), a_before);
    assert_eq!(status_of(&repo, "a"), BranchStatus::Conflicted);
    assert_eq!(repo.current_branch(), "main");

    let report = manager.sync_continue(SyncOptions::default()).unwrap();
    assert!(report.is_completed());
    assert_eq!(status_of(&repo, "a"), BranchStatus::Clean);
}

#[test]
fn test_empty_child_moves_in_the_same_batch() {
    let repo = TestRepo::new();
    let manager = repo.manager();
    manager.init(Some("main"), false).unwrap();
    manager.add_branch("a", Some("main"), None).unwrap();
    repo.commit("a.txt", "a\n", "Add a");
    manager.add_branch("b", Some("a"), None).unwrap();
    repo.git(&["checkout", "main"]);
    repo.commit("trunk.txt", "trunk\n", "Trunk work");

    let report = manager.sync(SyncOptions::default()).unwrap();
    assert!(report.is_completed());

    let a = repo.tip("a");
    assert_eq!(repo.tip("b"), a);
    let graph = StackGraph::load(manager.store()).unwrap();
    assert_eq!(graph.get("b").unwrap().base, a);
    assert_eq!(graph.get("b").unwrap().tip, a);
    assert!(report.changes.iter().any(|change| change.branch == "b"));
}

#[test]
fn test_concurrent_command_fails_with_lock_busy() {
    let repo = TestRepo::with_stack();
    repo.commit("trunk.txt", "trunk\n", "Trunk work");
    let a_before = repo.tip("a");
    let first = repo.manager();
    let records_before = first.history(None).unwrap().len();

    let _held = first.store().lock().unwrap();
    let second = repo.manager();
    assert!(matches!(
        second.sync(SyncOptions::default()),
        Err(GsError::LockBusy(_))
    ));
    drop(_held);

    assert_eq!(repo.tip("a"), a_before);
    assert_eq!(second.history(None).unwrap().len(), records_before);
    assert!(!SyncState::exists(second.store()));
}

#[test]
fn test_parallel_chains_sync_independently() {
    let repo = TestRepo::with_stack();
    let manager = repo.manager();
    manager.add_branch("z", Some("main"), None).unwrap();
    repo.commit("z.txt", "z\n", "Add z");
    repo.git(&["checkout", "main"]);
    let main_tip = repo.commit("trunk.txt", "trunk\n", "Trunk work");

    let report = manager.sync(SyncOptions::default()).unwrap();
    assert!(report.is_completed());
    assert_eq!(repo.tip("a~1"), main_tip);
    assert_eq!(repo.tip("z~1"), main_tip);
    assert!(repo.is_ancestor("a", "b"));
}
