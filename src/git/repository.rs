use super::vcs::{ConflictInfo, RebaseOutcome, RebaseProgress, RefUpdate, StashPop, Vcs};
use crate::errors::{GsError, Result};
use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Commit, ErrorCode, Index, Oid, Repository, RepositoryState, ResetType, Signature,
    Sort, StashApplyOptions, StashFlags, Status, StatusOptions,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Wrapper around git2::Repository implementing the [`Vcs`] primitives
pub struct GitRepository {
    repo: Repository,
    path: PathBuf,
}

impl GitRepository {
    /// Open a Git repository at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .map_err(|e| GsError::not_initialized(format!("Not a git repository: {}", e)))?;

        let workdir = repo
            .workdir()
            .ok_or_else(|| GsError::config("Repository has no working directory"))?
            .to_path_buf();

        Ok(Self {
            repo,
            path: workdir,
        })
    }

    /// Get repository path (the working directory root)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Git directory shared by all worktrees of this repository
    pub fn common_dir(&self) -> &Path {
        self.repo.commondir()
    }

    fn resolve(&self, primitive: &'static str, rev: &str) -> Result<Oid> {
        self.repo
            .revparse_single(rev)
            .and_then(|obj| obj.peel_to_commit())
            .map(|commit| commit.id())
            .map_err(|e| GsError::adapter(primitive, e))
    }

    fn commit(&self, primitive: &'static str, oid: Oid) -> Result<Commit<'_>> {
        self.repo
            .find_commit(oid)
            .map_err(|e| GsError::adapter(primitive, e))
    }

    /// Fallback identity when the repository has no user configured
    fn signature(repo: &Repository) -> Result<Signature<'static>> {
        repo.signature()
            .or_else(|_| Signature::now("ghoststack", "ghoststack@localhost"))
            .map_err(|e| GsError::adapter("signature", e))
    }

    /// Reopen the repository for primitives that need `&mut Repository`
    fn reopen(&self, primitive: &'static str) -> Result<Repository> {
        Repository::open(self.repo.path()).map_err(|e| GsError::adapter(primitive, e))
    }

    fn conflicted_paths(index: &Index) -> Result<Vec<String>> {
        let mut files = BTreeSet::new();
        let conflicts = index
            .conflicts()
            .map_err(|e| GsError::adapter("rebase", e))?;
        for conflict in conflicts {
            let conflict = conflict.map_err(|e| GsError::adapter("rebase", e))?;
            let entry = conflict
                .our
                .or(conflict.their)
                .or(conflict.ancestor);
            if let Some(entry) = entry {
                files.insert(String::from_utf8_lossy(&entry.path).into_owned());
            }
        }
        Ok(files.into_iter().collect())
    }

    /// Replay `commits` (oldest first) onto `onto` without touching any ref
    fn replay(
        &self,
        onto: Oid,
        commits: &[Oid],
        mut rewritten: Vec<(String, String)>,
        deadline: Option<Instant>,
    ) -> Result<RebaseOutcome> {
        let mut current = onto;

        for (position, &oid) in commits.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!("Replay deadline passed before {}", oid);
                return Ok(RebaseOutcome::TimedOut);
            }

            let commit = self.commit("rebase", oid)?;
            let onto_commit = self.commit("rebase", current)?;

            let mut index = self
                .repo
                .cherrypick_commit(&commit, &onto_commit, 0, None)
                .map_err(|e| GsError::adapter("rebase", e))?;

            if index.has_conflicts() {
                let files = Self::conflicted_paths(&index)?;
                self.materialize_conflict(&onto_commit, &commit)?;
                info!("Replay of {} onto {} conflicts in {:?}", oid, current, files);
                return Ok(RebaseOutcome::Conflict(ConflictInfo {
                    files,
                    progress: RebaseProgress {
                        onto: current.to_string(),
                        conflicted_commit: oid.to_string(),
                        remaining: commits[position + 1..]
                            .iter()
                            .map(|o| o.to_string())
                            .collect(),
                        rewritten,
                    },
                }));
            }

            let tree_oid = index
                .write_tree_to(&self.repo)
                .map_err(|e| GsError::adapter("rebase", e))?;

            // A change that already landed upstream replays to nothing; drop it
            let was_empty = commit
                .parent(0)
                .map(|parent| parent.tree_id() == commit.tree_id())
                .unwrap_or(false);
            if tree_oid == onto_commit.tree_id() && !was_empty {
                debug!("Dropping {} (already applied upstream)", oid);
                rewritten.push((oid.to_string(), current.to_string()));
                continue;
            }

            let tree = self
                .repo
                .find_tree(tree_oid)
                .map_err(|e| GsError::adapter("rebase", e))?;
            let message = String::from_utf8_lossy(commit.message_raw_bytes()).into_owned();

            // Keep both signatures so identical inputs replay to identical ids
            let new_oid = self
                .repo
                .commit(
                    None,
                    &commit.author(),
                    &commit.committer(),
                    &message,
                    &tree,
                    &[&onto_commit],
                )
                .map_err(|e| GsError::adapter("rebase", e))?;

            debug!("Replayed {} -> {}", oid, new_oid);
            rewritten.push((oid.to_string(), new_oid.to_string()));
            current = new_oid;
        }

        Ok(RebaseOutcome::Applied {
            new_tip: current.to_string(),
            rewritten,
        })
    }

    /// Leave `commit` applied on a detached `onto` with conflict markers
    fn materialize_conflict(&self, onto: &Commit<'_>, commit: &Commit<'_>) -> Result<()> {
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo
            .checkout_tree(onto.as_object(), Some(&mut checkout))
            .map_err(|e| GsError::adapter("rebase", e))?;
        self.repo
            .set_head_detached(onto.id())
            .map_err(|e| GsError::adapter("rebase", e))?;

        let mut opts = git2::CherrypickOptions::new();
        self.repo
            .cherrypick(commit, Some(&mut opts))
            .map_err(|e| GsError::adapter("rebase", e))?;
        Ok(())
    }

    fn has_unstaged_changes(&self) -> Result<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .map_err(|e| GsError::adapter("status", e))?;

        Ok(statuses.iter().any(|entry| {
            entry.status().intersects(
                Status::WT_MODIFIED | Status::WT_DELETED | Status::WT_TYPECHANGE | Status::WT_RENAMED,
            )
        }))
    }
}

impl Vcs for GitRepository {
    fn is_dirty(&self) -> Result<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .map_err(|e| GsError::adapter("status", e))?;

        Ok(statuses
            .iter()
            .any(|entry| !entry.status().is_empty() && !entry.status().contains(Status::IGNORED)))
    }

    fn current_branch(&self) -> Result<Option<String>> {
        match self.repo.head() {
            Ok(head) if head.is_branch() => Ok(head.shorthand().map(str::to_string)),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                Ok(None)
            }
            Err(e) => Err(GsError::adapter("current_branch", e)),
        }
    }

    fn list_refs(&self) -> Result<BTreeMap<String, String>> {
        let branches = self
            .repo
            .branches(Some(BranchType::Local))
            .map_err(|e| GsError::adapter("list_refs", e))?;

        let mut refs = BTreeMap::new();
        for branch in branches {
            let (branch, _) = branch.map_err(|e| GsError::adapter("list_refs", e))?;
            let name = branch
                .name()
                .map_err(|e| GsError::adapter("list_refs", e))?
                .map(str::to_string);
            if let (Some(name), Some(target)) = (name, branch.get().target()) {
                refs.insert(name, target.to_string());
            }
        }
        Ok(refs)
    }

    fn branch_tip(&self, name: &str) -> Result<Option<String>> {
        match self.repo.find_branch(name, BranchType::Local) {
            Ok(branch) => Ok(branch.get().target().map(|oid| oid.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GsError::adapter("list_refs", e)),
        }
    }

    fn create_branch(&self, name: &str, at: &str) -> Result<()> {
        let oid = self.resolve("create_branch", at)?;
        let commit = self.commit("create_branch", oid)?;
        self.repo
            .branch(name, &commit, false)
            .map_err(|e| GsError::adapter("create_branch", e))?;

        info!("Created branch '{}' at {}", name, oid);
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        let mut branch = self
            .repo
            .find_branch(name, BranchType::Local)
            .map_err(|e| GsError::adapter("delete_branch", e))?;
        branch
            .delete()
            .map_err(|e| GsError::adapter("delete_branch", e))?;

        info!("Deleted branch '{}'", name);
        Ok(())
    }

    fn checkout(&self, name: &str, force: bool) -> Result<()> {
        let branch = self
            .repo
            .find_branch(name, BranchType::Local)
            .map_err(|e| GsError::adapter("checkout", e))?;
        let tree = branch
            .get()
            .peel_to_tree()
            .map_err(|e| GsError::adapter("checkout", e))?;

        let mut checkout = CheckoutBuilder::new();
        if force {
            checkout.force();
        } else {
            checkout.safe();
        }
        self.repo
            .checkout_tree(tree.as_object(), Some(&mut checkout))
            .map_err(|e| GsError::adapter("checkout", e))?;
        self.repo
            .set_head(&format!("refs/heads/{}", name))
            .map_err(|e| GsError::adapter("checkout", e))?;

        debug!("Switched to branch '{}'", name);
        Ok(())
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        let a = self.resolve("merge_base", a)?;
        let b = self.resolve("merge_base", b)?;
        match self.repo.merge_base(a, b) {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GsError::adapter("merge_base", e)),
        }
    }

    fn rebase(
        &self,
        onto: &str,
        base: &str,
        tip: &str,
        deadline: Option<Instant>,
    ) -> Result<RebaseOutcome> {
        let onto = self.resolve("rebase", onto)?;
        let base = self.resolve("rebase", base)?;
        let tip = self.resolve("rebase", tip)?;

        let mut walk = self
            .repo
            .revwalk()
            .map_err(|e| GsError::adapter("rebase", e))?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)
            .map_err(|e| GsError::adapter("rebase", e))?;
        walk.push(tip).map_err(|e| GsError::adapter("rebase", e))?;
        walk.hide(base).map_err(|e| GsError::adapter("rebase", e))?;
        let commits = walk
            .collect::<std::result::Result<Vec<Oid>, git2::Error>>()
            .map_err(|e| GsError::adapter("rebase", e))?;

        debug!("Replaying {} commit(s) onto {}", commits.len(), onto);
        self.replay(onto, &commits, Vec::new(), deadline)
    }

    fn continue_rebase(
        &self,
        progress: &RebaseProgress,
        deadline: Option<Instant>,
    ) -> Result<RebaseOutcome> {
        let mut index = self
            .repo
            .index()
            .map_err(|e| GsError::adapter("rebase", e))?;
        index
            .read(true)
            .map_err(|e| GsError::adapter("rebase", e))?;

        if index.has_conflicts() {
            return Ok(RebaseOutcome::Conflict(ConflictInfo {
                files: Self::conflicted_paths(&index)?,
                progress: progress.clone(),
            }));
        }
        if self.has_unstaged_changes()? {
            return Err(GsError::dirty(
                "Unstaged changes found; stage your conflict resolution with `git add`",
            ));
        }

        let onto = self.commit("rebase", self.resolve("rebase", &progress.onto)?)?;
        let original = self.commit(
            "rebase",
            self.resolve("rebase", &progress.conflicted_commit)?,
        )?;

        let tree_oid = index
            .write_tree()
            .map_err(|e| GsError::adapter("rebase", e))?;
        let tree = self
            .repo
            .find_tree(tree_oid)
            .map_err(|e| GsError::adapter("rebase", e))?;
        let message = String::from_utf8_lossy(original.message_raw_bytes()).into_owned();
        let resolved = self
            .repo
            .commit(
                None,
                &original.author(),
                &original.committer(),
                &message,
                &tree,
                &[&onto],
            )
            .map_err(|e| GsError::adapter("rebase", e))?;
        self.repo
            .cleanup_state()
            .map_err(|e| GsError::adapter("rebase", e))?;
        info!("Committed resolution of {} as {}", original.id(), resolved);

        let mut rewritten = progress.rewritten.clone();
        rewritten.push((progress.conflicted_commit.clone(), resolved.to_string()));

        let remaining = progress
            .remaining
            .iter()
            .map(|rev| self.resolve("rebase", rev))
            .collect::<Result<Vec<_>>>()?;

        self.replay(resolved, &remaining, rewritten, deadline)
    }

    fn abort_rebase(&self) -> Result<()> {
        self.repo
            .cleanup_state()
            .map_err(|e| GsError::adapter("abort_rebase", e))?;

        // Reset index and tracked paths to HEAD; untracked files stay
        let head = self
            .repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(|e| GsError::adapter("abort_rebase", e))?;
        self.repo
            .reset(head.as_object(), ResetType::Hard, None)
            .map_err(|e| GsError::adapter("abort_rebase", e))?;
        Ok(())
    }

    fn is_rebase_in_progress(&self) -> bool {
        self.repo.state() == RepositoryState::CherryPick
    }

    fn update_refs(&self, updates: &[RefUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .repo
            .transaction()
            .map_err(|e| GsError::adapter("update_refs", e))?;
        for update in updates {
            let refname = format!("refs/heads/{}", update.branch);
            tx.lock_ref(&refname)
                .map_err(|e| GsError::adapter("update_refs", e))?;
            match &update.new_tip {
                Some(tip) => {
                    let oid = self.resolve("update_refs", tip)?;
                    tx.set_target(&refname, oid, None, "ghoststack: move branch")
                        .map_err(|e| GsError::adapter("update_refs", e))?;
                }
                None => tx
                    .remove(&refname)
                    .map_err(|e| GsError::adapter("update_refs", e))?,
            }
        }
        tx.commit()
            .map_err(|e| GsError::adapter("update_refs", e))?;

        // The checked-out branch moved underneath the working tree; follow it
        if let Some(head) = self.current_branch()? {
            let head_moved = updates
                .iter()
                .any(|u| u.branch == head && u.new_tip.is_some());
            if head_moved && self.repo.state() == RepositoryState::Clean {
                let mut checkout = CheckoutBuilder::new();
                checkout.force();
                self.repo
                    .checkout_head(Some(&mut checkout))
                    .map_err(|e| GsError::adapter("update_refs", e))?;
            }
        }

        debug!("Applied {} ref update(s)", updates.len());
        Ok(())
    }

    fn stash_save(&self, message: &str) -> Result<String> {
        let mut repo = self.reopen("stash_save")?;
        let signature = Self::signature(&repo)?;
        let oid = repo
            .stash_save(&signature, message, Some(StashFlags::INCLUDE_UNTRACKED))
            .map_err(|e| GsError::adapter("stash_save", e))?;

        info!("Saved working tree snapshot {}", oid);
        Ok(oid.to_string())
    }

    fn stash_pop(&self, stash_ref: &str) -> Result<StashPop> {
        let mut repo = self.reopen("stash_pop")?;
        let target =
            Oid::from_str(stash_ref).map_err(|e| GsError::adapter("stash_pop", e))?;

        let mut position = None;
        repo.stash_foreach(|index, _message, oid| {
            if *oid == target {
                position = Some(index);
                false
            } else {
                true
            }
        })
        .map_err(|e| GsError::adapter("stash_pop", e))?;

        let index = position.ok_or_else(|| {
            GsError::adapter_msg("stash_pop", format!("stash {stash_ref} not found"))
        })?;

        let mut opts = StashApplyOptions::new();
        opts.reinstantiate_index();
        match repo.stash_pop(index, Some(&mut opts)) {
            Ok(()) => {
                info!("Restored working tree snapshot {}", stash_ref);
                Ok(StashPop::Restored)
            }
            Err(e) if matches!(e.code(), ErrorCode::Conflict | ErrorCode::MergeConflict) => {
                let files = repo
                    .index()
                    .map_err(|e| GsError::adapter("stash_pop", e))
                    .and_then(|index| Self::conflicted_paths(&index))
                    .unwrap_or_default();
                Ok(StashPop::Conflict { files })
            }
            Err(e) => Err(GsError::adapter("stash_pop", e)),
        }
    }

    fn changed_files(&self, old: &str, new: &str) -> Result<Vec<String>> {
        let old_tree = self
            .commit("changed_files", self.resolve("changed_files", old)?)?
            .tree()
            .map_err(|e| GsError::adapter("changed_files", e))?;
        let new_tree = self
            .commit("changed_files", self.resolve("changed_files", new)?)?
            .tree()
            .map_err(|e| GsError::adapter("changed_files", e))?;

        let diff = self
            .repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)
            .map_err(|e| GsError::adapter("changed_files", e))?;

        let files: BTreeSet<String> = diff
            .deltas()
            .filter_map(|delta| {
                delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .collect();
        Ok(files.into_iter().collect())
    }
}
