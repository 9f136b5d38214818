pub mod repository;
pub mod vcs;

pub use repository::GitRepository;
pub use vcs::{ConflictInfo, RebaseOutcome, RebaseProgress, RefUpdate, StashPop, Vcs};

use crate::errors::{GsError, Result};
use std::path::{Path, PathBuf};

/// Find the root of the Git repository
pub fn find_repository_root(start_path: &Path) -> Result<PathBuf> {
    let repo = git2::Repository::discover(start_path)
        .map_err(|_| GsError::not_initialized("Not in a Git repository"))?;

    let workdir = repo
        .workdir()
        .ok_or_else(|| GsError::config("Repository has no working directory (bare repo?)"))?;

    Ok(workdir.to_path_buf())
}

/// Get the current working directory as a Git repository
pub fn get_current_repository() -> Result<GitRepository> {
    let current_dir = std::env::current_dir()
        .map_err(|e| GsError::config(format!("Could not get current directory: {e}")))?;

    let repo_root = find_repository_root(&current_dir)?;
    GitRepository::open(&repo_root)
}
