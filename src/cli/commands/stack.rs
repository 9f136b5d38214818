use super::open_manager;
use crate::cli::output::{short_id, Output};
use crate::errors::{GsError, Result};
use crate::stack::{
    BranchStatus, BranchView, HaltReason, StackView, SyncOutcome, SyncReport,
};
use crate::utils::async_ops::run_git_operation;
use crate::utils::spinner::Spinner;
use clap::Subcommand;
use console::style;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Subcommand)]
pub enum StackAction {
    /// Show tracked branches as a tree
    List,

    /// Track a branch on top of another
    Add {
        /// Branch name; created at the parent's tip unless it exists
        name: String,
        /// Parent branch (defaults to the current branch)
        #[arg(long, short)]
        parent: Option<String>,
        /// Stay on the current branch
        #[arg(long)]
        no_checkout: bool,
    },

    /// Stop tracking a branch; its descendants become orphaned
    Remove {
        /// Branch to untrack
        name: String,
    },

    /// Delete an orphaned branch from the stack
    Prune {
        /// Orphaned branch to delete
        name: String,
    },

    /// Rebase every branch onto its parent's current tip
    Sync {
        /// Resume after resolving a conflict
        #[arg(long = "continue", conflicts_with = "abort")]
        resume: bool,
        /// Roll back a halted sync
        #[arg(long)]
        abort: bool,
    },
}

pub async fn run(action: StackAction) -> Result<()> {
    match action {
        StackAction::List => list_stack().await,
        StackAction::Add {
            name,
            parent,
            no_checkout,
        } => add_branch(name, parent, no_checkout).await,
        StackAction::Remove { name } => remove_branch(name).await,
        StackAction::Prune { name } => prune_branch(name).await,
        StackAction::Sync { resume, abort } => {
            if abort {
                abort_sync().await
            } else {
                sync_stack(resume).await
            }
        }
    }
}

async fn list_stack() -> Result<()> {
    let manager = open_manager()?;
    let view = manager.list()?;

    if Output::is_json() {
        return Output::json(&view);
    }
    print_stack(&view);
    Ok(())
}

async fn add_branch(name: String, parent: Option<String>, no_checkout: bool) -> Result<()> {
    let manager = open_manager()?;
    let checkout = if no_checkout { Some(false) } else { None };
    let node = manager.add_branch(&name, parent.as_deref(), checkout)?;

    if Output::is_json() {
        return Output::json(&node);
    }
    Output::success(format!(
        "Tracking '{}' on top of '{}'",
        style(&node.name).cyan(),
        node.parent
    ));
    Output::sub_item(format!("Base: {}", short_id(&node.base)));
    Ok(())
}

async fn remove_branch(name: String) -> Result<()> {
    let manager = open_manager()?;
    let orphaned = manager.remove_branch(&name)?;

    if Output::is_json() {
        return Output::json(&json!({ "removed": name, "orphaned": orphaned }));
    }
    Output::success(format!("Stopped tracking '{name}' (the git branch is kept)"));
    if !orphaned.is_empty() {
        Output::warning("These branches are now orphaned:");
        for branch in &orphaned {
            Output::bullet(branch);
        }
        Output::tip("Delete them from the stack with `gs stack prune <name>`");
    }
    Ok(())
}

async fn prune_branch(name: String) -> Result<()> {
    let manager = open_manager()?;
    manager.prune_branch(&name)?;

    if Output::is_json() {
        return Output::json(&json!({ "pruned": name }));
    }
    Output::success(format!("Pruned '{name}' from the stack"));
    Ok(())
}

async fn sync_stack(resume: bool) -> Result<()> {
    let manager = open_manager()?;
    let options = manager.sync_options();

    // Ctrl-C stops the walk at the next branch boundary
    let cancel = options.cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Cancellation requested");
            cancel.cancel();
        }
    });

    let spinner = if Output::is_json() {
        Spinner::hidden()
    } else if resume {
        Spinner::new("Resuming sync...".to_string())
    } else {
        Spinner::new("Syncing stack...".to_string())
    };

    let result = run_git_operation(move || {
        if resume {
            manager.sync_continue(options)
        } else {
            manager.sync(options)
        }
    })
    .await;

    watcher.abort();
    spinner.stop();
    report_sync(&result?)
}

fn report_sync(report: &SyncReport) -> Result<()> {
    if Output::is_json() {
        Output::json(report)?;
    }

    match &report.outcome {
        SyncOutcome::Completed => {
            if report.changes.is_empty() {
                Output::success("Stack is already up to date");
            } else {
                Output::success(format!("Synced {} branch(es)", report.changes.len()));
                for change in &report.changes {
                    Output::sub_item(format!(
                        "{}: {} → {}",
                        style(&change.branch).cyan(),
                        short_id(&change.old_tip),
                        short_id(&change.new_tip)
                    ));
                }
            }
            if !report.hints.is_empty() {
                Output::section("Worth a look");
                for hint in &report.hints {
                    Output::bullet(format!("{} ({:.2}): {}", hint.path, hint.score, hint.reason));
                }
            }
            Ok(())
        }
        SyncOutcome::Halted(halt) => {
            match halt.reason {
                HaltReason::Conflict => {}
                HaltReason::Timeout => {
                    Output::warning(format!("Rebasing '{}' exceeded the step timeout", halt.branch))
                }
                HaltReason::Cancelled => {
                    Output::warning(format!("Sync cancelled before '{}'", halt.branch))
                }
            }
            Err(GsError::RebaseConflict {
                branch: halt.branch.clone(),
                operation_id: report.operation_id.to_string(),
                files: halt.files.clone(),
            })
        }
    }
}

async fn abort_sync() -> Result<()> {
    let manager = open_manager()?;
    let report = run_git_operation(move || manager.sync_abort()).await?;

    if Output::is_json() {
        return Output::json(&report);
    }
    Output::success(format!(
        "Sync {} aborted; the stack is back where it started",
        short_id(&report.operation_id.to_string())
    ));
    for branch in &report.restored {
        Output::sub_item(format!("Restored {}", style(branch).cyan()));
    }
    Ok(())
}

/// Render the stack as a tree rooted at trunk
pub(crate) fn print_stack(view: &StackView) {
    Output::line(format!("{} {}", style(&view.trunk).bold(), style("(trunk)").dim()));

    if view.chains.is_empty() {
        Output::line(style("  (no tracked branches)").dim());
    }

    let count = view.chains.len();
    for (index, chain) in view.chains.iter().enumerate() {
        let last_chain = index + 1 == count;
        let rail = if last_chain { "    " } else { "│   " };
        for (depth, branch) in chain.iter().enumerate() {
            let line = if depth == 0 {
                let connector = if last_chain { "└── " } else { "├── " };
                format!("{connector}{}", branch_label(branch))
            } else {
                format!("{rail}{}└── {}", "    ".repeat(depth - 1), branch_label(branch))
            };
            Output::line(line);
        }
    }

    if !view.orphans.is_empty() {
        Output::section("Orphaned");
        for branch in &view.orphans {
            Output::bullet(format!(
                "{} (was on '{}')",
                branch_label(branch),
                branch.parent
            ));
        }
    }
}

fn branch_label(branch: &BranchView) -> String {
    let name = if branch.current {
        format!("{} {}", style("*").green(), style(&branch.name).green().bold())
    } else {
        branch.name.clone()
    };
    format!(
        "{} {} {}",
        name,
        status_label(branch.status),
        style(short_id(&branch.tip)).dim()
    )
}

fn status_label(status: BranchStatus) -> String {
    let label = format!("[{status}]");
    match status {
        BranchStatus::Clean => style(label).green().to_string(),
        BranchStatus::NeedsRestack => style(label).yellow().to_string(),
        BranchStatus::Conflicted => style(label).red().to_string(),
        BranchStatus::Orphaned => style(label).dim().to_string(),
    }
}
