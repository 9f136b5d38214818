use super::open_manager;
use super::stack::print_stack;
use crate::cli::output::{short_id, Output};
use crate::errors::Result;
use crate::stack::{HaltReason, SyncPhase};
use console::style;

/// Show repository status
pub async fn run() -> Result<()> {
    let manager = open_manager()?;
    let report = manager.status()?;

    if Output::is_json() {
        return Output::json(&report);
    }

    match &report.current_branch {
        Some(branch) => Output::info(format!("On branch {}", style(branch).cyan())),
        None => Output::info("HEAD is detached"),
    }
    if report.dirty {
        Output::sub_item("Working tree has uncommitted changes");
    } else {
        Output::sub_item("Working tree clean");
    }

    if let Some(sync) = &report.sync {
        Output::section("Sync in progress");
        Output::bullet(format!("Operation: {}", short_id(&sync.operation_id.to_string())));
        let phase = match sync.phase {
            SyncPhase::Syncing => "interrupted while syncing",
            SyncPhase::Conflicted => "halted",
            SyncPhase::Aborting => "interrupted while aborting",
        };
        Output::bullet(format!("State: {phase}"));
        if let Some(branch) = &sync.branch {
            Output::bullet(format!("Branch: {}", style(branch).yellow()));
        }
        match sync.reason {
            Some(HaltReason::Conflict) => {
                Output::bullet("Reason: conflict");
                for file in &sync.files {
                    Output::sub_item(file);
                }
            }
            Some(HaltReason::Timeout) => Output::bullet("Reason: step timeout"),
            Some(HaltReason::Cancelled) => Output::bullet("Reason: cancelled"),
            None => {}
        }
        Output::next_steps(&[
            "Resume: gs stack sync --continue",
            "Roll back: gs stack sync --abort",
        ]);
    }

    Output::section("Stack");
    print_stack(&report.stack);

    if !report.interrupted.is_empty() {
        Output::section("Interrupted operations");
        for record in &report.interrupted {
            Output::bullet(format!(
                "{} {}",
                short_id(&record.id().to_string()),
                record.begin.kind
            ));
        }
        Output::tip("These never finished; the next mutating command marks them interrupted");
    }

    Ok(())
}
