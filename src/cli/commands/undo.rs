use super::open_manager;
use crate::cli::output::{short_id, Output};
use crate::errors::{GsError, Result};
use crate::oplog::Journal;
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm};

/// Reverse an operation after confirmation
pub async fn run(id: Option<String>, yes: bool) -> Result<()> {
    let manager = open_manager()?;
    manager.store().ensure_initialized()?;

    if !yes {
        if Output::is_json() || !console::user_attended() {
            return Err(GsError::validation(
                "Refusing to undo without confirmation; pass --yes",
            ));
        }

        let journal = Journal::new(manager.store());
        let target = match id.as_deref() {
            Some(id) => journal.find(id)?,
            None => journal
                .last_finished()?
                .ok_or_else(|| GsError::OperationNotFound("no operations recorded".into()))?,
        };
        let prompt = format!(
            "Undo {} ({})?",
            short_id(&target.id().to_string()),
            target.begin.kind
        );
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| GsError::config(format!("Failed to get user confirmation: {e}")))?;
        if !confirmed {
            Output::info("Undo cancelled");
            return Ok(());
        }
    }

    let report = manager.undo(id.as_deref())?;

    if Output::is_json() {
        return Output::json(&report);
    }
    Output::success(format!(
        "Undid {} ({})",
        style(short_id(&report.target.to_string())).yellow(),
        report.kind
    ));
    for branch in &report.restored {
        Output::sub_item(format!("Restored {}", style(branch).cyan()));
    }
    Output::tip(format!(
        "The undo is itself recorded as {}",
        short_id(&report.operation_id.to_string())
    ));
    Ok(())
}
