use super::open_manager;
use crate::cli::output::{short_id, Output};
use crate::errors::Result;
use crate::oplog::OperationResult;
use console::style;

/// Show the operation log, newest first
pub async fn run(limit: Option<usize>) -> Result<()> {
    let manager = open_manager()?;
    let records = manager.history(limit)?;

    if Output::is_json() {
        return Output::json(&records);
    }

    if records.is_empty() {
        Output::info("No operations recorded yet");
        return Ok(());
    }

    for record in &records {
        let id = record.id().to_string();
        let result = match record.result() {
            Some(OperationResult::Success) => style("success".to_string()).green(),
            Some(result @ OperationResult::Conflict { .. })
            | Some(result @ OperationResult::RestoreConflict { .. }) => {
                style(result.to_string()).yellow()
            }
            Some(result @ OperationResult::Failed { .. })
            | Some(result @ OperationResult::Interrupted) => style(result.to_string()).red(),
            Some(result) => style(result.to_string()).dim(),
            None => style("in progress".to_string()).cyan(),
        };

        Output::line(format!(
            "{} {} {} {}",
            style(short_id(&id)).yellow(),
            style(record.begin.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            record.begin.kind,
            result
        ));

        if !record.begin.affected.is_empty() {
            Output::sub_item(style(record.begin.affected.join(", ")).dim());
        }
    }
    Ok(())
}
