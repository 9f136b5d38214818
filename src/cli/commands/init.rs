use super::open_manager;
use crate::cli::output::Output;
use crate::errors::Result;
use serde_json::json;

/// Initialize the repository for GhostStack
pub async fn run(trunk: Option<String>, force: bool) -> Result<()> {
    let manager = open_manager()?;
    let graph = manager.init(trunk.as_deref(), force)?;

    if Output::is_json() {
        return Output::json(&json!({
            "trunk": graph.trunk,
            "tracked": graph.branches.len(),
            "metadata_dir": manager.store().root(),
        }));
    }

    Output::success(format!("Initialized GhostStack with trunk '{}'", graph.trunk));
    Output::sub_item(format!("Metadata: {}", manager.store().root().display()));
    Output::next_steps(&[
        "Start a stacked branch: gs stack add <name>",
        "Rebase the stack onto trunk: gs stack sync",
    ]);
    Ok(())
}
