pub mod completions;
pub mod config;
pub mod init;
pub mod log;
pub mod stack;
pub mod status;
pub mod undo;

use crate::cli::output::Output;
use crate::errors::Result;
use crate::git::get_current_repository;
use crate::stack::StackManager;

/// Open the stack manager for the repository around the working directory
pub(crate) fn open_manager() -> Result<StackManager> {
    let manager = StackManager::from_repository(get_current_repository()?)?;
    if manager.settings().output.json {
        Output::set_json(true);
    }
    Ok(manager)
}
