use super::open_manager;
use crate::cli::output::Output;
use crate::config::{self, user_config_path, Settings};
use crate::errors::{GsError, Result};
use clap::Subcommand;
use std::collections::BTreeMap;
use std::fs;

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., sync.auto_stash)
        key: String,
        /// Configuration value
        value: String,
        /// Write to the per-user file instead of the repository
        #[arg(long)]
        global: bool,
    },

    /// Get the effective value of a key
    Get {
        /// Configuration key
        key: String,
    },

    /// List all effective configuration values
    List,
}

/// Handle configuration commands
pub async fn run(action: ConfigAction) -> Result<()> {
    let manager = open_manager()?;

    match action {
        ConfigAction::Set { key, value, global } => {
            if global {
                let path = user_config_path().ok_or_else(|| {
                    GsError::config("Could not determine the user configuration directory")
                })?;
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut settings = Settings::load_from_file(&path)?;
                settings.set_value(&key, &value)?;
                settings.save_to_file(&path)?;
            } else {
                manager.store().ensure_initialized()?;
                let mut settings = config::load_repo_file(manager.store())?;
                settings.set_value(&key, &value)?;
                config::save_repo_file(manager.store(), &settings)?;
            }

            if Output::is_json() {
                return Output::json(&serde_json::json!({ "key": key, "value": value }));
            }
            Output::success(format!("Configuration updated: {key} = {value}"));
            Ok(())
        }
        ConfigAction::Get { key } => {
            let value = manager.settings().get_value(&key)?;
            if Output::is_json() {
                return Output::json(&serde_json::json!({ "key": key, "value": value }));
            }
            Output::line(value);
            Ok(())
        }
        ConfigAction::List => {
            let mut values = BTreeMap::new();
            for key in Settings::KEYS {
                values.insert(key, manager.settings().get_value(key)?);
            }
            if Output::is_json() {
                return Output::json(&values);
            }
            for (key, value) in values {
                Output::line(format!("{key} = {value}"));
            }
            Ok(())
        }
    }
}
