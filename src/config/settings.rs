use crate::errors::{GsError, Result};
use crate::utils::atomic_file;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Trunk used by `gs init` when none is given and none can be detected
    pub trunk: Option<String>,
    pub sync: SyncSettings,
    pub stack: StackSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Snapshot a dirty working tree instead of refusing to run
    pub auto_stash: bool,
    /// Abandon a single branch replay after this many seconds
    pub step_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackSettings {
    /// Switch to a branch right after `stack add`
    pub checkout_on_add: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trunk: None,
            sync: SyncSettings::default(),
            stack: StackSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_stash: true,
            step_timeout_secs: None,
        }
    }
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            checkout_on_add: true,
        }
    }
}

impl Settings {
    /// Every key accepted by [`Settings::get_value`] and [`Settings::set_value`]
    pub const KEYS: [&'static str; 5] = [
        "trunk",
        "sync.auto_stash",
        "sync.step_timeout_secs",
        "stack.checkout_on_add",
        "output.json",
    ];

    /// Load settings from a single file, defaults if it does not exist
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| GsError::config(format!("Failed to read config file: {}", e)))?;

        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| GsError::config(format!("Failed to parse config file: {}", e)))?;

        Ok(settings)
    }

    /// Save settings to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        atomic_file::write_json(path, self)
    }

    /// Update a configuration value by key
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "trunk" => {
                self.trunk = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "sync.auto_stash" => self.sync.auto_stash = parse_bool(value)?,
            "sync.step_timeout_secs" => {
                self.sync.step_timeout_secs = match value {
                    "" | "none" => None,
                    secs => Some(secs.parse().map_err(|_| {
                        GsError::config(format!("Invalid number of seconds: {}", value))
                    })?),
                }
            }
            "stack.checkout_on_add" => self.stack.checkout_on_add = parse_bool(value)?,
            "output.json" => self.output.json = parse_bool(value)?,
            _ => return Err(GsError::config(format!("Unknown config key: {}", key))),
        }

        Ok(())
    }

    /// Get a configuration value by key
    pub fn get_value(&self, key: &str) -> Result<String> {
        let value = match key {
            "trunk" => self.trunk.clone().unwrap_or_default(),
            "sync.auto_stash" => self.sync.auto_stash.to_string(),
            "sync.step_timeout_secs" => self
                .sync
                .step_timeout_secs
                .map(|secs| secs.to_string())
                .unwrap_or_else(|| "none".to_string()),
            "stack.checkout_on_add" => self.stack.checkout_on_add.to_string(),
            "output.json" => self.output.json.to_string(),
            _ => return Err(GsError::config(format!("Unknown config key: {}", key))),
        };

        Ok(value)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .parse()
        .map_err(|_| GsError::config(format!("Invalid boolean value: {}", value)))
}
