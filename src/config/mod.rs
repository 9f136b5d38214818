pub mod settings;

pub use settings::{OutputSettings, Settings, StackSettings, SyncSettings};

use crate::errors::{GsError, Result};
use crate::store::{MetadataStore, CONFIG_FILE};
use config::{Config, Environment, File, FileFormat};
use std::path::PathBuf;

/// Environment variables override files: `GHOSTSTACK__SYNC__AUTO_STASH=false`
pub const ENV_PREFIX: &str = "GHOSTSTACK";

/// Get the per-user configuration file (`<config dir>/ghoststack/config.json`)
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ghoststack").join("config.json"))
}

/// Resolve settings: defaults, then the user file, then the repository
/// file, then the environment.
pub fn load(store: Option<&MetadataStore>) -> Result<Settings> {
    let defaults = Config::try_from(&Settings::default())
        .map_err(|e| GsError::config(format!("Failed to build defaults: {e}")))?;

    let mut builder = Config::builder().add_source(defaults);

    if let Some(path) = user_config_path() {
        builder = builder.add_source(File::from(path).format(FileFormat::Json).required(false));
    }
    if let Some(store) = store {
        builder = builder.add_source(
            File::from(store.path(CONFIG_FILE))
                .format(FileFormat::Json)
                .required(false),
        );
    }

    builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|config| config.try_deserialize::<Settings>())
        .map_err(|e| GsError::config(format!("Failed to load configuration: {e}")))
}

/// The repository's own file only, as `config set` edits it
pub fn load_repo_file(store: &MetadataStore) -> Result<Settings> {
    Settings::load_from_file(&store.path(CONFIG_FILE))
}

pub fn save_repo_file(store: &MetadataStore, settings: &Settings) -> Result<()> {
    store.create()?;
    settings.save_to_file(&store.path(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::STORE_DIR;
    use tempfile::TempDir;

    #[test]
    fn test_repo_file_overrides_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::at(tmp.path().join(STORE_DIR));

        let mut settings = Settings::default();
        settings.set_value("sync.auto_stash", "false").unwrap();
        settings.set_value("sync.step_timeout_secs", "12").unwrap();
        save_repo_file(&store, &settings).unwrap();

        let loaded = load(Some(&store)).unwrap();
        assert!(!loaded.sync.auto_stash);
        assert_eq!(loaded.sync.step_timeout_secs, Some(12));
        assert!(loaded.stack.checkout_on_add);
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::at(tmp.path().join(STORE_DIR));

        let repo_only = load_repo_file(&store).unwrap();
        assert_eq!(repo_only, Settings::default());
    }
}
