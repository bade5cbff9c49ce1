//! Configuration types for tidefs
//!
//! Every section has a `Default`, so a config file only needs the keys it
//! overrides. [`Config::load`] layers an optional TOML file and
//! `TIDEFS__SECTION__KEY` environment variables over the defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TIDEFS";

/// Root configuration for the master
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Journal configuration
    pub journal: JournalConfig,
    /// Namespace limits
    pub master: MasterConfig,
}

impl Config {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(false));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Defaults with the journal rooted at `folder`
    pub fn with_journal_folder(folder: impl AsRef<Path>) -> Self {
        Self {
            journal: JournalConfig::with_folder(folder),
            ..Default::default()
        }
    }
}

/// Journal configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory holding the image and the edit log
    pub folder: PathBuf,
    /// File name of the image inside `folder`
    pub image_file: String,
    /// File name of the active edit log segment inside `folder`
    pub log_file: String,
    /// Sub-directory of `folder` holding completed segments
    pub completed_dir: String,
    /// Maximum size of an edit log segment before rotation
    pub max_log_size: u64,
    /// fsync after every append
    pub sync_on_write: bool,
    /// Buffer size for segment writers
    pub write_buffer_size: usize,
    /// Discard completed segments below this index when opening
    pub retain_from: Option<u64>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("/var/lib/tidefs/journal"),
            image_file: "image.data".to_string(),
            log_file: "log.data".to_string(),
            completed_dir: "completed".to_string(),
            max_log_size: 5 * 1024 * 1024, // 5MB
            sync_on_write: true,
            write_buffer_size: 64 * 1024, // 64KB
            retain_from: None,
        }
    }
}

impl JournalConfig {
    /// Defaults rooted at `folder`
    pub fn with_folder(folder: impl AsRef<Path>) -> Self {
        Self {
            folder: folder.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Full path of the image
    #[must_use]
    pub fn image_path(&self) -> PathBuf {
        self.folder.join(&self.image_file)
    }

    /// Full path of the active edit log segment
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.folder.join(&self.log_file)
    }

    /// Full path of the completed segment directory
    #[must_use]
    pub fn completed_path(&self) -> PathBuf {
        self.folder.join(&self.completed_dir)
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<()> {
        if self.max_log_size == 0 {
            return Err(Error::Configuration("max_log_size must be positive".into()));
        }
        for (key, name) in [
            ("image_file", &self.image_file),
            ("log_file", &self.log_file),
            ("completed_dir", &self.completed_dir),
        ] {
            if name.is_empty() || name.contains('/') {
                return Err(Error::Configuration(format!(
                    "{key} must be a plain file name, got '{name}'"
                )));
            }
        }
        if self.image_file == self.log_file {
            return Err(Error::Configuration(
                "image_file and log_file must differ".into(),
            ));
        }
        Ok(())
    }
}

/// Namespace limits
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Block size for files created without an explicit one
    pub default_block_size: u64,
    /// Exclusive upper bound on table columns
    pub max_columns: u32,
    /// Maximum size of a table's metadata blob
    pub max_table_metadata_bytes: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            default_block_size: 512 * 1024 * 1024, // 512MB
            max_columns: 1000,
            max_table_metadata_bytes: 5 * 1024 * 1024, // 5MB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_paths() {
        let config = JournalConfig::with_folder("/tmp/j");
        assert_eq!(config.image_path(), PathBuf::from("/tmp/j/image.data"));
        assert_eq!(config.log_path(), PathBuf::from("/tmp/j/log.data"));
        assert_eq!(config.completed_path(), PathBuf::from("/tmp/j/completed"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = JournalConfig::default();
        config.max_log_size = 0;
        assert!(config.validate().is_err());

        let mut config = JournalConfig::default();
        config.log_file = "a/b".into();
        assert!(config.validate().is_err());

        let mut config = JournalConfig::default();
        config.log_file = config.image_file.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.toml");
        std::fs::write(
            &path,
            "[journal]\nfolder = \"/data/journal\"\nmax_log_size = 1024\n\n[master]\nmax_columns = 16\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.journal.folder, PathBuf::from("/data/journal"));
        assert_eq!(config.journal.max_log_size, 1024);
        assert_eq!(config.journal.log_file, "log.data");
        assert_eq!(config.master.max_columns, 16);
        assert_eq!(config.master.max_table_metadata_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.journal.image_file, "image.data");
        assert!(config.journal.retain_from.is_none());
    }
}
