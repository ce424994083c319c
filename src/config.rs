use crate::load::DEFAULT_MAX_DEPTH;
use crate::{Error, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory
pub const CONFIG_FILE: &str = "liteorm.toml";

/// Database used when neither `--database` nor `database` is set
pub const DEFAULT_DATABASE: &str = ".liteorm/liteorm.db";

/// Store settings, loadable from `liteorm.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file used by the CLI when `--database` is not given
    pub database: Option<String>,
    /// Schema file used by the CLI when `--schema` is not given
    pub schema: Option<String>,
    /// Maximum chain of nested references resolved when loading
    pub max_depth: usize,
    /// Drop undeclared columns during `migrate` (destroys their data)
    pub drop_stale_columns: bool,
    /// SQLite busy timeout
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: None,
            schema: None,
            max_depth: DEFAULT_MAX_DEPTH,
            drop_stale_columns: false,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Read `path`. A missing file is `None`, not an error.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: StoreConfig = toml::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(Some(config))
    }

    /// Write the config as TOML, refusing to replace an existing file unless
    /// `overwrite` is set
    pub fn save(&self, path: &Path, overwrite: bool) -> anyhow::Result<()> {
        self.validate()?;
        if path.exists() && !overwrite {
            anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
        }
        std::fs::write(path, toml::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Reject settings the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(Error::Config(
                "max_depth must be at least 1 or no reference could be loaded".into(),
            ));
        }
        for (key, value) in [("database", &self.database), ("schema", &self.schema)] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(Error::Config(format!("{} may not be empty", key)));
            }
        }
        Ok(())
    }

    /// Database to open: the configured one, else [`DEFAULT_DATABASE`],
    /// relative paths taken from `base`
    pub fn database_path(&self, base: &Path) -> PathBuf {
        base.join(self.database.as_deref().unwrap_or(DEFAULT_DATABASE))
    }

    /// Configured schema file, relative paths taken from `base`
    pub fn schema_path(&self, base: &Path) -> Option<PathBuf> {
        self.schema.as_deref().map(|schema| base.join(schema))
    }
}
