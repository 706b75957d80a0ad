//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};
use crate::schema::TableSpec;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Keep only the named tables, preserving configured order.
    pub fn retain_tables(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        if let Some(unknown) = names
            .iter()
            .find(|n| !self.tables.iter().any(|t| t.name.eq_ignore_ascii_case(n)))
        {
            return Err(SyncError::Config(format!("unknown table: {}", unknown)));
        }
        self.tables
            .retain(|t| names.iter().any(|n| t.name.eq_ignore_ascii_case(n)));
        Ok(())
    }

    /// Path of the source file for `table`.
    pub fn source_path(&self, table: &TableSpec) -> PathBuf {
        match &table.file {
            Some(file) => PathBuf::from(file),
            None => self.sync.data_dir.join(format!("{}.csv", table.name)),
        }
    }
}

impl TargetConfig {
    /// Resolve the connection string.
    ///
    /// Reads the environment only when called, so a missing variable surfaces
    /// at connect time rather than at load time.
    pub fn resolve_connection_string(&self) -> Result<String> {
        if let Some(inline) = &self.connection_string {
            return Ok(inline.clone());
        }
        match std::env::var(&self.connection_env) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(SyncError::Connection(format!(
                "environment variable {} is not set",
                self.connection_env
            ))),
        }
    }
}
