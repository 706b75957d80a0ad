//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::schema::TableSpec;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target database configuration.
    pub target: TargetConfig,

    /// Synchronization behavior configuration.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Tables to synchronize, processed in this order.
    pub tables: Vec<TableSpec>,
}

/// Kind of target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// Microsoft SQL Server.
    #[default]
    Mssql,

    /// PostgreSQL.
    #[serde(alias = "postgresql")]
    Postgres,
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Mssql => write!(f, "mssql"),
            StoreType::Postgres => write!(f, "postgres"),
        }
    }
}

/// Target database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (default: mssql).
    #[serde(default)]
    pub r#type: StoreType,

    /// Target schema (default: "dbo" for mssql, "public" for postgres).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Environment variable holding the connection string (default: SQLSERVER_CNXN).
    #[serde(default = "default_connection_env")]
    pub connection_env: String,

    /// Inline connection string. Takes precedence over `connection_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("schema", &self.schema)
            .field("connection_env", &self.connection_env)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl TargetConfig {
    /// Effective target schema.
    pub fn schema(&self) -> &str {
        match (&self.schema, self.r#type) {
            (Some(schema), _) => schema,
            (None, StoreType::Mssql) => "dbo",
            (None, StoreType::Postgres) => "public",
        }
    }
}

/// Synchronization behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory holding `<table>.csv` input files (default: "data").
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Field delimiter of the input files (default: ',').
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Rows per multi-row staging INSERT, before dialect limits (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Character width of every staging column (default: 4000).
    #[serde(default = "default_staging_width")]
    pub staging_width: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            delimiter: default_delimiter(),
            batch_size: default_batch_size(),
            staging_width: default_staging_width(),
        }
    }
}

/// Largest staging width that still maps to a bounded NVARCHAR.
pub const MAX_STAGING_WIDTH: usize = 4000;

// Default value functions for serde
fn default_connection_env() -> String {
    "SQLSERVER_CNXN".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_delimiter() -> char {
    ','
}

fn default_batch_size() -> usize {
    1_000
}

fn default_staging_width() -> usize {
    MAX_STAGING_WIDTH
}
