//! Error types for the synchronization library.

use std::path::PathBuf;

use thiserror::Error;

use crate::coerce::CoercionError;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection failures.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for source data problems (missing files, bad columns, bad values).
pub const EXIT_SOURCE_ERROR: u8 = 3;
/// Exit code for failures reported by the target store.
pub const EXIT_TARGET_ERROR: u8 = 4;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for I/O errors, including writing JSON output.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for synchronization runs.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not reach the target store.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The input file for a table does not exist.
    #[error("Source file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A declared column is absent from the input file header.
    #[error("Column {column} of table {table} not found in {}", path.display())]
    SchemaMismatch {
        table: String,
        column: String,
        path: PathBuf,
    },

    /// Malformed CSV input.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Staging table could not be created.
    #[error("Staging table creation failed for {table}: {message}")]
    Ddl { table: String, message: String },

    /// Rows could not be inserted into the staging table.
    #[error("Staging insert failed for {table}: {message}")]
    Insert { table: String, message: String },

    /// Two input rows share the same primary key value.
    #[error("Duplicate primary key {key} in input for table {table}")]
    DuplicateKey { table: String, key: String },

    /// The merge statement was rejected by the target.
    #[error("Merge failed for table {table}: {message}")]
    Merge { table: String, message: String },

    /// A staged value cannot be converted to its column type.
    #[error("Merge failed for table {table}: column {column} at line {line}: {source}")]
    Coercion {
        table: String,
        column: String,
        line: u64,
        #[source]
        source: CoercionError,
    },

    /// SQL Server driver error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Synchronization cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a Ddl error
    pub fn ddl(table: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Ddl {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create an Insert error
    pub fn insert(table: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Insert {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Merge error
    pub fn merge(table: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Merge {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) | SyncError::Yaml(_) => EXIT_CONFIG_ERROR,
            SyncError::Connection(_) => EXIT_CONNECTION_ERROR,
            SyncError::NotFound(_)
            | SyncError::SchemaMismatch { .. }
            | SyncError::Csv(_)
            | SyncError::DuplicateKey { .. }
            | SyncError::Coercion { .. } => EXIT_SOURCE_ERROR,
            SyncError::Ddl { .. }
            | SyncError::Insert { .. }
            | SyncError::Merge { .. }
            | SyncError::Mssql(_)
            | SyncError::Postgres(_) => EXIT_TARGET_ERROR,
            SyncError::Cancelled => EXIT_CANCELLED,
            SyncError::Io(_) | SyncError::Json(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
