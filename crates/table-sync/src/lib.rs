//! # table-sync
//!
//! Upsert CSV exports into SQL Server or PostgreSQL tables.
//!
//! Each configured table is read from one delimited file, copied as text into
//! a session-scoped staging table and merged into the target on its primary
//! key:
//!
//! - **Upsert**: matching rows are overwritten, new keys are inserted
//! - **Non-destructive**: target rows missing from the file are left alone
//! - **Atomic**: all tables commit together or not at all
//! - **Idempotent**: re-running with the same files changes nothing
//!
//! ## Example
//!
//! ```rust,no_run
//! use table_sync::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> table_sync::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::connect(config).await?;
//!     let result = orchestrator.run(CancellationToken::new()).await?;
//!     println!("{} inserted, {} updated", result.rows_inserted, result.rows_updated);
//!     Ok(())
//! }
//! ```

pub mod coerce;
pub mod config;
pub mod error;
pub mod identifier;
pub mod loader;
pub mod merge;
pub mod orchestrator;
pub mod schema;
pub mod store;

// Re-exports for convenient access
pub use coerce::{CoercionError, SqlValue};
pub use config::{Config, StoreType, SyncConfig, TargetConfig};
pub use error::{Result, SyncError};
pub use loader::{Record, Relation};
pub use merge::KeyCollation;
pub use orchestrator::{HealthCheckResult, Orchestrator, SyncResult, TableReport};
pub use schema::{ColumnSpec, ColumnType, TableSpec};
pub use store::{MemoryDatabase, MergeOutcome, StagingTable, TargetStore};
