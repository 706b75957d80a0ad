//! Target store abstraction.
//!
//! A [`TargetStore`] is one session on the target database. The orchestrator
//! owns it exclusively for a run and drives it through a fixed protocol:
//!
//! ```text
//! begin
//!   create_staging -> bulk_insert -> merge -> drop_staging   (per table)
//! commit | rollback
//! ```
//!
//! Implementations:
//! - [`mssql::MssqlStore`]: SQL Server over TDS (`#temp` staging, `MERGE`)
//! - [`postgres::PgStore`]: PostgreSQL (temporary staging, `INSERT .. ON CONFLICT`)
//! - [`memory::MemoryDatabase`]: in-process transactional store for tests

pub mod memory;
pub mod mssql;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{StoreType, TargetConfig};
use crate::error::{Result, SyncError};
use crate::loader::Relation;
use crate::merge::KeyCollation;
use crate::schema::TableSpec;

pub use memory::{MemoryDatabase, MemorySession};
pub use mssql::MssqlStore;
pub use postgres::PgStore;

/// Handle to a session-scoped staging table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingTable {
    /// Owning target table.
    pub table: String,
    /// Unquoted staging table name.
    pub name: String,
    /// Quoted name, ready to embed in SQL.
    pub quoted: String,
    /// Staging columns, in `TableSpec::columns` order.
    pub columns: Vec<String>,
    /// Character width of every staging column.
    pub width: usize,
}

/// Row counts reported by a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub inserted: u64,
    pub updated: u64,
}

/// One session on the target database.
#[async_trait]
pub trait TargetStore: Send {
    /// Open the transaction that spans the whole run.
    async fn begin(&mut self) -> Result<()>;

    /// Create the session-scoped staging table for `spec`, every column
    /// `width` characters of text.
    async fn create_staging(&mut self, spec: &TableSpec, width: usize) -> Result<StagingTable>;

    /// Insert every row of `relation` into `staging` as text.
    /// Returns the number of rows inserted.
    async fn bulk_insert(&mut self, staging: &StagingTable, relation: &Relation) -> Result<u64>;

    /// Upsert `staging` into the target table of `spec`.
    async fn merge(&mut self, spec: &TableSpec, staging: &StagingTable) -> Result<MergeOutcome>;

    /// Drop the staging table.
    async fn drop_staging(&mut self, staging: &StagingTable) -> Result<()>;

    /// Commit the run's transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the run's transaction. Safe to call when none is open.
    async fn rollback(&mut self) -> Result<()>;

    /// Round-trip a trivial query.
    async fn ping(&mut self) -> Result<()>;

    /// Get the database type.
    fn db_type(&self) -> &str;

    /// How this target compares text primary keys.
    fn key_collation(&self) -> KeyCollation {
        KeyCollation::Exact
    }
}

/// Open a session on the configured target.
pub async fn connect(config: &TargetConfig, batch_size: usize) -> Result<Box<dyn TargetStore>> {
    let connection_string = config.resolve_connection_string()?;
    let store: Box<dyn TargetStore> = match config.r#type {
        StoreType::Mssql => Box::new(
            MssqlStore::connect(&connection_string, config.schema())
                .await?
                .with_batch_size(batch_size),
        ),
        StoreType::Postgres => Box::new(
            PgStore::connect(&connection_string, config.schema())
                .await?
                .with_batch_size(batch_size),
        ),
    };
    info!("Connected to {} target (schema {})", store.db_type(), config.schema());
    Ok(store)
}

/// Rows per multi-row INSERT given the configured batch size and the
/// dialect's limits on rows and bind parameters per statement.
pub fn rows_per_batch(batch_size: usize, columns: usize, max_rows: usize, max_params: usize) -> usize {
    let by_params = if columns > 0 { max_params / columns } else { max_rows };
    batch_size.min(max_rows).min(by_params).max(1)
}

/// Reject values longer than the staging column width before they are sent.
///
/// `measure` is the dialect's notion of length.
pub(crate) fn check_width<F>(staging: &StagingTable, relation: &Relation, measure: F) -> Result<()>
where
    F: Fn(&str) -> usize,
{
    for record in &relation.records {
        for (value, column) in record.values.iter().zip(&staging.columns) {
            let Some(v) = value else { continue };
            let len = measure(v);
            if len > staging.width {
                return Err(SyncError::insert(
                    &staging.table,
                    format!(
                        "line {}: value of {} is {} characters, staging width is {}",
                        record.line, column, len, staging.width
                    ),
                ));
            }
        }
    }
    Ok(())
}
