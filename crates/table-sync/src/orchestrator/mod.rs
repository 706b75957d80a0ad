//! Sync orchestrator - runs every configured table through load, stage and
//! merge inside one transaction.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::loader;
use crate::merge::{self, KeyCollation};
use crate::schema::TableSpec;
use crate::store::{self, TargetStore};

/// Sync orchestrator.
///
/// Owns the target session for the whole run. Tables are processed strictly
/// in configured order and the run either commits all of them or none.
pub struct Orchestrator {
    config: Config,
    store: Box<dyn TargetStore>,
}

/// Result of a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run committed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Per-table results, in processing order.
    pub tables: Vec<TableReport>,

    /// Rows loaded from source files after de-duplication.
    pub rows_loaded: u64,

    pub rows_inserted: u64,
    pub rows_updated: u64,
}

/// What happened to one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    /// Data rows in the source file.
    pub rows_read: u64,
    /// Exact duplicate rows dropped at load.
    pub duplicates_removed: u64,
    pub rows_staged: u64,
    pub inserted: u64,
    pub updated: u64,
}

/// Result of a target health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub target_type: String,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

impl Orchestrator {
    /// Create an orchestrator over an already open target session.
    pub fn new(config: Config, store: Box<dyn TargetStore>) -> Self {
        Self { config, store }
    }

    /// Connect to the configured target and create an orchestrator.
    pub async fn connect(config: Config) -> Result<Self> {
        let store = store::connect(&config.target, config.sync.batch_size).await?;
        Ok(Self::new(config, store))
    }

    /// Run the sync.
    ///
    /// On any error the transaction is rolled back and the error returned;
    /// tables after the failing one are not attempted.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SyncResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Starting sync run {} ({} tables, target {})",
            run_id,
            self.config.tables.len(),
            self.store.db_type()
        );

        let mut reports = Vec::with_capacity(self.config.tables.len());
        let outcome = match self.sync_all(&cancel, &mut reports).await {
            Ok(()) => self.store.commit().await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            if let Err(rollback_err) = self.store.rollback().await {
                warn!("Rollback failed: {}", rollback_err);
            } else {
                info!("Rolled back run {}", run_id);
            }
            return Err(e);
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let result = SyncResult {
            run_id,
            status: "completed".to_string(),
            started_at,
            completed_at,
            duration_seconds: duration,
            rows_loaded: reports.iter().map(|r| r.rows_staged).sum(),
            rows_inserted: reports.iter().map(|r| r.inserted).sum(),
            rows_updated: reports.iter().map(|r| r.updated).sum(),
            tables: reports,
        };

        info!(
            "Sync run {} committed: {} inserted, {} updated in {:.2}s",
            result.run_id, result.rows_inserted, result.rows_updated, result.duration_seconds
        );
        Ok(result)
    }

    async fn sync_all(
        &mut self,
        cancel: &CancellationToken,
        reports: &mut Vec<TableReport>,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        self.store.begin().await?;

        let tables = self.config.tables.clone();
        for spec in &tables {
            check_cancelled(cancel)?;
            let report = self.sync_table(spec, cancel).await?;
            reports.push(report);
        }

        check_cancelled(cancel)
    }

    async fn sync_table(&mut self, spec: &TableSpec, cancel: &CancellationToken) -> Result<TableReport> {
        let table_start = Instant::now();
        let path = self.config.source_path(spec);
        info!("{}: loading {}", spec.name, path.display());

        let relation = loader::load(spec, &path, self.config.sync.delimiter)?;
        merge::validate(spec, &relation, self.store.key_collation())?;
        check_cancelled(cancel)?;

        let staging = self
            .store
            .create_staging(spec, self.config.sync.staging_width)
            .await?;
        check_cancelled(cancel)?;

        let staged = self.store.bulk_insert(&staging, &relation).await?;
        if staged != relation.len() as u64 {
            return Err(SyncError::insert(
                &spec.name,
                format!("staged {} of {} rows", staged, relation.len()),
            ));
        }
        check_cancelled(cancel)?;

        let merged = merge::reconcile(self.store.as_mut(), spec, &staging).await?;

        info!(
            "{}: {} rows ({} duplicates removed), {} inserted, {} updated",
            spec.name, staged, relation.duplicates_removed, merged.inserted, merged.updated
        );
        debug!("{}: completed in {:?}", spec.name, table_start.elapsed());

        Ok(TableReport {
            table: spec.name.clone(),
            rows_read: relation.rows_read as u64,
            duplicates_removed: relation.duplicates_removed as u64,
            rows_staged: staged,
            inserted: merged.inserted,
            updated: merged.updated,
        })
    }

    /// Load and validate every source file without touching the target.
    pub fn check(config: &Config) -> Result<Vec<TableReport>> {
        config
            .tables
            .iter()
            .map(|spec| {
                let path = config.source_path(spec);
                let relation = loader::load(spec, &path, config.sync.delimiter)?;
                merge::validate(spec, &relation, KeyCollation::for_store(config.target.r#type))?;
                info!("{}: {} rows OK", spec.name, relation.len());
                Ok(TableReport {
                    table: spec.name.clone(),
                    rows_read: relation.rows_read as u64,
                    duplicates_removed: relation.duplicates_removed as u64,
                    ..Default::default()
                })
            })
            .collect()
    }

    /// Connect to the target and round-trip a trivial query.
    ///
    /// Failures are reported in the result rather than returned.
    pub async fn health_check(config: &Config) -> HealthCheckResult {
        let start = Instant::now();
        let error = ping_target(config).await.err().map(|e| e.to_string());
        let connected = error.is_none();

        HealthCheckResult {
            target_type: config.target.r#type.to_string(),
            target_connected: connected,
            target_latency_ms: start.elapsed().as_millis() as u64,
            target_error: error,
            healthy: connected,
        }
    }
}

async fn ping_target(config: &Config) -> Result<()> {
    let mut store = store::connect(&config.target, config.sync.batch_size).await?;
    store.ping().await
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

impl SyncResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
