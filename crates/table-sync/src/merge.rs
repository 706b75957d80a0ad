//! Merge reconciler: checks a relation can be merged, then upserts a staged
//! table into its target.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::coerce::{coerce, SqlValue};
use crate::config::StoreType;
use crate::error::{Result, SyncError};
use crate::loader::Relation;
use crate::schema::TableSpec;
use crate::store::{MergeOutcome, StagingTable, TargetStore};

/// How the target compares text primary keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCollation {
    /// Byte-for-byte equality.
    #[default]
    Exact,

    /// Case-insensitive, trailing spaces ignored. SQL Server's default
    /// collation with ANSI padding.
    IgnoreCaseAndTrailingSpaces,
}

impl KeyCollation {
    /// Key comparison used by a target of type `store`.
    pub fn for_store(store: StoreType) -> Self {
        match store {
            StoreType::Mssql => KeyCollation::IgnoreCaseAndTrailingSpaces,
            StoreType::Postgres => KeyCollation::Exact,
        }
    }

    /// The form under which two keys compare equal on the target.
    fn normalize(self, key: &SqlValue) -> SqlValue {
        match (self, key) {
            (KeyCollation::IgnoreCaseAndTrailingSpaces, SqlValue::Text(s)) => {
                SqlValue::Text(s.trim_end_matches(' ').to_lowercase())
            }
            _ => key.clone(),
        }
    }
}

/// Check every value of `relation` against its declared column type and
/// require primary keys to be unique under `collation`.
///
/// Keys are compared after coercion, so `7` and ` 7` collide in an integer
/// key column. Runs before anything is staged: a relation that passes cannot
/// make the merge statement touch one target row twice.
pub fn validate(spec: &TableSpec, relation: &Relation, collation: KeyCollation) -> Result<()> {
    let key_index = spec.key_index().ok_or_else(|| {
        SyncError::Config(format!(
            "table {}: primary_key {} is not one of its columns",
            spec.name, spec.primary_key
        ))
    })?;

    let mut first_seen: HashMap<SqlValue, u64> = HashMap::with_capacity(relation.len());
    for record in &relation.records {
        let mut key = SqlValue::Null;
        for (idx, (raw, column)) in record.values.iter().zip(&spec.columns).enumerate() {
            let value = coerce(raw.as_deref(), column).map_err(|source| SyncError::Coercion {
                table: spec.name.clone(),
                column: column.name.clone(),
                line: record.line,
                source,
            })?;
            if idx == key_index {
                key = value;
            }
        }

        if let Some(first) = first_seen.insert(collation.normalize(&key), record.line) {
            return Err(SyncError::DuplicateKey {
                table: spec.name.clone(),
                key: format!("{} (lines {} and {})", key, first, record.line),
            });
        }
    }

    debug!("{}: {} rows validated", spec.name, relation.len());
    Ok(())
}

/// Merge `staging` into the target table of `spec`, then drop the staging
/// table whether or not the merge succeeded.
///
/// A merge error takes precedence over a cleanup error.
pub async fn reconcile(
    store: &mut dyn TargetStore,
    spec: &TableSpec,
    staging: &StagingTable,
) -> Result<MergeOutcome> {
    let merged = store.merge(spec, staging).await;
    let dropped = store.drop_staging(staging).await;

    match (merged, dropped) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => {
            warn!(
                "{}: dropping staging table {} after failed merge: {}",
                spec.name, staging.name, cleanup
            );
            Err(e)
        }
    }
}
