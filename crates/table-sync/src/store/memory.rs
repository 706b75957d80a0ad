//! In-process target store.
//!
//! [`MemoryDatabase`] holds committed tables. Each [`MemorySession`] works on
//! a private copy of them between `begin` and `commit`, so a rolled back run
//! leaves the database exactly as it found it. Staging tables are private to
//! the session, as temp tables are on a real server.
//!
//! Sessions are not isolated from each other: the last commit wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{check_width, MergeOutcome, StagingTable, TargetStore};
use crate::coerce::{coerce, CoercionError, SqlValue};
use crate::error::{Result, SyncError};
use crate::identifier::staging_name;
use crate::loader::Relation;
use crate::schema::{ColumnSpec, TableSpec};

/// A committed table: typed rows keyed by a single primary key column.
#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<ColumnSpec>,
    key_index: usize,
    rows: Vec<Vec<SqlValue>>,
}

impl MemoryTable {
    fn position(&self, key: &SqlValue) -> Option<usize> {
        self.rows.iter().position(|r| &r[self.key_index] == key)
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemoryTable>,
    live_staging: usize,
    /// Target table of every staging table created, in creation order.
    staged_tables: Vec<String>,
}

/// Shared handle to an in-memory database.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create (or replace) an empty target table.
    ///
    /// Column types and `nullable` flags are the table's constraints; they may
    /// differ from what a sync run declares for the same table.
    pub fn create_table(&self, spec: &TableSpec) -> Result<()> {
        let key_index = spec.key_index().ok_or_else(|| {
            SyncError::Config(format!(
                "table {}: primary_key {} is not one of its columns",
                spec.name, spec.primary_key
            ))
        })?;
        self.state().tables.insert(
            spec.name.clone(),
            MemoryTable {
                columns: spec.columns.clone(),
                key_index,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Insert one committed row, values in table column order.
    pub fn insert_row(&self, table: &str, values: Vec<SqlValue>) -> Result<()> {
        let mut state = self.state();
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| SyncError::Config(format!("table {} does not exist", table)))?;
        if values.len() != target.columns.len() {
            return Err(SyncError::Config(format!(
                "table {} has {} columns, got {} values",
                table,
                target.columns.len(),
                values.len()
            )));
        }
        if target.position(&values[target.key_index]).is_some() {
            return Err(SyncError::Config(format!(
                "duplicate key {} in table {}",
                values[target.key_index], table
            )));
        }
        target.rows.push(values);
        Ok(())
    }

    /// Committed rows of `table` in insertion order. Empty if the table does not exist.
    pub fn rows(&self, table: &str) -> Vec<Vec<SqlValue>> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Committed row of `table` with primary key `key`.
    pub fn get(&self, table: &str, key: &SqlValue) -> Option<Vec<SqlValue>> {
        let state = self.state();
        let target = state.tables.get(table)?;
        target.position(key).map(|i| target.rows[i].clone())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Staging tables created and not yet dropped or rolled back, across sessions.
    pub fn live_staging(&self) -> usize {
        self.state().live_staging
    }

    /// Target tables that had a staging table created, in creation order,
    /// including runs that were later rolled back.
    pub fn staging_history(&self) -> Vec<String> {
        self.state().staged_tables.clone()
    }

    /// Open a new session.
    pub fn session(&self) -> MemorySession {
        MemorySession {
            db: self.clone(),
            working: None,
            staging: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct StagedRows {
    columns: Vec<String>,
    rows: Vec<(u64, Vec<Option<String>>)>,
}

/// One session on a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemorySession {
    db: MemoryDatabase,
    /// Private copy of the tables while a transaction is open.
    working: Option<HashMap<String, MemoryTable>>,
    staging: HashMap<String, StagedRows>,
}

impl MemorySession {
    fn discard_staging(&mut self) {
        let count = self.staging.len();
        self.staging.clear();
        let mut state = self.db.state();
        state.live_staging = state.live_staging.saturating_sub(count);
    }
}

#[async_trait]
impl TargetStore for MemorySession {
    async fn begin(&mut self) -> Result<()> {
        self.working = Some(self.db.state().tables.clone());
        Ok(())
    }

    async fn create_staging(&mut self, spec: &TableSpec, width: usize) -> Result<StagingTable> {
        let name = staging_name(&spec.name, false)?;
        if self.staging.contains_key(&name) {
            return Err(SyncError::ddl(
                &spec.name,
                format!("staging table {} already exists", name),
            ));
        }
        self.staging.insert(
            name.clone(),
            StagedRows {
                columns: spec.column_names(),
                rows: Vec::new(),
            },
        );
        {
            let mut state = self.db.state();
            state.live_staging += 1;
            state.staged_tables.push(spec.name.clone());
        }

        Ok(StagingTable {
            table: spec.name.clone(),
            quoted: name.clone(),
            name,
            columns: spec.column_names(),
            width,
        })
    }

    async fn bulk_insert(&mut self, staging: &StagingTable, relation: &Relation) -> Result<u64> {
        check_width(staging, relation, |v| v.chars().count())?;
        let staged = self.staging.get_mut(&staging.name).ok_or_else(|| {
            SyncError::insert(
                &staging.table,
                format!("staging table {} does not exist", staging.name),
            )
        })?;
        staged
            .rows
            .extend(relation.records.iter().map(|r| (r.line, r.values.clone())));
        Ok(relation.len() as u64)
    }

    async fn merge(&mut self, spec: &TableSpec, staging: &StagingTable) -> Result<MergeOutcome> {
        let staged = self.staging.get(&staging.name).ok_or_else(|| {
            SyncError::merge(&spec.name, format!("staging table {} does not exist", staging.name))
        })?;
        let tables = self
            .working
            .as_mut()
            .ok_or_else(|| SyncError::merge(&spec.name, "no open transaction"))?;
        let current = tables.get(&spec.name).ok_or_else(|| {
            SyncError::merge(&spec.name, format!("table {} does not exist", spec.name))
        })?;

        // Map each target column to its staging column, if any.
        let sources = current
            .columns
            .iter()
            .map(|col| staged.columns.iter().position(|c| c == &col.name))
            .collect::<Vec<_>>();
        if sources[current.key_index].is_none() {
            return Err(SyncError::merge(
                &spec.name,
                format!(
                    "staging has no column {}",
                    current.columns[current.key_index].name
                ),
            ));
        }

        // Statement-level atomicity: apply to a copy, swap in on success.
        let mut table = current.clone();
        let mut outcome = MergeOutcome::default();
        let mut touched: Vec<SqlValue> = Vec::with_capacity(staged.rows.len());

        for (line, values) in &staged.rows {
            let convert = |col: &ColumnSpec, raw: Option<&str>| {
                coerce(raw, col).map_err(|e| match e {
                    CoercionError::NullNotAllowed => SyncError::merge(
                        &spec.name,
                        format!("line {}: cannot insert NULL into column {}", line, col.name),
                    ),
                    other => SyncError::Coercion {
                        table: spec.name.clone(),
                        column: col.name.clone(),
                        line: *line,
                        source: other,
                    },
                })
            };

            // Values for the staged columns only; unmapped target columns stay None.
            let mut mapped = Vec::with_capacity(table.columns.len());
            for (col, source) in table.columns.iter().zip(&sources) {
                mapped.push(match source {
                    Some(i) => Some(convert(col, values[*i].as_deref())?),
                    None => None,
                });
            }

            let key = mapped[table.key_index].clone().unwrap_or(SqlValue::Null);
            if touched.contains(&key) {
                return Err(SyncError::merge(
                    &spec.name,
                    format!("key {} appears more than once in staging", key),
                ));
            }
            match table.position(&key) {
                Some(i) => {
                    for (slot, value) in table.rows[i].iter_mut().zip(mapped) {
                        if let Some(value) = value {
                            *slot = value;
                        }
                    }
                    outcome.updated += 1;
                }
                None => {
                    let mut row = Vec::with_capacity(table.columns.len());
                    for (col, value) in table.columns.iter().zip(mapped) {
                        row.push(match value {
                            Some(value) => value,
                            None => convert(col, None)?,
                        });
                    }
                    table.rows.push(row);
                    outcome.inserted += 1;
                }
            }
            touched.push(key);
        }

        debug!(
            "memory: merged {} into {} ({} inserted, {} updated)",
            staging.name, spec.name, outcome.inserted, outcome.updated
        );
        tables.insert(spec.name.clone(), table);
        Ok(outcome)
    }

    async fn drop_staging(&mut self, staging: &StagingTable) -> Result<()> {
        if self.staging.remove(&staging.name).is_some() {
            let mut state = self.db.state();
            state.live_staging = state.live_staging.saturating_sub(1);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(tables) = self.working.take() {
            self.db.state().tables = tables;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.working = None;
        self.discard_staging();
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Record;
    use crate::schema::ColumnType;

    fn accounts() -> TableSpec {
        TableSpec::new(
            "Accounts",
            "AccountId",
            vec![
                ColumnSpec::typed("AccountId", ColumnType::Integer).required(),
                ColumnSpec::text("AccountName"),
            ],
        )
    }

    fn relation(rows: &[(&str, Option<&str>)]) -> Relation {
        Relation {
            table: "Accounts".into(),
            columns: vec!["AccountId".into(), "AccountName".into()],
            records: rows
                .iter()
                .enumerate()
                .map(|(i, (id, name))| Record {
                    line: i as u64 + 2,
                    values: vec![Some(id.to_string()), name.map(str::to_string)],
                })
                .collect(),
            rows_read: rows.len(),
            duplicates_removed: 0,
        }
    }

    async fn stage(session: &mut MemorySession, rows: &[(&str, Option<&str>)]) -> StagingTable {
        let staging = session.create_staging(&accounts(), 4000).await.unwrap();
        session.bulk_insert(&staging, &relation(rows)).await.unwrap();
        staging
    }

    #[tokio::test]
    async fn test_merge_counts_inserts_and_updates() {
        let db = MemoryDatabase::new();
        db.create_table(&accounts()).unwrap();
        db.insert_row("Accounts", vec![SqlValue::Integer(1), "Acme".into()]).unwrap();

        let mut session = db.session();
        session.begin().await.unwrap();
        let staging = stage(&mut session, &[("1", Some("Acme Corp")), ("2", Some("Globex"))]).await;
        let outcome = session.merge(&accounts(), &staging).await.unwrap();
        assert_eq!(outcome, MergeOutcome { inserted: 1, updated: 1 });

        // Not visible until commit
        assert_eq!(db.row_count("Accounts"), 1);
        session.commit().await.unwrap();
        assert_eq!(db.row_count("Accounts"), 2);
        assert_eq!(
            db.get("Accounts", &SqlValue::Integer(1)).unwrap(),
            vec![SqlValue::Integer(1), "Acme Corp".into()]
        );
    }

    #[tokio::test]
    async fn test_update_keeps_target_columns_not_staged() {
        let mut wide = accounts();
        wide.columns.push(ColumnSpec::text("Region").required());
        let db = MemoryDatabase::new();
        db.create_table(&wide).unwrap();
        db.insert_row("Accounts", vec![SqlValue::Integer(1), "Acme".into(), "EMEA".into()])
            .unwrap();

        let mut session = db.session();
        session.begin().await.unwrap();
        let staging = stage(&mut session, &[("1", Some("Acme Corp"))]).await;
        let outcome = session.merge(&accounts(), &staging).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(outcome, MergeOutcome { inserted: 0, updated: 1 });
        assert_eq!(
            db.get("Accounts", &SqlValue::Integer(1)).unwrap(),
            vec![SqlValue::Integer(1), "Acme Corp".into(), "EMEA".into()]
        );
    }

    #[tokio::test]
    async fn test_insert_without_required_target_column_is_merge_error() {
        let mut wide = accounts();
        wide.columns.push(ColumnSpec::text("Region").required());
        let db = MemoryDatabase::new();
        db.create_table(&wide).unwrap();

        let mut session = db.session();
        session.begin().await.unwrap();
        let staging = stage(&mut session, &[("2", Some("Globex"))]).await;
        let err = session.merge(&accounts(), &staging).await.unwrap_err();
        assert!(matches!(err, SyncError::Merge { .. }));
        assert!(err.to_string().contains("Region"));
    }

    #[tokio::test]
    async fn test_rollback_discards_changes_and_staging() {
        let db = MemoryDatabase::new();
        db.create_table(&accounts()).unwrap();

        let mut session = db.session();
        session.begin().await.unwrap();
        let staging = stage(&mut session, &[("1", Some("Acme"))]).await;
        session.merge(&accounts(), &staging).await.unwrap();
        assert_eq!(db.live_staging(), 1);

        session.rollback().await.unwrap();
        assert_eq!(db.row_count("Accounts"), 0);
        assert_eq!(db.live_staging(), 0);
    }

    #[tokio::test]
    async fn test_staging_name_collision_is_ddl_error() {
        let db = MemoryDatabase::new();
        let mut session = db.session();
        session.create_staging(&accounts(), 10).await.unwrap();
        let err = session.create_staging(&accounts(), 10).await.unwrap_err();
        assert!(matches!(err, SyncError::Ddl { .. }));
    }

    #[tokio::test]
    async fn test_value_wider_than_staging_is_insert_error() {
        let db = MemoryDatabase::new();
        let mut session = db.session();
        let staging = session.create_staging(&accounts(), 4).await.unwrap();
        let err = session
            .bulk_insert(&staging, &relation(&[("1", Some("Initech"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Insert { .. }));
    }

    #[tokio::test]
    async fn test_target_not_null_violation_is_merge_error() {
        let db = MemoryDatabase::new();
        let mut strict = accounts();
        strict.columns[1].nullable = false;
        db.create_table(&strict).unwrap();

        let mut session = db.session();
        session.begin().await.unwrap();
        let staging = stage(&mut session, &[("1", Some("Acme")), ("2", None)]).await;
        let err = session.merge(&accounts(), &staging).await.unwrap_err();
        assert!(matches!(err, SyncError::Merge { .. }));
        assert!(err.to_string().contains("line 3"));

        // The failed statement left nothing behind in the transaction either.
        session.commit().await.unwrap();
        assert_eq!(db.row_count("Accounts"), 0);
    }

    #[tokio::test]
    async fn test_missing_target_table_is_merge_error() {
        let db = MemoryDatabase::new();
        let mut session = db.session();
        session.begin().await.unwrap();
        let staging = stage(&mut session, &[("1", Some("Acme"))]).await;
        assert!(matches!(
            session.merge(&accounts(), &staging).await.unwrap_err(),
            SyncError::Merge { .. }
        ));
    }

    #[tokio::test]
    async fn test_uncoercible_value_is_reported_with_line() {
        let db = MemoryDatabase::new();
        db.create_table(&accounts()).unwrap();
        let mut session = db.session();
        session.begin().await.unwrap();
        let staging = stage(&mut session, &[("1", Some("Acme")), ("two", Some("Globex"))]).await;
        match session.merge(&accounts(), &staging).await.unwrap_err() {
            SyncError::Coercion { column, line, .. } => {
                assert_eq!(column, "AccountId");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
