//! SQL Server target store.
//!
//! Staging tables are `#` temp tables, which SQL Server scopes to the
//! session and discards on disconnect. They must be created through a plain
//! SQL batch (`simple_query`): a temp table created inside `sp_executesql`
//! would vanish when that call returns.

use async_trait::async_trait;
use tiberius::{Client, Config, Row, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use super::{check_width, rows_per_batch, MergeOutcome, StagingTable, TargetStore};
use crate::coerce::{FALSE_LITERALS, TRUE_LITERALS};
use crate::config::StoreType;
use crate::error::{Result, SyncError};
use crate::identifier::{qualify_mssql, quote_mssql, staging_name};
use crate::loader::Relation;
use crate::merge::KeyCollation;
use crate::schema::{ColumnSpec, ColumnType, TableSpec};

/// SQL Server accepts at most 1000 row constructors per VALUES list.
const MAX_ROWS_PER_INSERT: usize = 1000;

/// SQL Server allows 2100 parameters per request; leave headroom for the
/// `sp_executesql` arguments.
const MAX_PARAMS_PER_INSERT: usize = 2000;

/// SQL Server session holding the run's transaction.
pub struct MssqlStore {
    client: Client<Compat<TcpStream>>,
    schema: String,
    batch_size: usize,
}

impl MssqlStore {
    /// Connect using an ADO.NET style connection string
    /// (`server=tcp:host,1433;database=crm;user=...;password=...`).
    pub async fn connect(connection_string: &str, schema: &str) -> Result<Self> {
        let config = Config::from_ado_string(connection_string)
            .map_err(|e| SyncError::Connection(format!("invalid connection string: {}", e)))?;

        let addr = config.get_addr();
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| SyncError::Connection(format!("connecting to {}: {}", addr, e)))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| SyncError::Connection(format!("SQL Server login failed: {}", e)))?;

        info!("Connected to SQL Server: {}", addr);

        Ok(Self {
            client,
            schema: schema.to_string(),
            batch_size: 1_000,
        })
    }

    /// Override the rows per multi-row INSERT (still capped by SQL Server limits).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run a SQL batch and collect every result set.
    async fn batch(&mut self, sql: &str) -> std::result::Result<Vec<Vec<Row>>, tiberius::error::Error> {
        debug!("mssql batch: {}", sql);
        self.client.simple_query(sql).await?.into_results().await
    }

    /// Check if a table has an identity column.
    async fn has_identity_column(&mut self, schema: &str, table: &str) -> Result<bool> {
        let query = r#"SELECT COUNT(*)
               FROM sys.columns c
               JOIN sys.tables t ON c.object_id = t.object_id
               JOIN sys.schemas s ON t.schema_id = s.schema_id
               WHERE s.name = @P1 AND t.name = @P2 AND c.is_identity = 1"#;
        let row = self
            .client
            .query(query, &[&schema, &table])
            .await?
            .into_row()
            .await?;
        let count: i32 = match row {
            Some(r) => r.get(0).unwrap_or(0),
            None => 0,
        };
        Ok(count > 0)
    }
}

#[async_trait]
impl TargetStore for MssqlStore {
    async fn begin(&mut self) -> Result<()> {
        self.batch("SET XACT_ABORT ON; BEGIN TRANSACTION;").await?;
        Ok(())
    }

    async fn create_staging(&mut self, spec: &TableSpec, width: usize) -> Result<StagingTable> {
        let name = staging_name(&spec.name, true)?;
        let quoted = quote_mssql(&name)?;
        let col_defs = spec
            .columns
            .iter()
            .map(|c| Ok(format!("{} NVARCHAR({}) NULL", quote_mssql(&c.name)?, width)))
            .collect::<Result<Vec<_>>>()?;

        let sql = format!("CREATE TABLE {} ({});", quoted, col_defs.join(", "));
        self.batch(&sql)
            .await
            .map_err(|e| SyncError::ddl(&spec.name, e))?;
        debug!("Created staging table {}", name);

        Ok(StagingTable {
            table: spec.name.clone(),
            name,
            quoted,
            columns: spec.column_names(),
            width,
        })
    }

    async fn bulk_insert(&mut self, staging: &StagingTable, relation: &Relation) -> Result<u64> {
        if relation.is_empty() {
            return Ok(0);
        }
        // NVARCHAR lengths count UTF-16 code units
        check_width(staging, relation, |v| v.encode_utf16().count())?;

        let col_str = staging
            .columns
            .iter()
            .map(|c| quote_mssql(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let per_batch = rows_per_batch(
            self.batch_size,
            staging.columns.len(),
            MAX_ROWS_PER_INSERT,
            MAX_PARAMS_PER_INSERT,
        );

        let mut total_inserted = 0u64;
        for batch in relation.records.chunks(per_batch) {
            let sql = build_insert_sql(&staging.quoted, &col_str, staging.columns.len(), batch.len());
            let params: Vec<&dyn ToSql> = batch
                .iter()
                .flat_map(|r| r.values.iter().map(|v| v as &dyn ToSql))
                .collect();

            let result = self.client.execute(sql.as_str(), &params).await.map_err(|e| {
                SyncError::insert(
                    &staging.table,
                    format!("batched INSERT ({} rows): {}", batch.len(), e),
                )
            })?;
            total_inserted += result.total();
        }

        debug!(
            "{}: staged {} rows (batch size: {})",
            staging.table, total_inserted, per_batch
        );
        Ok(total_inserted)
    }

    async fn merge(&mut self, spec: &TableSpec, staging: &StagingTable) -> Result<MergeOutcome> {
        let schema = spec.schema_or(&self.schema).to_string();
        let target = qualify_mssql(&schema, &spec.name)?;
        let merge_sql = build_merge_sql(&target, &staging.quoted, spec)?;

        let batch_sql = if self.has_identity_column(&schema, &spec.name).await? {
            format!(
                "SET IDENTITY_INSERT {0} ON; {1} SET IDENTITY_INSERT {0} OFF;",
                target, merge_sql
            )
        } else {
            merge_sql
        };

        let results = self
            .batch(&batch_sql)
            .await
            .map_err(|e| SyncError::merge(&spec.name, e))?;

        let counts = results.iter().rev().find_map(|set| set.first());
        let (inserted, updated) = match counts {
            Some(row) => (
                row.get::<i32, _>(0).unwrap_or(0),
                row.get::<i32, _>(1).unwrap_or(0),
            ),
            None => (0, 0),
        };

        Ok(MergeOutcome {
            inserted: inserted as u64,
            updated: updated as u64,
        })
    }

    async fn drop_staging(&mut self, staging: &StagingTable) -> Result<()> {
        let sql = format!(
            "IF OBJECT_ID(N'tempdb..{}') IS NOT NULL DROP TABLE {};",
            staging.name.replace('\'', "''"),
            staging.quoted
        );
        self.batch(&sql)
            .await
            .map_err(|e| SyncError::ddl(&staging.table, format!("dropping staging: {}", e)))?;
        debug!("Dropped staging table {}", staging.name);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT TRANSACTION;").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;").await?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.batch("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mssql"
    }

    fn key_collation(&self) -> KeyCollation {
        KeyCollation::for_store(StoreType::Mssql)
    }
}

/// Build `INSERT INTO t (cols) VALUES (@P1, @P2), (@P3, @P4), ...`.
fn build_insert_sql(table: &str, col_str: &str, cols_per_row: usize, rows: usize) -> String {
    let mut param_idx = 1;
    let mut value_groups = Vec::with_capacity(rows);
    for _ in 0..rows {
        let placeholders: Vec<String> = (0..cols_per_row)
            .map(|_| {
                let p = format!("@P{}", param_idx);
                param_idx += 1;
                p
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        col_str,
        value_groups.join(", ")
    )
}

/// Expression converting staged text in `S.<column>` to the column's type.
fn value_expr(column: &ColumnSpec) -> Result<String> {
    let src = format!("S.{}", quote_mssql(&column.name)?);
    let trimmed = format!("LTRIM(RTRIM({}))", src);
    Ok(match column.column_type {
        ColumnType::Text => src,
        ColumnType::Boolean => format!(
            "CASE WHEN UPPER({0}) IN ({1}) THEN CAST(1 AS BIT) WHEN UPPER({0}) IN ({2}) THEN CAST(0 AS BIT) \
             ELSE CAST(N'invalid boolean: ' + {0} AS BIT) END",
            trimmed,
            sql_literals(TRUE_LITERALS),
            sql_literals(FALSE_LITERALS)
        ),
        other => format!("CAST({} AS {})", trimmed, other.mssql_type()),
    })
}

fn sql_literals(literals: &[&str]) -> String {
    literals
        .iter()
        .map(|l| format!("'{}'", l.to_uppercase()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the MERGE batch from staging to target.
///
/// Matched rows get every non-key column overwritten; unmatched staging rows
/// are inserted; target rows absent from staging are untouched. The batch
/// ends with a single-row result set `(inserted, updated)`.
fn build_merge_sql(target_table: &str, staging_table: &str, spec: &TableSpec) -> Result<String> {
    let key = spec
        .columns
        .iter()
        .find(|c| c.name == spec.primary_key)
        .ok_or_else(|| SyncError::Config(format!("{}: primary key not declared", spec.name)))?;

    let join_condition = format!("T.{} = {}", quote_mssql(&key.name)?, value_expr(key)?);

    let col_str = spec
        .columns
        .iter()
        .map(|c| quote_mssql(&c.name))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let source_values = spec
        .columns
        .iter()
        .map(value_expr)
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let update_cols = spec
        .non_key_columns()
        .map(|c| Ok(format!("T.{} = {}", quote_mssql(&c.name)?, value_expr(c)?)))
        .collect::<Result<Vec<_>>>()?;

    let when_matched = if update_cols.is_empty() {
        // Key-only table: nothing to update, only insert new keys
        String::new()
    } else {
        format!("\nWHEN MATCHED THEN UPDATE SET {}", update_cols.join(", "))
    };

    Ok(format!(
        r#"SET NOCOUNT ON;
DECLARE @merge_actions TABLE ([action] NVARCHAR(10));
MERGE INTO {target} AS T
USING {staging} AS S
ON {join}{matched}
WHEN NOT MATCHED BY TARGET THEN INSERT ({cols}) VALUES ({values})
OUTPUT $action INTO @merge_actions;
SELECT COUNT(CASE WHEN [action] = 'INSERT' THEN 1 END) AS inserted,
       COUNT(CASE WHEN [action] = 'UPDATE' THEN 1 END) AS updated
FROM @merge_actions;"#,
        target = target_table,
        staging = staging_table,
        join = join_condition,
        matched = when_matched,
        cols = col_str,
        values = source_values,
    ))
}
