//! PostgreSQL target store.

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info, warn};

use super::{check_width, rows_per_batch, MergeOutcome, StagingTable, TargetStore};
use crate::coerce::{FALSE_LITERALS, TRUE_LITERALS};
use crate::error::{Result, SyncError};
use crate::identifier::{qualify_pg, quote_pg, staging_name};
use crate::loader::Relation;
use crate::schema::{ColumnSpec, ColumnType, TableSpec};

/// The wire protocol counts bind parameters in a u16.
const MAX_PARAMS_PER_INSERT: usize = 65_535;

/// PostgreSQL session holding the run's transaction.
pub struct PgStore {
    client: Client,
    schema: String,
    batch_size: usize,
}

impl PgStore {
    /// Connect using a libpq style connection string
    /// (`host=db user=etl dbname=crm` or `postgres://...`).
    pub async fn connect(connection_string: &str, schema: &str) -> Result<Self> {
        warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| SyncError::Connection(format!("PostgreSQL connect failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        info!("Connected to PostgreSQL");

        Ok(Self {
            client,
            schema: schema.to_string(),
            batch_size: 1_000,
        })
    }

    /// Override the rows per multi-row INSERT.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[async_trait]
impl TargetStore for PgStore {
    async fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn create_staging(&mut self, spec: &TableSpec, width: usize) -> Result<StagingTable> {
        let name = staging_name(&spec.name, false)?;
        // Always address the session's temp schema so a permanent table of the
        // same name can never be written to or dropped.
        let quoted = format!("pg_temp.{}", quote_pg(&name)?);
        let col_defs = spec
            .columns
            .iter()
            .map(|c| Ok(format!("{} VARCHAR({})", quote_pg(&c.name)?, width)))
            .collect::<Result<Vec<_>>>()?;

        let sql = format!("CREATE TEMP TABLE {} ({})", quoted, col_defs.join(", "));
        debug!("postgres: {}", sql);
        self.client
            .batch_execute(&sql)
            .await
            .map_err(|e| SyncError::ddl(&spec.name, e))?;

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
        check_width(staging, relation, |v| v.chars().count())?;

        let col_str = staging
            .columns
            .iter()
            .map(|c| quote_pg(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let per_batch = rows_per_batch(
            self.batch_size,
            staging.columns.len(),
            self.batch_size,
            MAX_PARAMS_PER_INSERT,
        );

        let mut total_inserted = 0u64;
        for batch in relation.records.chunks(per_batch) {
            let sql = build_insert_sql(&staging.quoted, &col_str, staging.columns.len(), batch.len());
            let params: Vec<&(dyn ToSql + Sync)> = batch
                .iter()
                .flat_map(|r| r.values.iter().map(|v| v as &(dyn ToSql + Sync)))
                .collect();

            total_inserted += self.client.execute(sql.as_str(), &params).await.map_err(|e| {
                SyncError::insert(
                    &staging.table,
                    format!("batched INSERT ({} rows): {}", batch.len(), e),
                )
            })?;
        }

        debug!(
            "{}: staged {} rows (batch size: {})",
            staging.table, total_inserted, per_batch
        );
        Ok(total_inserted)
    }

    async fn merge(&mut self, spec: &TableSpec, staging: &StagingTable) -> Result<MergeOutcome> {
        let target = qualify_pg(spec.schema_or(&self.schema), &spec.name)?;
        let sql = build_upsert_sql(&target, &staging.quoted, spec)?;
        debug!("postgres: {}", sql);

        let row = self
            .client
            .query_one(sql.as_str(), &[])
            .await
            .map_err(|e| SyncError::merge(&spec.name, e))?;
        let inserted: i64 = row.try_get(0).map_err(|e| SyncError::merge(&spec.name, e))?;
        let updated: i64 = row.try_get(1).map_err(|e| SyncError::merge(&spec.name, e))?;

        Ok(MergeOutcome {
            inserted: inserted as u64,
            updated: updated as u64,
        })
    }

    async fn drop_staging(&mut self, staging: &StagingTable) -> Result<()> {
        self.client
            .batch_execute(&format!("DROP TABLE IF EXISTS {}", staging.quoted))
            .await
            .map_err(|e| SyncError::ddl(&staging.table, format!("dropping staging: {}", e)))?;
        debug!("Dropped staging table {}", staging.name);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// Build `INSERT INTO t (cols) VALUES ($1, $2), ($3, $4), ...`.
fn build_insert_sql(table: &str, col_str: &str, cols_per_row: usize, rows: usize) -> String {
    let value_groups: Vec<String> = (0..rows)
        .map(|row| {
            let placeholders: Vec<String> = (1..=cols_per_row)
                .map(|col| format!("${}", row * cols_per_row + col))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        col_str,
        value_groups.join(", ")
    )
}

/// Expression converting staged text in `s.<column>` to the column's type.
fn value_expr(column: &ColumnSpec) -> Result<String> {
    let src = format!("s.{}", quote_pg(&column.name)?);
    Ok(match column.column_type {
        ColumnType::Text => src,
        ColumnType::Boolean => format!(
            "CASE WHEN UPPER(BTRIM({0})) IN ({1}) THEN TRUE WHEN UPPER(BTRIM({0})) IN ({2}) THEN FALSE \
             ELSE CAST('invalid boolean: ' || BTRIM({0}) AS boolean) END",
            src,
            sql_literals(TRUE_LITERALS),
            sql_literals(FALSE_LITERALS)
        ),
        other => format!("CAST(BTRIM({}) AS {})", src, other.postgres_type()),
    })
}

fn sql_literals(literals: &[&str]) -> String {
    literals
        .iter()
        .map(|l| format!("'{}'", l.to_uppercase()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the upsert from staging to target.
///
/// The statement returns one row `(inserted, updated)`. `xmax = 0` holds
/// exactly for rows created by this statement rather than updated by it.
fn build_upsert_sql(target_table: &str, staging_table: &str, spec: &TableSpec) -> Result<String> {
    let col_str = spec
        .columns
        .iter()
        .map(|c| quote_pg(&c.name))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let select_list = spec
        .columns
        .iter()
        .map(value_expr)
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let pk = quote_pg(&spec.primary_key)?;
    let update_cols = spec
        .non_key_columns()
        .map(|c| {
            let q = quote_pg(&c.name)?;
            Ok(format!("{} = EXCLUDED.{}", q, q))
        })
        .collect::<Result<Vec<_>>>()?;

    let conflict = if update_cols.is_empty() {
        format!("ON CONFLICT ({}) DO NOTHING", pk)
    } else {
        format!("ON CONFLICT ({}) DO UPDATE SET {}", pk, update_cols.join(", "))
    };

    Ok(format!(
        "WITH upserted AS (\
         INSERT INTO {target} ({cols}) SELECT {select} FROM {staging} AS s {conflict} \
         RETURNING (xmax = 0) AS inserted) \
         SELECT COUNT(*) FILTER (WHERE inserted), COUNT(*) FILTER (WHERE NOT inserted) FROM upserted",
        target = target_table,
        cols = col_str,
        select = select_list,
        staging = staging_table,
        conflict = conflict,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contacts() -> TableSpec {
        TableSpec::new(
            "Contacts",
            "ContactId",
            vec![
                ColumnSpec::text("ContactId").required(),
                ColumnSpec::typed("AccountId", ColumnType::Integer),
                ColumnSpec::text("Email"),
            ],
        )
    }

    #[test]
    fn test_build_upsert_sql() {
        let sql = build_upsert_sql(
            "\"public\".\"Contacts\"",
            "pg_temp.\"Contacts_stg\"",
            &contacts(),
        )
        .unwrap();

        assert!(sql.contains(
            "INSERT INTO \"public\".\"Contacts\" (\"ContactId\", \"AccountId\", \"Email\")"
        ));
        assert!(sql.contains(
            "SELECT s.\"ContactId\", CAST(BTRIM(s.\"AccountId\") AS bigint), s.\"Email\" FROM pg_temp.\"Contacts_stg\" AS s"
        ));
        assert!(sql.contains(
            "ON CONFLICT (\"ContactId\") DO UPDATE SET \"AccountId\" = EXCLUDED.\"AccountId\", \"Email\" = EXCLUDED.\"Email\""
        ));
        assert!(sql.contains("RETURNING (xmax = 0) AS inserted"));
    }

    #[test]
    fn test_build_upsert_sql_key_only_table() {
        let spec = TableSpec::new("Tags", "Tag", vec![ColumnSpec::text("Tag").required()]);
        let sql = build_upsert_sql("\"public\".\"Tags\"", "pg_temp.\"Tags_stg\"", &spec).unwrap();
        assert!(sql.contains("ON CONFLICT (\"Tag\") DO NOTHING"));
        assert!(!sql.contains("DO UPDATE"));
    }

    #[test]
    fn test_boolean_expression_uses_shared_literals() {
        let expr = value_expr(&ColumnSpec::typed("IsWon", ColumnType::Boolean)).unwrap();
        assert_eq!(
            expr,
            "CASE WHEN UPPER(BTRIM(s.\"IsWon\")) IN ('1', 'TRUE', 'T', 'YES', 'Y') THEN TRUE \
             WHEN UPPER(BTRIM(s.\"IsWon\")) IN ('0', 'FALSE', 'F', 'NO', 'N') THEN FALSE \
             ELSE CAST('invalid boolean: ' || BTRIM(s.\"IsWon\") AS boolean) END"
        );
    }

    #[test]
    fn test_build_insert_sql_numbers_parameters() {
        let sql = build_insert_sql("pg_temp.\"Tags_stg\"", "\"a\", \"b\"", 2, 2);
        assert_eq!(
            sql,
            "INSERT INTO pg_temp.\"Tags_stg\" (\"a\", \"b\") VALUES ($1, $2), ($3, $4)"
        );
    }
}
