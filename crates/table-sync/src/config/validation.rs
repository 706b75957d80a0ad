//! Configuration validation.

use std::collections::HashSet;

use super::{Config, StoreType, MAX_STAGING_WIDTH};
use crate::error::{Result, SyncError};
use crate::identifier::{staging_name, validate_identifier};
use crate::schema::TableSpec;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if let Some(schema) = &config.target.schema {
        validate_identifier(schema)
            .map_err(|e| SyncError::Config(format!("target.schema: {}", e)))?;
    }
    if config.target.connection_string.is_none() && config.target.connection_env.is_empty() {
        return Err(SyncError::Config(
            "target.connection_env or target.connection_string is required".into(),
        ));
    }

    if config.sync.batch_size == 0 {
        return Err(SyncError::Config("sync.batch_size must be at least 1".into()));
    }
    if config.sync.staging_width == 0 || config.sync.staging_width > MAX_STAGING_WIDTH {
        return Err(SyncError::Config(format!(
            "sync.staging_width must be between 1 and {}",
            MAX_STAGING_WIDTH
        )));
    }
    if !config.sync.delimiter.is_ascii() || matches!(config.sync.delimiter, '"' | '\n' | '\r') {
        return Err(SyncError::Config(format!(
            "sync.delimiter must be a single ASCII character other than quote or newline, got {:?}",
            config.sync.delimiter
        )));
    }

    if config.tables.is_empty() {
        return Err(SyncError::Config("at least one table is required".into()));
    }

    let mut seen = HashSet::new();
    for table in &config.tables {
        if !seen.insert(table.name.to_lowercase()) {
            return Err(SyncError::Config(format!(
                "table {} is listed more than once",
                table.name
            )));
        }
        validate_table(table, config.target.r#type)?;
    }

    Ok(())
}

/// Validate a single table description.
fn validate_table(table: &TableSpec, store: StoreType) -> Result<()> {
    validate_identifier(&table.name)
        .map_err(|e| SyncError::Config(format!("table name: {}", e)))?;
    staging_name(&table.name, store == StoreType::Mssql)?;
    if let Some(schema) = &table.schema {
        validate_identifier(schema)
            .map_err(|e| SyncError::Config(format!("{}.schema: {}", table.name, e)))?;
    }

    if table.columns.is_empty() {
        return Err(SyncError::Config(format!(
            "table {} must declare at least one column",
            table.name
        )));
    }

    let mut seen = HashSet::new();
    for column in &table.columns {
        validate_identifier(&column.name)
            .map_err(|e| SyncError::Config(format!("{} column: {}", table.name, e)))?;
        if !seen.insert(column.name.to_lowercase()) {
            return Err(SyncError::Config(format!(
                "table {} declares column {} more than once",
                table.name, column.name
            )));
        }
    }

    let Some(key_idx) = table.key_index() else {
        return Err(SyncError::Config(format!(
            "table {}: primary_key {} is not one of its columns",
            table.name, table.primary_key
        )));
    };
    if table.columns[key_idx].nullable {
        return Err(SyncError::Config(format!(
            "table {}: primary key column {} must be declared nullable: false",
            table.name, table.primary_key
        )));
    }

    Ok(())
}
