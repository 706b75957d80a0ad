//! Identifier validation and quoting for dynamically built SQL.
//!
//! Table and column names come from configuration and cannot be bound as
//! statement parameters, so every identifier that reaches a SQL string goes
//! through this module: it is validated, then quoted with the dialect's
//! delimiters and embedded delimiters are doubled.

use crate::error::{Result, SyncError};

/// Maximum identifier length.
/// - PostgreSQL: 63 bytes
/// - SQL Server: 128 characters
///
/// SQL Server reserves part of a temp table name for its own suffix, so the
/// staging name `#<table>_stg` must stay within 116 characters; that bound is
/// checked by [`staging_name`].
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

const MAX_MSSQL_TEMP_NAME_LENGTH: usize = 116;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers longer than [`MAX_IDENTIFIER_LENGTH`].
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a SQL Server identifier using brackets.
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("table]name")?, "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Qualify a SQL Server table name with schema.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Unquoted name of the staging table for `table`.
///
/// SQL Server temp tables carry a `#` prefix, which makes them private to the
/// session. PostgreSQL temp tables live in the session's own `pg_temp` schema
/// and need no prefix.
pub fn staging_name(table: &str, mssql: bool) -> Result<String> {
    validate_identifier(table)?;
    if mssql {
        let name = format!("#{}_stg", table);
        if name.chars().count() > MAX_MSSQL_TEMP_NAME_LENGTH {
            return Err(SyncError::Config(format!(
                "Table name {:?} is too long for a SQL Server staging table",
                table
            )));
        }
        Ok(name)
    } else {
        Ok(format!("{}_stg", table))
    }
}
