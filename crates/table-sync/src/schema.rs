//! Static per-table metadata: which columns to read and how to merge them.

use serde::{Deserialize, Serialize};

/// Declared type of a target column.
///
/// Staging tables store every value as text; the merge converts the text to
/// this type (see [`crate::coerce`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    #[serde(alias = "timestamp")]
    DateTime,
}

impl ColumnType {
    /// SQL Server type used when casting staged text.
    pub fn mssql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "NVARCHAR(MAX)",
            ColumnType::Integer => "BIGINT",
            ColumnType::Decimal => "DECIMAL(38, 10)",
            ColumnType::Boolean => "BIT",
            ColumnType::Date => "DATE",
            ColumnType::DateTime => "DATETIME2",
        }
    }

    /// PostgreSQL type used when casting staged text.
    pub fn postgres_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "bigint",
            ColumnType::Decimal => "numeric",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "timestamp",
        }
    }
}

/// One column of a [`TableSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ColumnEntry")]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnSpec {
    /// Nullable text column.
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Text,
            nullable: true,
        }
    }

    /// Column with an explicit type.
    pub fn typed(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Mark the column NOT NULL.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Columns may be written as a bare name (nullable text) or a full mapping.
#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnEntry {
    Name(String),
    Full {
        name: String,
        #[serde(rename = "type", default)]
        column_type: ColumnType,
        #[serde(default = "default_true")]
        nullable: bool,
    },
}

impl From<ColumnEntry> for ColumnSpec {
    fn from(entry: ColumnEntry) -> Self {
        match entry {
            ColumnEntry::Name(name) => ColumnSpec::text(name),
            ColumnEntry::Full {
                name,
                column_type,
                nullable,
            } => ColumnSpec {
                name,
                column_type,
                nullable,
            },
        }
    }
}

fn default_true() -> bool {
    true
}

/// Description of one target table and its source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Target table name; also the base name of the source file.
    pub name: String,

    /// Merge key. Must name one of `columns`.
    pub primary_key: String,

    /// Ordered column list read from the source and written to the target.
    pub columns: Vec<ColumnSpec>,

    /// Override for the source file path (default `<data_dir>/<name>.csv`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Override for the target schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl TableSpec {
    pub fn new(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        columns: Vec<ColumnSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            columns,
            file: None,
            schema: None,
        }
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Position of the primary key within `columns`.
    pub fn key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.name == self.primary_key)
    }

    /// Columns other than the primary key, in declaration order.
    pub fn non_key_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(move |c| c.name != self.primary_key)
    }

    /// Target schema for this table, falling back to `default_schema`.
    pub fn schema_or<'a>(&'a self, default_schema: &'a str) -> &'a str {
        self.schema.as_deref().unwrap_or(default_schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_shorthand_and_full_form() {
        let yaml = r#"
name: Accounts
primary_key: AccountId
columns:
  - { name: AccountId, type: integer, nullable: false }
  - AccountName
  - { name: CreatedDate, type: timestamp }
"#;
        let spec: TableSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.columns.len(), 3);
        assert_eq!(spec.columns[0].column_type, ColumnType::Integer);
        assert!(!spec.columns[0].nullable);
        assert_eq!(spec.columns[1], ColumnSpec::text("AccountName"));
        assert_eq!(spec.columns[2].column_type, ColumnType::DateTime);
    }

    #[test]
    fn test_key_index_and_non_key_columns() {
        let spec = TableSpec::new(
            "Contacts",
            "ContactId",
            vec![
                ColumnSpec::text("AccountId"),
                ColumnSpec::typed("ContactId", ColumnType::Integer).required(),
                ColumnSpec::text("Email"),
            ],
        );
        assert_eq!(spec.key_index(), Some(1));
        let others: Vec<_> = spec.non_key_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(others, vec!["AccountId", "Email"]);
    }

    #[test]
    fn test_schema_override() {
        let mut spec = TableSpec::new("Accounts", "AccountId", vec![ColumnSpec::text("AccountId")]);
        assert_eq!(spec.schema_or("dbo"), "dbo");
        spec.schema = Some("crm".into());
        assert_eq!(spec.schema_or("dbo"), "crm");
    }
}
