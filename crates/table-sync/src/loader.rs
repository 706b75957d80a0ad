//! Dataset loader: reads one CSV file into an in-memory relation.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, SyncError};
use crate::schema::TableSpec;

/// One source row projected onto the table's columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Line of the record in the source file (1-based, header is line 1).
    pub line: u64,
    /// Values in `TableSpec::columns` order. Empty fields are `None`.
    pub values: Vec<Option<String>>,
}

/// Rows read from one source file, free of exact duplicates.
#[derive(Debug, Clone)]
pub struct Relation {
    pub table: String,
    pub columns: Vec<String>,
    pub records: Vec<Record>,
    /// Data rows in the file before de-duplication.
    pub rows_read: usize,
    pub duplicates_removed: usize,
}

impl Relation {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Row values without line information.
    pub fn rows(&self) -> impl Iterator<Item = &[Option<String>]> {
        self.records.iter().map(|r| r.values.as_slice())
    }
}

/// Read `path`, keep the declared columns in declaration order and drop rows that
/// repeat an earlier row exactly. The first occurrence is kept.
pub fn load(spec: &TableSpec, path: &Path, delimiter: char) -> Result<Relation> {
    if !path.is_file() {
        return Err(SyncError::NotFound(path.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let positions = spec
        .columns
        .iter()
        .map(|col| {
            headers
                .iter()
                .position(|h| h == col.name)
                .ok_or_else(|| SyncError::SchemaMismatch {
                    table: spec.name.clone(),
                    column: col.name.clone(),
                    path: path.to_path_buf(),
                })
        })
        .collect::<Result<Vec<usize>>>()?;

    let mut seen: HashSet<Vec<Option<String>>> = HashSet::new();
    let mut records = Vec::new();
    let mut rows_read = 0;

    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        rows_read += 1;

        let values: Vec<Option<String>> = positions
            .iter()
            .map(|&pos| match row.get(pos) {
                Some("") | None => None,
                Some(v) => Some(v.to_string()),
            })
            .collect();

        if seen.insert(values.clone()) {
            let line = row
                .position()
                .map(|p| p.line())
                .unwrap_or(idx as u64 + 2);
            records.push(Record { line, values });
        }
    }

    let duplicates_removed = rows_read - records.len();
    debug!(
        "{}: read {} rows from {}, {} duplicates removed",
        spec.name,
        rows_read,
        path.display(),
        duplicates_removed
    );

    Ok(Relation {
        table: spec.name.clone(),
        columns: spec.column_names(),
        records,
        rows_read,
        duplicates_removed,
    })
}
