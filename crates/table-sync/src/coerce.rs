//! Conversion of staged text to typed column values.
//!
//! Staging tables accept any text. Typing happens once, at merge time, and
//! this module is the single definition of what each [`ColumnType`] accepts.
//! The SQL emitted by the stores uses the same literal sets (see
//! [`TRUE_LITERALS`] and [`FALSE_LITERALS`]) so that a value accepted here is
//! accepted by the merge statement.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::schema::{ColumnSpec, ColumnType};

/// Case-insensitive spellings accepted as boolean true.
pub const TRUE_LITERALS: &[&str] = &["1", "true", "t", "yes", "y"];

/// Case-insensitive spellings accepted as boolean false.
pub const FALSE_LITERALS: &[&str] = &["0", "false", "f", "no", "n"];

/// Accepted date format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Accepted timestamp formats, tried in order. A bare date is also accepted
/// and means midnight.
pub const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Most fractional-second digits a timestamp may carry. `DATETIME2` holds 7.
pub const MAX_FRACTION_DIGITS: usize = 7;

/// Why a staged value cannot be converted to its column type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("'{value}' is not a valid integer")]
    InvalidInteger { value: String },

    #[error("'{value}' is not a valid decimal number")]
    InvalidDecimal { value: String },

    #[error("'{value}' is not a valid boolean")]
    InvalidBoolean { value: String },

    #[error("'{value}' is not a valid date (expected YYYY-MM-DD)")]
    InvalidDate { value: String },

    #[error("'{value}' is not a valid timestamp (expected YYYY-MM-DD HH:MM:SS)")]
    InvalidDateTime { value: String },

    #[error("NULL is not allowed")]
    NullNotAllowed,
}

/// A typed column value produced by [`coerce`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Decimal(d) => write!(f, "{}", d),
            SqlValue::Boolean(b) => write!(f, "{}", b),
            SqlValue::Date(d) => write!(f, "{}", d),
            SqlValue::DateTime(dt) => write!(f, "{}", dt),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Boolean(v)
    }
}

/// Convert one raw staged value to the column's declared type.
///
/// `None` is SQL NULL. Text values are kept verbatim; every other type is
/// parsed after trimming surrounding spaces. Only U+0020 is trimmed, matching
/// `LTRIM`/`RTRIM` and `BTRIM` in the merge statements.
pub fn coerce(raw: Option<&str>, column: &ColumnSpec) -> Result<SqlValue, CoercionError> {
    let Some(raw) = raw else {
        return if column.nullable {
            Ok(SqlValue::Null)
        } else {
            Err(CoercionError::NullNotAllowed)
        };
    };

    let value = raw.trim_matches(' ');
    match column.column_type {
        ColumnType::Text => Ok(SqlValue::Text(raw.to_string())),
        ColumnType::Integer => value
            .parse::<i64>()
            .map(SqlValue::Integer)
            .map_err(|_| CoercionError::InvalidInteger {
                value: raw.to_string(),
            }),
        ColumnType::Decimal => value
            .parse::<Decimal>()
            .map(SqlValue::Decimal)
            .map_err(|_| CoercionError::InvalidDecimal {
                value: raw.to_string(),
            }),
        ColumnType::Boolean => parse_bool(value)
            .map(SqlValue::Boolean)
            .ok_or_else(|| CoercionError::InvalidBoolean {
                value: raw.to_string(),
            }),
        ColumnType::Date => NaiveDate::parse_from_str(value, DATE_FORMAT)
            .map(SqlValue::Date)
            .map_err(|_| CoercionError::InvalidDate {
                value: raw.to_string(),
            }),
        ColumnType::DateTime => parse_datetime(value)
            .map(SqlValue::DateTime)
            .ok_or_else(|| CoercionError::InvalidDateTime {
                value: raw.to_string(),
            }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if TRUE_LITERALS.iter().any(|l| l.eq_ignore_ascii_case(value)) {
        Some(true)
    } else if FALSE_LITERALS.iter().any(|l| l.eq_ignore_ascii_case(value)) {
        Some(false)
    } else {
        None
    }
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let fraction = value.split_once('.').map_or(0, |(_, f)| f.len());
    if fraction > MAX_FRACTION_DIGITS {
        return None;
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(column_type: ColumnType) -> ColumnSpec {
        ColumnSpec::typed("c", column_type)
    }

    #[test]
    fn test_text_is_kept_verbatim() {
        assert_eq!(
            coerce(Some("  Acme "), &col(ColumnType::Text)).unwrap(),
            SqlValue::Text("  Acme ".into())
        );
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(coerce(None, &col(ColumnType::Integer)).unwrap(), SqlValue::Null);
        assert_eq!(
            coerce(None, &col(ColumnType::Text).required()),
            Err(CoercionError::NullNotAllowed)
        );
    }

    #[test]
    fn test_integer() {
        assert_eq!(coerce(Some(" 42 "), &col(ColumnType::Integer)).unwrap(), SqlValue::Integer(42));
        assert!(matches!(
            coerce(Some("4.2"), &col(ColumnType::Integer)),
            Err(CoercionError::InvalidInteger { .. })
        ));
        assert!(matches!(
            coerce(Some(""), &col(ColumnType::Integer)),
            Err(CoercionError::InvalidInteger { .. })
        ));
    }

    #[test]
    fn test_decimal() {
        let v = coerce(Some("1250.50"), &col(ColumnType::Decimal)).unwrap();
        assert_eq!(v, SqlValue::Decimal(Decimal::new(125050, 2)));
        assert_eq!(
            coerce(Some("12,5"), &col(ColumnType::Decimal)),
            Err(CoercionError::InvalidDecimal { value: "12,5".into() })
        );
    }

    #[test]
    fn test_boolean_literals() {
        for t in ["1", "TRUE", "True", "y", "Yes"] {
            assert_eq!(coerce(Some(t), &col(ColumnType::Boolean)).unwrap(), SqlValue::Boolean(true));
        }
        for f in ["0", "false", "F", "no"] {
            assert_eq!(coerce(Some(f), &col(ColumnType::Boolean)).unwrap(), SqlValue::Boolean(false));
        }
        assert!(matches!(
            coerce(Some("maybe"), &col(ColumnType::Boolean)),
            Err(CoercionError::InvalidBoolean { .. })
        ));
    }

    #[test]
    fn test_date() {
        assert_eq!(
            coerce(Some("2024-02-29"), &col(ColumnType::Date)).unwrap(),
            SqlValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert!(matches!(
            coerce(Some("2023-02-29"), &col(ColumnType::Date)),
            Err(CoercionError::InvalidDate { .. })
        ));
        assert!(matches!(
            coerce(Some("02/01/2024"), &col(ColumnType::Date)),
            Err(CoercionError::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_datetime_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        for raw in ["2024-01-15 09:30:00", "2024-01-15T09:30:00", "2024-01-15 09:30:00.000"] {
            assert_eq!(
                coerce(Some(raw), &col(ColumnType::DateTime)).unwrap(),
                SqlValue::DateTime(expected)
            );
        }
        assert_eq!(
            coerce(Some("2024-01-15"), &col(ColumnType::DateTime)).unwrap(),
            SqlValue::DateTime(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
        assert!(matches!(
            coerce(Some("yesterday"), &col(ColumnType::DateTime)),
            Err(CoercionError::InvalidDateTime { .. })
        ));
    }

    #[test]
    fn test_datetime_fraction_limited_to_seven_digits() {
        assert!(coerce(Some("2024-01-15 09:30:00.1234567"), &col(ColumnType::DateTime)).is_ok());
        assert!(matches!(
            coerce(Some("2024-01-15 09:30:00.12345678"), &col(ColumnType::DateTime)),
            Err(CoercionError::InvalidDateTime { .. })
        ));
    }

    #[test]
    fn test_only_spaces_are_trimmed() {
        assert_eq!(coerce(Some(" yes "), &col(ColumnType::Boolean)).unwrap(), SqlValue::Boolean(true));
        assert!(matches!(
            coerce(Some("yes\t"), &col(ColumnType::Boolean)),
            Err(CoercionError::InvalidBoolean { .. })
        ));
        assert!(matches!(
            coerce(Some("\u{a0}42"), &col(ColumnType::Integer)),
            Err(CoercionError::InvalidInteger { .. })
        ));
        assert!(matches!(
            coerce(Some("2024-01-15\n"), &col(ColumnType::Date)),
            Err(CoercionError::InvalidDate { .. })
        ));
    }
}
