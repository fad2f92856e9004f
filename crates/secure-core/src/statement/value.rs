//! Column values exchanged with the row store.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// A dialect-neutral column value.
///
/// Both backends store booleans as integers and timestamps as fixed-width
/// RFC 3339 text, so three variants cover every column in the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// A 64-bit integer (also used for booleans).
    Integer(i64),
    /// Text (also used for timestamps, enums and JSON).
    Text(String),
}

impl SqlValue {
    /// Returns true for NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Returns the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Integer(_) => "integer",
            SqlValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

/// Converts a Rust value into a column value.
pub trait IntoSqlValue {
    /// Returns the column representation of this value.
    fn to_sql_value(&self) -> SqlValue;
}

/// Converts a column value back into a Rust value.
pub trait FromSqlValue: Sized {
    /// Decodes the column value, describing the mismatch on failure.
    fn from_sql_value(value: &SqlValue) -> Result<Self, String>;
}

/// Formats a timestamp the way every table stores it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", text, e))
}

fn mismatch(expected: &str, value: &SqlValue) -> String {
    format!("expected {}, found {}", expected, value.kind())
}

impl IntoSqlValue for SqlValue {
    fn to_sql_value(&self) -> SqlValue {
        self.clone()
    }
}

impl<T: IntoSqlValue + ?Sized> IntoSqlValue for &T {
    fn to_sql_value(&self) -> SqlValue {
        (**self).to_sql_value()
    }
}

impl IntoSqlValue for str {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Text(self.to_string())
    }
}

impl IntoSqlValue for String {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(s) => Ok(s.clone()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl IntoSqlValue for i64 {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Integer(*self)
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Integer(i) => Ok(*i),
            // COUNT(*) and numeric text coming back from emulators
            SqlValue::Text(s) => s.parse().map_err(|_| mismatch("integer", value)),
            SqlValue::Null => Err(mismatch("integer", value)),
        }
    }
}

impl IntoSqlValue for u32 {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Integer(i64::from(*self))
    }
}

impl IntoSqlValue for bool {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Integer(i64::from(*self))
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Integer(i) => Ok(*i != 0),
            other => Err(mismatch("integer flag", other)),
        }
    }
}

impl IntoSqlValue for DateTime<Utc> {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Text(format_timestamp(self))
    }
}

impl FromSqlValue for DateTime<Utc> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(s) => parse_timestamp(s),
            other => Err(mismatch("timestamp text", other)),
        }
    }
}

impl IntoSqlValue for Value {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Text(self.to_string())
    }
}

impl FromSqlValue for Value {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Text(s) => serde_json::from_str(s).map_err(|e| e.to_string()),
            other => Err(mismatch("json text", other)),
        }
    }
}

impl<T: IntoSqlValue> IntoSqlValue for Option<T> {
    fn to_sql_value(&self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}

/// Implements the column conversions for an enum stored as its text code.
///
/// The enum must provide `as_str(&self) -> &'static str` and `FromStr`.
#[macro_export]
macro_rules! text_column_enum {
    ($ty:ty) => {
        impl $crate::statement::IntoSqlValue for $ty {
            fn to_sql_value(&self) -> $crate::statement::SqlValue {
                $crate::statement::SqlValue::Text(self.as_str().to_string())
            }
        }

        impl $crate::statement::FromSqlValue for $ty {
            fn from_sql_value(value: &$crate::statement::SqlValue) -> Result<Self, String> {
                match value {
                    $crate::statement::SqlValue::Text(s) => {
                        s.parse::<$ty>().map_err(|e| e.to_string())
                    }
                    other => Err(format!("expected enum text, found {:?}", other)),
                }
            }
        }
    };
}
