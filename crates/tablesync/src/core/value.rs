//! SQL value representation for engine-agnostic row handling.
//!
//! Rows flow through the merge loop as positional `Vec<SqlValue>`. The enum
//! deliberately carries fewer variants than a full wire-protocol mapping:
//! every value only needs to support ordering (numeric or stringified) and
//! re-binding into an INSERT/DELETE statement on the destination engine.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// A single column value, decoded from either engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean and single-bit types. Compares as 0/1.
    Bool(bool),

    /// Integer types (tinyint through bigint).
    I64(i64),

    /// Floating point (float/real/double precision).
    F64(f64),

    /// Fixed-point decimal/numeric.
    Decimal(Decimal),

    /// Character data (char, varchar, text, enum, json, ...).
    Text(String),

    /// Short binary data (binary, varbinary). LOB types never reach a row.
    Bytes(Vec<u8>),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
}

/// A full table row, positional and aligned with the column descriptor list.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Numeric view of the value for numeric-class comparison.
    ///
    /// Returns `None` for NULL and for values that have no numeric reading.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(v) => Some(Decimal::from(*v as i64)),
            SqlValue::I64(v) => Some(Decimal::from(*v)),
            SqlValue::F64(v) => Decimal::from_f64(*v),
            SqlValue::Decimal(v) => Some(*v),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Fallback numeric view for values outside `Decimal` range.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(v) => Some(f64::from(*v)),
            SqlValue::I64(v) => Some(*v as f64),
            SqlValue::F64(v) => Some(*v),
            SqlValue::Decimal(v) => rust_decimal::prelude::ToPrimitive::to_f64(v),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String view of the value for string-class comparison and CSV fields.
    ///
    /// NULL renders as the empty string; ordering treats the two identically.
    /// Temporal values render in ISO order so lexicographic comparison agrees
    /// with chronological comparison.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Bool(v) => (*v as u8).to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => b.iter().map(|x| format!("{:02x}", x)).collect(),
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveTime> for SqlValue {
    fn from(v: NaiveTime) -> Self {
        SqlValue::Time(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::I64(0).is_null());
        assert!(!SqlValue::Text(String::new()).is_null());
    }

    #[test]
    fn test_as_decimal() {
        assert_eq!(SqlValue::I64(42).as_decimal(), Some(Decimal::from(42)));
        assert_eq!(
            SqlValue::Text("3.50".into()).as_decimal(),
            Some("3.50".parse().unwrap())
        );
        assert_eq!(SqlValue::Null.as_decimal(), None);
        assert_eq!(SqlValue::Text("abc".into()).as_decimal(), None);
    }

    #[test]
    fn test_render() {
        assert_eq!(SqlValue::Null.render(), "");
        assert_eq!(SqlValue::I64(-7).render(), "-7");
        assert_eq!(SqlValue::Bool(true).render(), "1");
        assert_eq!(SqlValue::Text("hi".into()).render(), "hi");
        assert_eq!(SqlValue::Bytes(vec![0xde, 0xad]).render(), "dead");

        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(SqlValue::Date(d).render(), "2024-03-09");
    }

    #[test]
    fn test_from_option() {
        let v: SqlValue = Option::<i64>::None.into();
        assert!(v.is_null());
        let v: SqlValue = Some(5i64).into();
        assert_eq!(v, SqlValue::I64(5));
    }
}
