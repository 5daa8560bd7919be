//! Column descriptors and unique-key metadata.
//!
//! These types are engine-agnostic: the native data type string is retained
//! for diagnostics and NULL binding, but equality between schemas is decided
//! by comparison class, precision, and scale only.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-column comparison class driving ordering and equality semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareClass {
    /// Compared numerically; NULL sorts after any number.
    Numeric,
    /// Compared as byte strings; NULL and empty sort after any non-empty value.
    Str,
}

impl fmt::Display for CompareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareClass::Numeric => write!(f, "numeric"),
            CompareClass::Str => write!(f, "string"),
        }
    }
}

impl CompareClass {
    /// Derive the comparison class from an engine's declared data type.
    ///
    /// The families here cover MySQL and PostgreSQL names; anything
    /// unrecognized is compared as a string, which is always a total order.
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type.to_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "serial"
            | "bigserial" | "smallserial" | "int2" | "int4" | "int8" | "decimal" | "numeric"
            | "float" | "float4" | "float8" | "double" | "double precision" | "real" | "money"
            | "bit" | "bool" | "boolean" | "year" => CompareClass::Numeric,
            _ => CompareClass::Str,
        }
    }
}

/// Column descriptor as captured from the engine catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Native data type string (informational, engine-specific).
    pub data_type: String,

    /// Comparison class governing ordering and equality.
    pub class: CompareClass,

    /// Numeric precision (0 when not applicable).
    pub precision: i32,

    /// Numeric scale (0 when not applicable).
    pub scale: i32,
}

impl ColumnInfo {
    /// Canonical one-line form used for the fast schema equality check.
    ///
    /// Native type names are deliberately excluded so that, say, MySQL
    /// `int` and PostgreSQL `integer` columns compare equal.
    pub fn canonical(&self) -> String {
        format!(
            "{} class={} precision={} scale={}",
            self.name, self.class, self.precision, self.scale
        )
    }
}

/// Canonical multi-line form of a full descriptor list.
pub fn dump_colinfo(cols: &[ColumnInfo]) -> String {
    let mut out = String::new();
    for col in cols {
        out.push_str(&col.canonical());
        out.push('\n');
    }
    out
}

/// A unique constraint or unique index: a named set of columns that together
/// identify at most one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueKey {
    /// Constraint or index name.
    pub name: String,

    /// Member columns in index order.
    pub columns: Vec<String>,
}
