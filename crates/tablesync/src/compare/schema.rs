//! Schema comparison between source and destination descriptor lists.
//!
//! Runs after client init and before the first row is fetched, so a
//! mismatched table never sees a mutation. A canonical-string equality check
//! short-circuits the common all-good case; only on a difference do we walk
//! both lists positionally and build a per-column report, since more than one
//! attribute can disagree for the same column.

use std::collections::HashSet;

use crate::core::schema::{dump_colinfo, ColumnInfo};
use crate::error::{Result, SyncError};

/// Compare two descriptor lists.
///
/// Name and count are always checked; class, precision, and scale only when
/// `full` is set (the `compare_schemas` option). Columns in `skip` are
/// ignored on both sides.
pub fn compare(
    source: &[ColumnInfo],
    dest: &[ColumnInfo],
    skip: &HashSet<String>,
    full: bool,
) -> Result<()> {
    // Fast path: canonical dumps agree, nothing to report.
    if full && dump_colinfo(source) == dump_colinfo(dest) {
        return Ok(());
    }

    if source.len() != dest.len() {
        return Err(SyncError::Schema(format!(
            "column count mismatch: source has {}, dest has {}",
            source.len(),
            dest.len()
        )));
    }

    let mut report = Vec::new();

    for (src, dst) in source.iter().zip(dest.iter()) {
        if skip.contains(&src.name) || skip.contains(&dst.name) {
            continue;
        }

        if src.name != dst.name {
            report.push(format!(
                "column name mismatch: source '{}' vs dest '{}'",
                src.name, dst.name
            ));
            // Attribute checks against a misaligned column would only add noise.
            continue;
        }

        if !full {
            continue;
        }

        if src.class != dst.class {
            report.push(format!(
                "column '{}': class mismatch: source {} vs dest {}",
                src.name, src.class, dst.class
            ));
        }
        if src.precision != dst.precision {
            report.push(format!(
                "column '{}': precision mismatch: source {} vs dest {}",
                src.name, src.precision, dst.precision
            ));
        }
        if src.scale != dst.scale {
            report.push(format!(
                "column '{}': scale mismatch: source {} vs dest {}",
                src.name, src.scale, dst.scale
            ));
        }
    }

    if report.is_empty() {
        Ok(())
    } else {
        Err(SyncError::Schema(report.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::CompareClass;

    fn col(name: &str, class: CompareClass, precision: i32, scale: i32) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: String::new(),
            class,
            precision,
            scale,
        }
    }

    fn no_skip() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn test_identical_schemas() {
        let cols = vec![
            col("id", CompareClass::Numeric, 10, 0),
            col("name", CompareClass::Str, 0, 0),
        ];
        assert!(compare(&cols, &cols, &no_skip(), true).is_ok());
        assert!(compare(&cols, &cols, &no_skip(), false).is_ok());
    }

    #[test]
    fn test_count_mismatch_reported_first() {
        let src = vec![
            col("id", CompareClass::Numeric, 10, 0),
            col("name", CompareClass::Str, 0, 0),
        ];
        let dst = vec![col("id", CompareClass::Numeric, 10, 0)];

        let err = compare(&src, &dst, &no_skip(), true).unwrap_err();
        assert!(err.to_string().contains("column count mismatch"));
    }

    #[test]
    fn test_precision_mismatch_names_column() {
        let src = vec![
            col("id", CompareClass::Numeric, 10, 0),
            col("name", CompareClass::Str, 64, 0),
        ];
        let dst = vec![
            col("id", CompareClass::Numeric, 10, 0),
            col("name", CompareClass::Str, 32, 0),
        ];

        let err = compare(&src, &dst, &no_skip(), true).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'name'"), "{}", msg);
        assert!(msg.contains("precision mismatch"), "{}", msg);
    }

    #[test]
    fn test_multiple_mismatches_same_column() {
        let src = vec![col("amount", CompareClass::Numeric, 12, 2)];
        let dst = vec![col("amount", CompareClass::Numeric, 10, 4)];

        let msg = compare(&src, &dst, &no_skip(), true)
            .unwrap_err()
            .to_string();
        assert!(msg.contains("precision mismatch"));
        assert!(msg.contains("scale mismatch"));
    }

    #[test]
    fn test_skipped_column_ignored() {
        let src = vec![col("payload", CompareClass::Str, 64, 0)];
        let dst = vec![col("payload", CompareClass::Str, 32, 0)];

        let skip: HashSet<String> = ["payload".to_string()].into_iter().collect();
        assert!(compare(&src, &dst, &skip, true).is_ok());
    }

    #[test]
    fn test_name_checked_even_without_full() {
        let src = vec![col("id", CompareClass::Numeric, 10, 0)];
        let dst = vec![col("ident", CompareClass::Numeric, 10, 0)];

        let err = compare(&src, &dst, &no_skip(), false).unwrap_err();
        assert!(err.to_string().contains("name mismatch"));

        // Attribute differences pass when full comparison is off.
        let dst2 = vec![col("id", CompareClass::Numeric, 11, 0)];
        assert!(compare(&src, &dst2, &no_skip(), false).is_ok());
    }
}
