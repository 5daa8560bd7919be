//! Row ordering for the merge loop.
//!
//! Both cursors deliver rows in the same total order, so "not equal" always
//! means "sorts before" or "sorts after" and the merge never needs to look
//! beyond the current row on each side. The classification is an exhaustive
//! enum; there is no unreachable fallback branch.

use std::cmp::Ordering;

use crate::core::schema::CompareClass;
use crate::core::value::{Row, SqlValue};

/// Where the current pair of buffered rows stands in the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Only the source has a row left; it must be inserted.
    SourceOnly,
    /// Only the destination has a row left; it must be deleted.
    DestOnly,
    /// Both sides have a row; `Ordering` is source relative to destination.
    Both(Ordering),
}

/// Classify the buffered row pair. Caller handles the (None, None) loop exit
/// before calling.
pub fn classify(
    source: Option<&Row>,
    dest: Option<&Row>,
    classes: &[CompareClass],
) -> Option<MergeState> {
    match (source, dest) {
        (None, None) => None,
        (Some(_), None) => Some(MergeState::SourceOnly),
        (None, Some(_)) => Some(MergeState::DestOnly),
        (Some(s), Some(d)) => Some(MergeState::Both(compare_rows(s, d, classes))),
    }
}

/// Total ordering between two rows under the per-column comparison classes.
///
/// Left-to-right; the first non-equal column decides.
pub fn compare_rows(a: &Row, b: &Row, classes: &[CompareClass]) -> Ordering {
    for ((av, bv), class) in a.iter().zip(b.iter()).zip(classes.iter()) {
        let ord = match class {
            CompareClass::Numeric => compare_numeric(av, bv),
            CompareClass::Str => compare_string(av, bv),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    // Key columns sort first in the row, so equal prefixes of unequal length
    // cannot happen once schema validation has passed.
    a.len().cmp(&b.len())
}

/// Numeric comparison with SQL "nulls sort last" semantics.
fn compare_numeric(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, false) => match (a.as_decimal(), b.as_decimal()) {
            (Some(x), Some(y)) => x.cmp(&y),
            // Out-of-range or non-numeric content: fall back to f64, then to
            // the rendered form so the ordering stays total.
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.render().cmp(&b.render()),
            },
        },
    }
}

/// String comparison where NULL and empty are equivalent and sort last.
fn compare_string(a: &SqlValue, b: &SqlValue) -> Ordering {
    let a = a.render();
    let b = b.render();
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, false) => a.as_bytes().cmp(b.as_bytes()),
    }
}
