//! Row and schema comparators.
//!
//! - [`row`]: total ordering between buffered rows, merge classification
//! - [`schema`]: fail-fast descriptor comparison before any data moves

pub mod row;
pub mod schema;

pub use row::{classify, compare_rows, MergeState};
