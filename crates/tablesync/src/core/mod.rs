//! Core abstractions shared by the merge loop and the engine drivers.
//!
//! - [`schema`]: column descriptors, comparison classes, unique keys
//! - [`value`]: engine-agnostic SQL value representation
//! - [`traits`]: the [`RowSource`](traits::RowSource) client contract

pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{dump_colinfo, ColumnInfo, CompareClass, UniqueKey};
pub use traits::{RowSource, SelectOptions};
pub use value::{Row, SqlValue};
