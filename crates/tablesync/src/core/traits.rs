//! The row-source client abstraction.
//!
//! [`RowSource`] wraps one table as an ordered, single-pass stream of rows
//! plus the mutation primitives the merge loop needs. One implementation
//! exists per engine (see `drivers`); the sync driver only ever talks to this
//! trait, so engine SQL dialects never leak into the merge algorithm.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

use super::schema::{ColumnInfo, CompareClass};
use super::value::Row;

/// Options controlling how a client opens its ordered cursor.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Columns excluded from the sync entirely (not selected, not inserted).
    pub excl_cols: Vec<String>,

    /// Columns excluded from comparison but inserted as NULL, on top of the
    /// LOB types the client always skips.
    pub mask_cols: Vec<String>,

    /// Resolved unique-key columns for `delete_uniq` and `ukey_sort`.
    pub key_cols: Vec<String>,

    /// Order by the unique-key columns only instead of the full column list.
    pub ukey_sort: bool,

    /// Raw predicate fragment appended to the generated SELECT.
    pub where_clause: Option<String>,

    /// Bind parameters for `where_clause`.
    pub where_args: Vec<String>,

    /// Mutations per intermediate commit in `check_pending`.
    pub commit_interval: u64,
}

/// An ordered, rewindable-once stream over one table, with mutations.
///
/// # End of stream vs. failure
///
/// `fetch_row` returns `Ok(None)` at end of stream. An `Err` from any method
/// is a genuine failure and aborts the whole sync.
#[async_trait]
pub trait RowSource: Send {
    /// Open the ordered cursor and capture column metadata.
    async fn init(&mut self, opts: &SelectOptions) -> Result<()>;

    /// Ordered names of the compared columns. Valid after `init`.
    fn colnames(&self) -> &[String];

    /// Parallel comparison classes for the compared columns.
    fn compare_classes(&self) -> &[CompareClass];

    /// Full descriptors for the compared columns.
    fn colinfo(&self) -> &[ColumnInfo];

    /// Canonical descriptor string for the fast schema equality check.
    fn dump_colinfo(&self) -> String;

    /// Columns excluded from comparison (LOBs plus masked columns).
    fn skipcols(&self) -> &HashSet<String>;

    /// Advance the cursor by one row.
    async fn fetch_row(&mut self) -> Result<Option<Row>>;

    /// Insert a row; skipped columns are written as NULL.
    async fn insert_row(&mut self, row: &Row) -> Result<()>;

    /// Delete at most one row matching every compared column value.
    ///
    /// Zero rows affected is a normal outcome (the row was already gone).
    async fn delete_row(&mut self, row: &Row) -> Result<u64>;

    /// Delete any rows matching the unique-key columns of `row`.
    async fn delete_uniq(&mut self, row: &Row) -> Result<u64>;

    /// Current total row count of the table.
    async fn row_count(&mut self) -> Result<i64>;

    /// Intermediate commit hook, called every merge iteration. Must be cheap
    /// when nothing is pending.
    async fn check_pending(&mut self) -> Result<()>;

    /// Close the cursor and commit any pending mutations.
    async fn close_queries(&mut self) -> Result<()>;

    /// Best-effort rollback of uncommitted mutations.
    async fn roll_back(&mut self) -> Result<()>;

    /// Open an independent full scan for diagnostic CSV dumps.
    async fn open_dump(&self) -> Result<mpsc::Receiver<Result<Row>>>;

    /// Rows inserted so far.
    fn inserts(&self) -> u64;

    /// Rows deleted so far.
    fn deletes(&self) -> u64;

    /// Intermediate commits issued so far.
    fn commits(&self) -> u64;

    /// Short side label for logging ("source"/"dest" plus table).
    fn label(&self) -> String;
}
