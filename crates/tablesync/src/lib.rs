//! Streaming merge-diff synchronization between heterogeneous database
//! tables.
//!
//! `tablesync` converges a destination table to match a source table by
//! walking both as ordered row streams and applying the minimal set of
//! inserts and deletes. The two tables may live on different engines
//! (MySQL/MariaDB and PostgreSQL in either role); rows are compared through
//! an engine-neutral value model, so a MySQL `decimal` and a Postgres
//! `numeric` holding the same number are the same row.
//!
//! Memory use is flat: one buffered row per side, whatever the table size.
//! Mutations run in incremental batches committed every `commit_interval`
//! rows, so an interrupted run leaves the destination partially converged
//! rather than rolled back wholesale.
//!
//! # Example
//!
//! ```no_run
//! use tablesync::{DbConfig, SyncOptions, Syncer};
//!
//! # async fn demo() -> tablesync::Result<()> {
//! let source = DbConfig {
//!     r#type: "mysql".into(),
//!     host: "db1.internal".into(),
//!     port: None,
//!     database: "app".into(),
//!     user: "sync".into(),
//!     password: "secret".into(),
//!     schema: None,
//! };
//! let dest = DbConfig { r#type: "postgres".into(), host: "db2.internal".into(), ..source.clone() };
//!
//! let mut opts = SyncOptions::new("people", "people");
//! opts.commit_interval = 500;
//!
//! let result = Syncer::between(source.connect().await?, dest.connect().await?, opts)
//!     .run()
//!     .await;
//! assert_eq!(result.status, "ok");
//! # Ok(())
//! # }
//! ```

pub mod compare;
pub mod config;
pub mod core;
pub mod drivers;
pub mod dump;
pub mod error;
pub mod sync;

pub use crate::config::{DbConfig, SyncOptions};
pub use crate::core::schema::{ColumnInfo, CompareClass, UniqueKey};
pub use crate::core::traits::{RowSource, SelectOptions};
pub use crate::core::value::{Row, SqlValue};
pub use crate::drivers::{ClientImpl, DbHandle};
pub use crate::error::{Result, SyncError};
pub use crate::sync::{Endpoint, Hooks, SyncResult, Syncer};
