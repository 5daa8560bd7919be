//! Engine-specific row-source clients.
//!
//! Each driver module implements [`RowSource`] for one engine:
//!
//! - [`mysql`]: MySQL/MariaDB client
//! - [`postgres`]: PostgreSQL client
//! - [`ukey`]: unique-key catalog introspection shared by both
//!
//! Dispatch is by enum, not trait objects, mirroring the dialect dispatch
//! this grew out of: [`DbHandle`] tags the connection with its engine at
//! construction time and [`ClientImpl`] delegates every trait method.
//! Unknown engine names fail at connect time, never silently.

pub mod mysql;
pub mod postgres;
pub mod ukey;

pub use mysql::MysqlClient;
pub use postgres::PostgresClient;
pub use ukey::UkeyCache;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::DbConfig;
use crate::core::schema::{ColumnInfo, CompareClass};
use crate::core::traits::{RowSource, SelectOptions};
use crate::core::value::Row;
use crate::error::{Result, SyncError};

/// Connection pool acquire timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool size per side: one ordered cursor, one mutation transaction, and
/// room for a diagnostic dump scan.
const POOL_MAX_CONNECTIONS: u32 = 4;

/// Which side of the sync a client serves. Used for log labels and error
/// attribution only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Dest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Dest => "dest",
        }
    }
}

/// An engine-tagged live connection, plus the identity used for the
/// unique-key cache.
#[derive(Clone)]
pub enum DbHandle {
    Mysql {
        pool: MySqlPool,
        schema: String,
        identity: String,
    },
    Postgres {
        pool: PgPool,
        schema: String,
        identity: String,
    },
}

impl DbHandle {
    /// Default schema for unqualified table names on this connection.
    pub fn schema(&self) -> &str {
        match self {
            DbHandle::Mysql { schema, .. } => schema,
            DbHandle::Postgres { schema, .. } => schema,
        }
    }

    /// Stable identity for cache keying.
    pub fn identity(&self) -> &str {
        match self {
            DbHandle::Mysql { identity, .. } => identity,
            DbHandle::Postgres { identity, .. } => identity,
        }
    }
}

impl DbConfig {
    /// Open a connection pool for this side and tag it with its engine.
    ///
    /// # Errors
    ///
    /// Fails on unknown engine names and on connection failures.
    pub async fn connect(&self) -> Result<DbHandle> {
        match self.r#type.to_lowercase().as_str() {
            "mysql" | "mariadb" => {
                let options = MySqlConnectOptions::new()
                    .host(&self.host)
                    .port(self.effective_port())
                    .database(&self.database)
                    .username(&self.user)
                    .password(&self.password);

                let pool = MySqlPoolOptions::new()
                    .max_connections(POOL_MAX_CONNECTIONS)
                    .acquire_timeout(POOL_CONNECTION_TIMEOUT)
                    .connect_with(options)
                    .await?;

                sqlx::query("SELECT 1").fetch_one(&pool).await?;

                info!(
                    "Connected to MySQL: {}:{}/{}",
                    self.host,
                    self.effective_port(),
                    self.database
                );

                Ok(DbHandle::Mysql {
                    pool,
                    schema: self.effective_schema(),
                    identity: self.identity(),
                })
            }
            "postgres" | "postgresql" | "pg" => {
                let options = PgConnectOptions::new()
                    .host(&self.host)
                    .port(self.effective_port())
                    .database(&self.database)
                    .username(&self.user)
                    .password(&self.password);

                let pool = PgPoolOptions::new()
                    .max_connections(POOL_MAX_CONNECTIONS)
                    .acquire_timeout(POOL_CONNECTION_TIMEOUT)
                    .connect_with(options)
                    .await?;

                sqlx::query("SELECT 1").fetch_one(&pool).await?;

                info!(
                    "Connected to PostgreSQL: {}:{}/{}",
                    self.host,
                    self.effective_port(),
                    self.database
                );

                Ok(DbHandle::Postgres {
                    pool,
                    schema: self.effective_schema(),
                    identity: self.identity(),
                })
            }
            other => Err(SyncError::Config(format!(
                "Unknown database type: '{}'. Supported types: mysql, postgres",
                other
            ))),
        }
    }
}

/// Enum-based static dispatch over the engine clients.
pub enum ClientImpl {
    Mysql(MysqlClient),
    Postgres(PostgresClient),
}

impl ClientImpl {
    /// Create a client for a table on the given connection.
    ///
    /// `table` may be schema-qualified; otherwise the handle's default
    /// schema applies.
    pub fn new(handle: DbHandle, table: &str, role: Role) -> Self {
        let (schema, table) = crate::config::split_table(table, handle.schema());
        match handle {
            DbHandle::Mysql { pool, .. } => {
                ClientImpl::Mysql(MysqlClient::new(pool, schema, table, role))
            }
            DbHandle::Postgres { pool, .. } => {
                ClientImpl::Postgres(PostgresClient::new(pool, schema, table, role))
            }
        }
    }
}

#[async_trait]
impl RowSource for ClientImpl {
    async fn init(&mut self, opts: &SelectOptions) -> Result<()> {
        match self {
            ClientImpl::Mysql(c) => c.init(opts).await,
            ClientImpl::Postgres(c) => c.init(opts).await,
        }
    }

    fn colnames(&self) -> &[String] {
        match self {
            ClientImpl::Mysql(c) => c.colnames(),
            ClientImpl::Postgres(c) => c.colnames(),
        }
    }

    fn compare_classes(&self) -> &[CompareClass] {
        match self {
            ClientImpl::Mysql(c) => c.compare_classes(),
            ClientImpl::Postgres(c) => c.compare_classes(),
        }
    }

    fn colinfo(&self) -> &[ColumnInfo] {
        match self {
            ClientImpl::Mysql(c) => c.colinfo(),
            ClientImpl::Postgres(c) => c.colinfo(),
        }
    }

    fn dump_colinfo(&self) -> String {
        match self {
            ClientImpl::Mysql(c) => c.dump_colinfo(),
            ClientImpl::Postgres(c) => c.dump_colinfo(),
        }
    }

    fn skipcols(&self) -> &HashSet<String> {
        match self {
            ClientImpl::Mysql(c) => c.skipcols(),
            ClientImpl::Postgres(c) => c.skipcols(),
        }
    }

    async fn fetch_row(&mut self) -> Result<Option<Row>> {
        match self {
            ClientImpl::Mysql(c) => c.fetch_row().await,
            ClientImpl::Postgres(c) => c.fetch_row().await,
        }
    }

    async fn insert_row(&mut self, row: &Row) -> Result<()> {
        match self {
            ClientImpl::Mysql(c) => c.insert_row(row).await,
            ClientImpl::Postgres(c) => c.insert_row(row).await,
        }
    }

    async fn delete_row(&mut self, row: &Row) -> Result<u64> {
        match self {
            ClientImpl::Mysql(c) => c.delete_row(row).await,
            ClientImpl::Postgres(c) => c.delete_row(row).await,
        }
    }

    async fn delete_uniq(&mut self, row: &Row) -> Result<u64> {
        match self {
            ClientImpl::Mysql(c) => c.delete_uniq(row).await,
            ClientImpl::Postgres(c) => c.delete_uniq(row).await,
        }
    }

    async fn row_count(&mut self) -> Result<i64> {
        match self {
            ClientImpl::Mysql(c) => c.row_count().await,
            ClientImpl::Postgres(c) => c.row_count().await,
        }
    }

    async fn check_pending(&mut self) -> Result<()> {
        match self {
            ClientImpl::Mysql(c) => c.check_pending().await,
            ClientImpl::Postgres(c) => c.check_pending().await,
        }
    }

    async fn close_queries(&mut self) -> Result<()> {
        match self {
            ClientImpl::Mysql(c) => c.close_queries().await,
            ClientImpl::Postgres(c) => c.close_queries().await,
        }
    }

    async fn roll_back(&mut self) -> Result<()> {
        match self {
            ClientImpl::Mysql(c) => c.roll_back().await,
            ClientImpl::Postgres(c) => c.roll_back().await,
        }
    }

    async fn open_dump(&self) -> Result<mpsc::Receiver<Result<Row>>> {
        match self {
            ClientImpl::Mysql(c) => c.open_dump().await,
            ClientImpl::Postgres(c) => c.open_dump().await,
        }
    }

    fn inserts(&self) -> u64 {
        match self {
            ClientImpl::Mysql(c) => c.inserts(),
            ClientImpl::Postgres(c) => c.inserts(),
        }
    }

    fn deletes(&self) -> u64 {
        match self {
            ClientImpl::Mysql(c) => c.deletes(),
            ClientImpl::Postgres(c) => c.deletes(),
        }
    }

    fn commits(&self) -> u64 {
        match self {
            ClientImpl::Mysql(c) => c.commits(),
            ClientImpl::Postgres(c) => c.commits(),
        }
    }

    fn label(&self) -> String {
        match self {
            ClientImpl::Mysql(c) => c.label(),
            ClientImpl::Postgres(c) => c.label(),
        }
    }
}

/// Normalize catalog precision/scale into engine-neutral values.
///
/// Only fixed-point types carry real precision/scale and only character
/// types carry a meaningful length; integer and float widths are reported in
/// incompatible units between engines (digits vs. bits) and are zeroed so
/// cross-engine schema comparison works on identical DDL.
pub(crate) fn normalize_precision(
    data_type: &str,
    num_precision: i32,
    num_scale: i32,
    char_len: i32,
) -> (i32, i32) {
    let dt = data_type.to_lowercase();
    match dt.as_str() {
        "decimal" | "numeric" => (num_precision, num_scale),
        _ if CompareClass::from_data_type(&dt) == CompareClass::Numeric => (0, 0),
        _ => (char_len.max(0), 0),
    }
}
