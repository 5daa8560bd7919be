//! MySQL/MariaDB row-source client.
//!
//! Uses SQLx for pooling and async execution. The ordered cursor is a
//! spawned reader task feeding a bounded channel, so the merge loop applies
//! backpressure instead of buffering the table.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlRow};
use sqlx::query::Query;
use sqlx::{MySql, Row as SqlxRow, Transaction, ValueRef};
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::schema::{dump_colinfo, ColumnInfo, CompareClass};
use crate::core::traits::{RowSource, SelectOptions};
use crate::core::value::{Row, SqlValue};
use crate::error::{Result, SyncError};

use super::{normalize_precision, Role};

/// Capacity of the row channel between the reader task and the merge loop.
const ROW_CHANNEL_CAPACITY: usize = 256;

/// MySQL/MariaDB client.
pub struct MysqlClient {
    pool: MySqlPool,
    schema: String,
    table: String,
    role: Role,

    cols: Vec<ColumnInfo>,
    colnames: Vec<String>,
    classes: Vec<CompareClass>,
    skipped: Vec<ColumnInfo>,
    skip_names: HashSet<String>,
    key_cols: Vec<String>,

    select_sql: String,
    insert_sql: String,
    where_args: Vec<String>,

    rx: Option<mpsc::Receiver<Result<Row>>>,
    tx: Option<Transaction<'static, MySql>>,
    pending: u64,
    commit_interval: u64,

    inserts: u64,
    deletes: u64,
    commits: u64,
}

impl MysqlClient {
    pub fn new(pool: MySqlPool, schema: String, table: String, role: Role) -> Self {
        Self {
            pool,
            schema,
            table,
            role,
            cols: Vec::new(),
            colnames: Vec::new(),
            classes: Vec::new(),
            skipped: Vec::new(),
            skip_names: HashSet::new(),
            key_cols: Vec::new(),
            select_sql: String::new(),
            insert_sql: String::new(),
            where_args: Vec::new(),
            rx: None,
            tx: None,
            pending: 0,
            commit_interval: 1000,
            inserts: 0,
            deletes: 0,
            commits: 0,
        }
    }

    fn quote_ident(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn qualified(&self) -> String {
        format!(
            "{}.{}",
            Self::quote_ident(&self.schema),
            Self::quote_ident(&self.table)
        )
    }

    /// LOB types are never compared and are written as NULL on insert.
    fn is_lob(data_type: &str) -> bool {
        matches!(
            data_type,
            "tinyblob" | "blob" | "mediumblob" | "longblob" | "mediumtext" | "longtext"
        )
    }

    /// Character types whose ORDER BY needs a binary cast so the database
    /// order matches the comparator's byte order.
    fn is_char_type(data_type: &str) -> bool {
        matches!(
            data_type,
            "char" | "varchar" | "text" | "tinytext" | "enum" | "set" | "json"
        )
    }

    /// Load column metadata from the catalog.
    async fn load_colinfo(&self) -> Result<Vec<ColumnInfo>> {
        // CAST to CHAR to handle collation differences where
        // information_schema may return VARBINARY instead of VARCHAR.
        let query = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)) AS column_name,
                CAST(DATA_TYPE AS CHAR(255)) AS data_type,
                CAST(COALESCE(NUMERIC_PRECISION, 0) AS SIGNED) AS num_precision,
                CAST(COALESCE(NUMERIC_SCALE, 0) AS SIGNED) AS num_scale,
                CAST(CASE
                    WHEN CHARACTER_MAXIMUM_LENGTH IS NULL THEN 0
                    WHEN CHARACTER_MAXIMUM_LENGTH > 2147483647 THEN -1
                    ELSE CHARACTER_MAXIMUM_LENGTH
                END AS SIGNED) AS char_len
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.schema)
            .bind(&self.table)
            .fetch_all(&self.pool)
            .await?;

        let mut cols = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("column_name");
            let data_type: String = row.get::<String, _>("data_type").to_lowercase();
            let num_precision = row.get::<i64, _>("num_precision") as i32;
            let num_scale = row.get::<i64, _>("num_scale") as i32;
            let char_len = row.get::<i64, _>("char_len") as i32;

            let (precision, scale) =
                normalize_precision(&data_type, num_precision, num_scale, char_len);
            cols.push(ColumnInfo {
                name,
                class: CompareClass::from_data_type(&data_type),
                data_type,
                precision,
                scale,
            });
        }
        Ok(cols)
    }

    async fn ensure_tx(&mut self) -> Result<&mut Transaction<'static, MySql>> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        match self.tx.as_mut() {
            Some(tx) => Ok(tx),
            None => Err(SyncError::Internal("transaction vanished".into())),
        }
    }

    fn spawn_reader(&self) -> mpsc::Receiver<Result<Row>> {
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let pool = self.pool.clone();
        let sql = self.select_sql.clone();
        let args = self.where_args.clone();
        let cols = self.cols.clone();
        let side = self.label();

        tokio::spawn(async move {
            let mut query = sqlx::query(&sql);
            for arg in &args {
                query = query.bind(arg);
            }
            let mut stream = query.fetch(&pool);
            while let Some(item) = stream.next().await {
                let msg = match item {
                    Ok(row) => Ok(decode_row(&row, &cols)),
                    Err(e) => Err(SyncError::fetch(&side, e.to_string())),
                };
                let stop = msg.is_err();
                if tx.send(msg).await.is_err() || stop {
                    break;
                }
            }
        });

        rx
    }
}

/// Per-class ORDER BY expression matching the row comparator: numeric nulls
/// last, string null-or-empty last with byte collation.
fn order_expr(col: &ColumnInfo) -> String {
    let q = MysqlClient::quote_ident(&col.name);
    match col.class {
        CompareClass::Numeric => format!("{q} IS NULL, {q}"),
        CompareClass::Str if MysqlClient::is_char_type(&col.data_type) => {
            format!("({q} IS NULL OR {q} = ''), CAST({q} AS BINARY)")
        }
        CompareClass::Str => format!("{q} IS NULL, {q}"),
    }
}

fn build_select(
    qualified: &str,
    cols: &[ColumnInfo],
    order_cols: &[ColumnInfo],
    where_clause: Option<&str>,
) -> String {
    let col_list = cols
        .iter()
        .map(|c| MysqlClient::quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("SELECT {} FROM {}", col_list, qualified);
    if let Some(w) = where_clause {
        if !w.is_empty() {
            sql.push_str(&format!(" WHERE ({})", w));
        }
    }

    let order = order_cols.iter().map(order_expr).collect::<Vec<_>>();
    sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    sql
}

fn build_insert(qualified: &str, cols: &[ColumnInfo], skipped: &[ColumnInfo]) -> String {
    let names = cols
        .iter()
        .chain(skipped.iter())
        .map(|c| MysqlClient::quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; cols.len() + skipped.len()].join(", ");
    format!("INSERT INTO {} ({}) VALUES ({})", qualified, names, placeholders)
}

/// WHERE clause for a full or partial row match. NULL values become
/// `IS NULL`; only non-null values get placeholders.
fn build_match_where(cols: &[&ColumnInfo], row: &[&SqlValue]) -> String {
    cols.iter()
        .zip(row.iter())
        .map(|(col, val)| {
            let q = MysqlClient::quote_ident(&col.name);
            if val.is_null() {
                format!("{} IS NULL", q)
            } else {
                format!("{} = ?", q)
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn bind_value<'q>(
    q: Query<'q, MySql, MySqlArguments>,
    v: &SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match v {
        SqlValue::Null => q.bind(None::<String>),
        SqlValue::Bool(x) => q.bind(*x),
        SqlValue::I64(x) => q.bind(*x),
        SqlValue::F64(x) => q.bind(*x),
        SqlValue::Decimal(x) => q.bind(*x),
        SqlValue::Text(s) => q.bind(s.clone()),
        SqlValue::Bytes(b) => q.bind(b.clone()),
        SqlValue::Date(d) => q.bind(*d),
        SqlValue::Time(t) => q.bind(*t),
        SqlValue::DateTime(dt) => q.bind(*dt),
    }
}

/// Decode a fetched row into engine-agnostic values, driven by the declared
/// data type. Unrecognized types fall back to their string form.
fn decode_row(row: &MySqlRow, cols: &[ColumnInfo]) -> Row {
    cols.iter()
        .enumerate()
        .map(|(i, col)| {
            let is_null: bool = row.try_get_raw(i).map(|r| r.is_null()).unwrap_or(true);
            if is_null {
                return SqlValue::Null;
            }

            match col.data_type.as_str() {
                "tinyint" => row
                    .try_get::<i8, _>(i)
                    .map(|v| SqlValue::I64(v as i64))
                    .unwrap_or(SqlValue::Null),
                "smallint" => row
                    .try_get::<i16, _>(i)
                    .map(|v| SqlValue::I64(v as i64))
                    .unwrap_or(SqlValue::Null),
                "mediumint" | "int" | "integer" => row
                    .try_get::<i32, _>(i)
                    .map(|v| SqlValue::I64(v as i64))
                    .unwrap_or(SqlValue::Null),
                "bigint" => row
                    .try_get::<i64, _>(i)
                    .map(SqlValue::I64)
                    .unwrap_or(SqlValue::Null),
                "year" => row
                    .try_get::<u16, _>(i)
                    .map(|v| SqlValue::I64(v as i64))
                    .unwrap_or(SqlValue::Null),
                "float" => row
                    .try_get::<f32, _>(i)
                    .map(|v| SqlValue::F64(v as f64))
                    .unwrap_or(SqlValue::Null),
                "double" | "real" => row
                    .try_get::<f64, _>(i)
                    .map(SqlValue::F64)
                    .unwrap_or(SqlValue::Null),
                "decimal" | "numeric" => row
                    .try_get::<rust_decimal::Decimal, _>(i)
                    .map(SqlValue::Decimal)
                    .unwrap_or(SqlValue::Null),
                "bit" | "boolean" | "bool" => row
                    .try_get::<bool, _>(i)
                    .map(SqlValue::Bool)
                    .unwrap_or(SqlValue::Null),
                "binary" | "varbinary" => row
                    .try_get::<Vec<u8>, _>(i)
                    .map(SqlValue::Bytes)
                    .unwrap_or(SqlValue::Null),
                "date" => row
                    .try_get::<chrono::NaiveDate, _>(i)
                    .map(SqlValue::Date)
                    .unwrap_or(SqlValue::Null),
                "time" => row
                    .try_get::<chrono::NaiveTime, _>(i)
                    .map(SqlValue::Time)
                    .unwrap_or(SqlValue::Null),
                "datetime" | "timestamp" => row
                    .try_get::<chrono::NaiveDateTime, _>(i)
                    .map(SqlValue::DateTime)
                    .unwrap_or(SqlValue::Null),
                _ => row
                    .try_get::<String, _>(i)
                    .map(SqlValue::Text)
                    .unwrap_or(SqlValue::Null),
            }
        })
        .collect()
}

#[async_trait]
impl RowSource for MysqlClient {
    async fn init(&mut self, opts: &SelectOptions) -> Result<()> {
        let all_cols = self.load_colinfo().await?;
        if all_cols.is_empty() {
            return Err(SyncError::Setup(format!(
                "{}: table not found or has no columns",
                self.label()
            )));
        }

        let excl: HashSet<&String> = opts.excl_cols.iter().collect();
        let mask: HashSet<&String> = opts.mask_cols.iter().collect();

        for col in all_cols {
            if excl.contains(&col.name) {
                continue;
            }
            if Self::is_lob(&col.data_type) || mask.contains(&col.name) {
                self.skip_names.insert(col.name.clone());
                self.skipped.push(col);
            } else {
                self.colnames.push(col.name.clone());
                self.classes.push(col.class);
                self.cols.push(col);
            }
        }

        for key in &opts.key_cols {
            if !self.colnames.contains(key) {
                return Err(SyncError::Setup(format!(
                    "{}: unique key column '{}' is not a compared column",
                    self.label(),
                    key
                )));
            }
        }
        self.key_cols = opts.key_cols.clone();
        self.commit_interval = opts.commit_interval.max(1);
        self.where_args = opts.where_args.clone();

        let order_cols: Vec<ColumnInfo> = if opts.ukey_sort && !self.key_cols.is_empty() {
            self.key_cols
                .iter()
                .filter_map(|k| self.cols.iter().find(|c| &c.name == k).cloned())
                .collect()
        } else {
            self.cols.clone()
        };

        self.select_sql = build_select(
            &self.qualified(),
            &self.cols,
            &order_cols,
            opts.where_clause.as_deref(),
        );
        self.insert_sql = build_insert(&self.qualified(), &self.cols, &self.skipped);

        debug!("{}: cursor query: {}", self.label(), self.select_sql);
        self.rx = Some(self.spawn_reader());
        Ok(())
    }

    fn colnames(&self) -> &[String] {
        &self.colnames
    }

    fn compare_classes(&self) -> &[CompareClass] {
        &self.classes
    }

    fn colinfo(&self) -> &[ColumnInfo] {
        &self.cols
    }

    fn dump_colinfo(&self) -> String {
        dump_colinfo(&self.cols)
    }

    fn skipcols(&self) -> &HashSet<String> {
        &self.skip_names
    }

    async fn fetch_row(&mut self) -> Result<Option<Row>> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await.transpose(),
            None => Err(SyncError::Setup(format!(
                "{}: fetch_row before init",
                self.label()
            ))),
        }
    }

    async fn insert_row(&mut self, row: &Row) -> Result<()> {
        let sql = self.insert_sql.clone();
        let skipped = self.skipped.len();
        let tx = self.ensure_tx().await?;

        let mut q = sqlx::query(&sql);
        for val in row {
            q = bind_value(q, val);
        }
        for _ in 0..skipped {
            q = q.bind(None::<String>);
        }
        q.execute(&mut **tx).await?;

        self.pending += 1;
        self.inserts += 1;
        Ok(())
    }

    async fn delete_row(&mut self, row: &Row) -> Result<u64> {
        let cols: Vec<&ColumnInfo> = self.cols.iter().collect();
        let vals: Vec<&SqlValue> = row.iter().collect();
        let sql = format!(
            "DELETE FROM {} WHERE {} LIMIT 1",
            self.qualified(),
            build_match_where(&cols, &vals)
        );

        let tx = self.ensure_tx().await?;
        let mut q = sqlx::query(&sql);
        for val in row.iter().filter(|v| !v.is_null()) {
            q = bind_value(q, val);
        }
        let result = q.execute(&mut **tx).await?;

        self.pending += 1;
        self.deletes += 1;
        Ok(result.rows_affected())
    }

    async fn delete_uniq(&mut self, row: &Row) -> Result<u64> {
        if self.key_cols.is_empty() {
            return Ok(0);
        }

        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for key in &self.key_cols {
            if let Some(idx) = self.colnames.iter().position(|n| n == key) {
                cols.push(&self.cols[idx]);
                vals.push(&row[idx]);
            }
        }

        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.qualified(),
            build_match_where(&cols, &vals)
        );

        let bound: Vec<SqlValue> = vals
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| (*v).clone())
            .collect();

        let tx = self.ensure_tx().await?;
        let mut q = sqlx::query(&sql);
        for val in &bound {
            q = bind_value(q, val);
        }
        let result = q.execute(&mut **tx).await?;

        let affected = result.rows_affected();
        if affected > 0 {
            self.pending += affected;
            self.deletes += affected;
        }
        Ok(affected)
    }

    async fn row_count(&mut self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", self.qualified());
        let row: MySqlRow = match self.tx.as_mut() {
            Some(tx) => sqlx::query(&sql).fetch_one(&mut **tx).await?,
            None => sqlx::query(&sql).fetch_one(&self.pool).await?,
        };
        Ok(row.get::<i64, _>("n"))
    }

    async fn check_pending(&mut self) -> Result<()> {
        if self.pending >= self.commit_interval {
            if let Some(tx) = self.tx.take() {
                tx.commit().await?;
                self.commits += 1;
                debug!("{}: committed {} pending mutations", self.label(), self.pending);
            }
            self.pending = 0;
        }
        Ok(())
    }

    async fn close_queries(&mut self) -> Result<()> {
        self.rx = None;
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            if self.pending > 0 {
                self.commits += 1;
            }
            self.pending = 0;
        }
        Ok(())
    }

    async fn roll_back(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
            self.pending = 0;
        }
        Ok(())
    }

    async fn open_dump(&self) -> Result<mpsc::Receiver<Result<Row>>> {
        if self.select_sql.is_empty() {
            return Err(SyncError::Setup(format!(
                "{}: open_dump before init",
                self.label()
            )));
        }
        Ok(self.spawn_reader())
    }

    fn inserts(&self) -> u64 {
        self.inserts
    }

    fn deletes(&self) -> u64 {
        self.deletes
    }

    fn commits(&self) -> u64 {
        self.commits
    }

    fn label(&self) -> String {
        format!("{} {}.{}", self.role.as_str(), self.schema, self.table)
    }
}
