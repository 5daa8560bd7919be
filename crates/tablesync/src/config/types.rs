//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One side's database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Database engine: "mysql" or "postgres".
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port. Defaults to the engine's standard port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Default schema for unqualified table names. MySQL clients fall back
    /// to the database name; PostgreSQL to "public".
    #[serde(default)]
    pub schema: Option<String>,
}

impl DbConfig {
    /// Effective port for this engine.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(match self.r#type.as_str() {
            "postgres" | "postgresql" | "pg" => 5432,
            _ => 3306,
        })
    }

    /// Effective default schema for this engine.
    pub fn effective_schema(&self) -> String {
        match &self.schema {
            Some(s) if !s.is_empty() => s.clone(),
            _ => match self.r#type.as_str() {
                "postgres" | "postgresql" | "pg" => "public".to_string(),
                _ => self.database.clone(),
            },
        }
    }

    /// Stable identity string used as part of the unique-key cache key.
    pub fn identity(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            self.r#type,
            self.host,
            self.effective_port(),
            self.database
        )
    }
}

/// Options for one sync run.
///
/// `max_inserts`/`max_deletes` of zero mean unlimited, matching the
/// "0 or unset" convention of the callers this grew out of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Source table, optionally schema-qualified ("schema.table").
    pub source_table: String,

    /// Destination table, optionally schema-qualified.
    pub dest_table: String,

    /// Columns removed from the sync entirely.
    #[serde(default)]
    pub excl_cols: Vec<String>,

    /// Columns excluded from comparison and written as NULL on insert.
    #[serde(default)]
    pub mask_cols: Vec<String>,

    /// Unique-key column sets, overriding catalog introspection.
    #[serde(default)]
    pub unique_keys: Option<Vec<Vec<String>>>,

    /// Raw predicate appended to the source SELECT.
    #[serde(default)]
    pub source_where: Option<String>,

    /// Bind parameters for `source_where`.
    #[serde(default)]
    pub source_args: Vec<String>,

    /// Raw predicate appended to the destination SELECT.
    #[serde(default)]
    pub dest_where: Option<String>,

    /// Order both cursors by the unique-key columns only.
    #[serde(default)]
    pub ukey_sort: bool,

    /// Halt after this many inserts (0 = unlimited).
    #[serde(default)]
    pub max_inserts: u64,

    /// Halt after this many deletes (0 = unlimited).
    #[serde(default)]
    pub max_deletes: u64,

    /// Count planned mutations without touching the destination.
    #[serde(default)]
    pub dry_run: bool,

    /// Suppress the cap-hit warning.
    #[serde(default)]
    pub force: bool,

    /// Run the full descriptor comparison (class/precision/scale).
    #[serde(default = "default_true")]
    pub compare_schemas: bool,

    /// Skip the defensive delete-by-unique-key before each insert. Only safe
    /// when the caller guarantees no duplicate-key collisions can occur.
    #[serde(default)]
    pub no_dups: bool,

    /// Fail instead of emptying the destination when the source yields no rows.
    #[serde(default)]
    pub check_empty_source: bool,

    /// Skip the final destination row-count consistency check.
    #[serde(default)]
    pub skip_row_count_check: bool,

    /// Progress log interval in rows.
    #[serde(default = "default_row_count_interval")]
    pub row_count_interval: u64,

    /// Destination mutations per intermediate commit.
    #[serde(default = "default_commit_interval")]
    pub commit_interval: u64,

    /// Path prefix for before/after CSV snapshots of both tables.
    #[serde(default)]
    pub dumpfile: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_row_count_interval() -> u64 {
    1000
}

fn default_commit_interval() -> u64 {
    1000
}

impl SyncOptions {
    /// Minimal options for a table pair, everything else at defaults.
    pub fn new(source_table: impl Into<String>, dest_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            dest_table: dest_table.into(),
            excl_cols: Vec::new(),
            mask_cols: Vec::new(),
            unique_keys: None,
            source_where: None,
            source_args: Vec::new(),
            dest_where: None,
            ukey_sort: false,
            max_inserts: 0,
            max_deletes: 0,
            dry_run: false,
            force: false,
            compare_schemas: true,
            no_dups: false,
            check_empty_source: false,
            skip_row_count_check: false,
            row_count_interval: default_row_count_interval(),
            commit_interval: default_commit_interval(),
            dumpfile: None,
        }
    }
}

/// Split an optionally schema-qualified table name.
pub fn split_table(name: &str, default_schema: &str) -> (String, String) {
    match name.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => (default_schema.to_string(), name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SyncOptions::new("src", "dst");
        assert!(opts.compare_schemas);
        assert!(!opts.dry_run);
        assert_eq!(opts.max_inserts, 0);
        assert_eq!(opts.row_count_interval, 1000);
        assert_eq!(opts.commit_interval, 1000);
    }

    #[test]
    fn test_yaml_defaults() {
        let opts: SyncOptions = serde_yaml::from_str(
            "source_table: people\ndest_table: people_copy\nmax_inserts: 50\n",
        )
        .unwrap();
        assert_eq!(opts.source_table, "people");
        assert_eq!(opts.max_inserts, 50);
        assert_eq!(opts.max_deletes, 0);
        assert!(opts.compare_schemas);
    }

    #[test]
    fn test_split_table() {
        assert_eq!(
            split_table("inventory.items", "public"),
            ("inventory".to_string(), "items".to_string())
        );
        assert_eq!(
            split_table("items", "public"),
            ("public".to_string(), "items".to_string())
        );
    }

    #[test]
    fn test_db_config_effective_values() {
        let cfg = DbConfig {
            r#type: "postgres".to_string(),
            host: "db1".to_string(),
            port: None,
            database: "app".to_string(),
            user: "sync".to_string(),
            password: "secret".to_string(),
            schema: None,
        };
        assert_eq!(cfg.effective_port(), 5432);
        assert_eq!(cfg.effective_schema(), "public");
        assert_eq!(cfg.identity(), "postgres://db1:5432/app");

        let cfg = DbConfig {
            r#type: "mysql".to_string(),
            port: None,
            schema: None,
            ..cfg
        };
        assert_eq!(cfg.effective_port(), 3306);
        assert_eq!(cfg.effective_schema(), "app");
    }
}
