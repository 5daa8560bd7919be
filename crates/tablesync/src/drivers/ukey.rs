//! Unique-key discovery from engine catalogs.
//!
//! When no key columns are configured, the destination's unique indexes
//! drive keyed deletion. Results are cached per connection identity so
//! repeated syncs against the same table introspect once.

use std::collections::{HashMap, HashSet};

use sqlx::Row as SqlxRow;
use tracing::debug;

use crate::config::split_table;
use crate::core::schema::UniqueKey;
use crate::error::Result;

use super::DbHandle;

/// Per-process cache of discovered unique keys.
#[derive(Default)]
pub struct UkeyCache {
    keys: HashMap<String, Vec<UniqueKey>>,
}

impl UkeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique keys of `table`, ordered as the catalog reports them and
    /// deduplicated by column list.
    pub async fn unique_keys(&mut self, handle: &DbHandle, table: &str) -> Result<Vec<UniqueKey>> {
        let (schema, table) = split_table(table, handle.schema());
        let cache_key = format!("{}/{}.{}", handle.identity(), schema, table);

        if let Some(keys) = self.keys.get(&cache_key) {
            return Ok(keys.clone());
        }

        let rows = match handle {
            DbHandle::Mysql { pool, .. } => {
                let query = r#"
                    SELECT
                        CAST(INDEX_NAME AS CHAR(255)) AS index_name,
                        CAST(COLUMN_NAME AS CHAR(255)) AS column_name
                    FROM INFORMATION_SCHEMA.STATISTICS
                    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND NON_UNIQUE = 0
                    ORDER BY INDEX_NAME, SEQ_IN_INDEX
                "#;
                sqlx::query(query)
                    .bind(&schema)
                    .bind(&table)
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(|r| (r.get("index_name"), r.get("column_name")))
                    .collect::<Vec<(String, String)>>()
            }
            DbHandle::Postgres { pool, .. } => {
                let query = r#"
                    SELECT
                        i.relname::text AS index_name,
                        a.attname::text AS column_name
                    FROM pg_class t
                    JOIN pg_namespace n ON n.oid = t.relnamespace
                    JOIN pg_index ix ON ix.indrelid = t.oid
                    JOIN pg_class i ON i.oid = ix.indexrelid
                    JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON TRUE
                    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
                    WHERE n.nspname = $1 AND t.relname = $2 AND ix.indisunique
                    ORDER BY i.relname, k.ord
                "#;
                sqlx::query(query)
                    .bind(&schema)
                    .bind(&table)
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(|r| (r.get("index_name"), r.get("column_name")))
                    .collect::<Vec<(String, String)>>()
            }
        };

        let keys = group_key_rows(rows);
        debug!(
            "{}.{}: discovered {} unique key(s)",
            schema,
            table,
            keys.len()
        );
        self.keys.insert(cache_key, keys.clone());
        Ok(keys)
    }
}

/// Group (index, column) rows into keys, preserving catalog order and
/// dropping indexes whose column list duplicates an earlier one.
fn group_key_rows(rows: Vec<(String, String)>) -> Vec<UniqueKey> {
    let mut keys: Vec<UniqueKey> = Vec::new();
    for (index, column) in rows {
        match keys.last_mut() {
            Some(key) if key.name == index => key.columns.push(column),
            _ => keys.push(UniqueKey {
                name: index,
                columns: vec![column],
            }),
        }
    }

    let mut seen: HashSet<Vec<String>> = HashSet::new();
    keys.retain(|k| seen.insert(k.columns.clone()));
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(index: &str, column: &str) -> (String, String) {
        (index.to_string(), column.to_string())
    }

    #[test]
    fn test_group_key_rows() {
        let keys = group_key_rows(vec![
            row("pk", "id"),
            row("uq_name", "last"),
            row("uq_name", "first"),
        ]);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name, "pk");
        assert_eq!(keys[0].columns, vec!["id"]);
        assert_eq!(keys[1].columns, vec!["last", "first"]);
    }

    #[test]
    fn test_group_key_rows_dedupes_column_lists() {
        let keys = group_key_rows(vec![
            row("pk", "id"),
            row("uq_id", "id"),
            row("uq_other", "name"),
        ]);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name, "pk");
        assert_eq!(keys[1].name, "uq_other");
    }

    #[test]
    fn test_group_key_rows_empty() {
        assert!(group_key_rows(Vec::new()).is_empty());
    }
}
