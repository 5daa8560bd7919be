//! End-to-end merge behavior over an in-memory row source.
//!
//! The in-memory client implements the full `RowSource` contract over a
//! shared `Vec<Row>`, including the snapshot-cursor property the real
//! drivers have: the ordered scan opened at init keeps yielding rows that
//! mutations have since removed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use tablesync::compare::compare_rows;
use tablesync::core::schema::{ColumnInfo, CompareClass};
use tablesync::core::traits::{RowSource, SelectOptions};
use tablesync::core::value::{Row, SqlValue};
use tablesync::error::{Result, SyncError};
use tablesync::{Endpoint, Hooks, SyncOptions, Syncer};

type Store = Arc<Mutex<Vec<Row>>>;

struct MemoryClient {
    store: Store,
    cols: Vec<ColumnInfo>,
    colnames: Vec<String>,
    classes: Vec<CompareClass>,
    skip: HashSet<String>,
    key_idx: Vec<usize>,
    snapshot: Vec<Row>,
    cursor: usize,
    inserts: u64,
    deletes: u64,
    pending: u64,
    commit_interval: u64,
    commits: u64,
    fail_after_inserts: Option<u64>,
}

impl MemoryClient {
    fn new(store: Store, cols: Vec<ColumnInfo>) -> Self {
        Self {
            store,
            cols,
            colnames: Vec::new(),
            classes: Vec::new(),
            skip: HashSet::new(),
            key_idx: Vec::new(),
            snapshot: Vec::new(),
            cursor: 0,
            inserts: 0,
            deletes: 0,
            pending: 0,
            commit_interval: 1000,
            commits: 0,
            fail_after_inserts: None,
        }
    }

    /// Make insert_row fail once `n` inserts have succeeded.
    fn failing_after(mut self, n: u64) -> Self {
        self.fail_after_inserts = Some(n);
        self
    }

    fn sorted_rows(&self) -> Vec<Row> {
        let mut rows = match self.store.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        };
        rows.sort_by(|a, b| compare_rows(a, b, &self.classes));
        rows
    }
}

#[async_trait]
impl RowSource for MemoryClient {
    async fn init(&mut self, opts: &SelectOptions) -> Result<()> {
        self.colnames = self.cols.iter().map(|c| c.name.clone()).collect();
        self.classes = self.cols.iter().map(|c| c.class).collect();
        for key in &opts.key_cols {
            match self.colnames.iter().position(|n| n == key) {
                Some(idx) => self.key_idx.push(idx),
                None => {
                    return Err(SyncError::Setup(format!("unknown key column '{}'", key)));
                }
            }
        }
        self.snapshot = self.sorted_rows();
        self.cursor = 0;
        self.commit_interval = opts.commit_interval.max(1);
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
        tablesync::core::schema::dump_colinfo(&self.cols)
    }

    fn skipcols(&self) -> &HashSet<String> {
        &self.skip
    }

    async fn fetch_row(&mut self) -> Result<Option<Row>> {
        let row = self.snapshot.get(self.cursor).cloned();
        if row.is_some() {
            self.cursor += 1;
        }
        Ok(row)
    }

    async fn insert_row(&mut self, row: &Row) -> Result<()> {
        if self.fail_after_inserts == Some(self.inserts) {
            return Err(SyncError::mutation("memory", "simulated write failure"));
        }
        if let Ok(mut store) = self.store.lock() {
            store.push(row.clone());
        }
        self.inserts += 1;
        self.pending += 1;
        Ok(())
    }

    async fn delete_row(&mut self, row: &Row) -> Result<u64> {
        let mut affected = 0;
        if let Ok(mut store) = self.store.lock() {
            if let Some(pos) = store
                .iter()
                .position(|r| compare_rows(r, row, &self.classes) == std::cmp::Ordering::Equal)
            {
                store.remove(pos);
                affected = 1;
            }
        }
        self.deletes += affected;
        self.pending += affected;
        Ok(affected)
    }

    async fn delete_uniq(&mut self, row: &Row) -> Result<u64> {
        if self.key_idx.is_empty() {
            return Ok(0);
        }
        let key_classes: Vec<CompareClass> =
            self.key_idx.iter().map(|&i| self.classes[i]).collect();
        let key_of = |r: &Row| -> Row { self.key_idx.iter().map(|&i| r[i].clone()).collect() };
        let target = key_of(row);

        let mut affected = 0;
        if let Ok(mut store) = self.store.lock() {
            store.retain(|r| {
                let matches = compare_rows(&key_of(r), &target, &key_classes)
                    == std::cmp::Ordering::Equal;
                if matches {
                    affected += 1;
                }
                !matches
            });
        }
        self.deletes += affected;
        self.pending += affected;
        Ok(affected)
    }

    async fn row_count(&mut self) -> Result<i64> {
        Ok(self.store.lock().map(|s| s.len() as i64).unwrap_or(0))
    }

    async fn check_pending(&mut self) -> Result<()> {
        if self.pending >= self.commit_interval {
            self.commits += 1;
            self.pending = 0;
        }
        Ok(())
    }

    async fn close_queries(&mut self) -> Result<()> {
        if self.pending > 0 {
            self.commits += 1;
            self.pending = 0;
        }
        Ok(())
    }

    async fn roll_back(&mut self) -> Result<()> {
        Ok(())
    }

    async fn open_dump(&self) -> Result<mpsc::Receiver<Result<Row>>> {
        let rows = self.sorted_rows();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for row in rows {
                if tx.send(Ok(row)).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
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
        "memory".to_string()
    }
}

fn people_cols() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo {
            name: "id".to_string(),
            data_type: "int".to_string(),
            class: CompareClass::Numeric,
            precision: 0,
            scale: 0,
        },
        ColumnInfo {
            name: "name".to_string(),
            data_type: "varchar".to_string(),
            class: CompareClass::Str,
            precision: 64,
            scale: 0,
        },
    ]
}

fn person(id: i64, name: &str) -> Row {
    vec![SqlValue::I64(id), SqlValue::Text(name.to_string())]
}

fn store_of(rows: Vec<Row>) -> Store {
    Arc::new(Mutex::new(rows))
}

fn endpoint(store: &Store, cols: Vec<ColumnInfo>) -> Endpoint {
    Endpoint::Client(Box::new(MemoryClient::new(store.clone(), cols)))
}

fn sorted(store: &Store) -> Vec<Row> {
    let mut rows = store.lock().unwrap().clone();
    let classes = [CompareClass::Numeric, CompareClass::Str];
    rows.sort_by(|a, b| compare_rows(a, b, &classes));
    rows
}

#[tokio::test]
async fn test_convergence() {
    let src = store_of(vec![person(1, "ann"), person(2, "bob"), person(4, "dee")]);
    let dst = store_of(vec![person(2, "bob"), person(3, "cal")]);

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        SyncOptions::new("people", "people"),
    )
    .run()
    .await;

    assert_eq!(result.status, "ok", "error: {:?}", result.error);
    assert_eq!(result.inserts, 2);
    assert_eq!(result.deletes, 1);
    assert_eq!(result.matching_rows, 1);
    assert_eq!(result.seen_source_rows, 3);
    assert_eq!(result.final_dest_rows, 3);
    assert_eq!(sorted(&dst), sorted(&src));
    assert!(result.elapsed_seconds >= 0.0);
    assert!(result.elapsed_user_cpu >= 0.0);
    assert!(result.elapsed_system_cpu >= 0.0);
}

#[tokio::test]
async fn test_idempotence() {
    let src = store_of(vec![person(1, "ann"), person(2, "bob")]);
    let dst = store_of(vec![person(3, "cal")]);

    let first = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        SyncOptions::new("people", "people"),
    )
    .run()
    .await;
    assert_eq!(first.status, "ok", "error: {:?}", first.error);

    let second = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        SyncOptions::new("people", "people"),
    )
    .run()
    .await;

    assert_eq!(second.status, "ok", "error: {:?}", second.error);
    assert_eq!(second.inserts, 0);
    assert_eq!(second.deletes, 0);
    assert_eq!(second.matching_rows, 2);
}

#[tokio::test]
async fn test_insert_cap_halts_without_error() {
    let src = store_of((1..=10).map(|i| person(i, "x")).collect());
    let dst = store_of(Vec::new());

    let mut opts = SyncOptions::new("people", "people");
    opts.max_inserts = 5;

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        opts,
    )
    .run()
    .await;

    assert_eq!(result.status, "ok", "error: {:?}", result.error);
    assert_eq!(result.inserts, 5);
    assert!(result.max_inserts_hit);
    assert!(!result.max_deletes_hit);
    assert_eq!(dst.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn test_delete_cap_halts_without_error() {
    let src = store_of(Vec::new());
    let dst = store_of((1..=10).map(|i| person(i, "x")).collect());

    let mut opts = SyncOptions::new("people", "people");
    opts.max_deletes = 5;

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        opts,
    )
    .run()
    .await;

    assert_eq!(result.status, "ok", "error: {:?}", result.error);
    assert_eq!(result.deletes, 5);
    assert!(result.max_deletes_hit);
    assert!(!result.max_inserts_hit);
    assert_eq!(dst.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn test_force_still_halts_at_cap() {
    // force only silences the warning; the cap still stops the merge.
    let src = store_of((1..=10).map(|i| person(i, "x")).collect());
    let dst = store_of(Vec::new());

    let mut opts = SyncOptions::new("people", "people");
    opts.max_inserts = 3;
    opts.force = true;

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        opts,
    )
    .run()
    .await;

    assert_eq!(result.status, "ok", "error: {:?}", result.error);
    assert_eq!(result.inserts, 3);
    assert!(result.max_inserts_hit);
    assert_eq!(dst.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_empty_source_guard_leaves_dest_untouched() {
    let src = store_of(Vec::new());
    let dst = store_of(vec![person(1, "ann"), person(2, "bob")]);

    let mut opts = SyncOptions::new("people", "people");
    opts.check_empty_source = true;

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        opts,
    )
    .run()
    .await;

    assert_eq!(result.status, "failed");
    assert!(result.error.as_deref().unwrap_or("").contains("source is empty"));
    assert_eq!(result.deletes, 0);
    assert_eq!(dst.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_both_sides_is_ok() {
    let src = store_of(Vec::new());
    let dst = store_of(Vec::new());

    let mut opts = SyncOptions::new("people", "people");
    opts.check_empty_source = true;

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        opts,
    )
    .run()
    .await;

    assert_eq!(result.status, "ok", "error: {:?}", result.error);
    assert_eq!(result.inserts, 0);
    assert_eq!(result.deletes, 0);
}

#[tokio::test]
async fn test_unique_key_replace_leaves_one_row_per_key() {
    let src = store_of(vec![person(1, "new")]);
    let dst = store_of(vec![person(1, "old")]);

    let mut opts = SyncOptions::new("people", "people");
    opts.unique_keys = Some(vec![vec!["id".to_string()]]);

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        opts,
    )
    .run()
    .await;

    assert_eq!(result.status, "ok", "error: {:?}", result.error);
    assert_eq!(result.inserts, 1);
    let rows = dst.lock().unwrap().clone();
    assert_eq!(rows, vec![person(1, "new")]);
}

#[tokio::test]
async fn test_dry_run_counts_but_does_not_mutate() {
    let src = store_of(vec![person(1, "ann"), person(2, "bob")]);
    let dst = store_of(vec![person(3, "cal")]);

    let mut opts = SyncOptions::new("people", "people");
    opts.dry_run = true;

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        opts,
    )
    .run()
    .await;

    assert_eq!(result.status, "ok", "error: {:?}", result.error);
    assert_eq!(result.inserts, 2);
    assert_eq!(result.deletes, 1);
    assert_eq!(dst.lock().unwrap().clone(), vec![person(3, "cal")]);
}

#[tokio::test]
async fn test_schema_mismatch_fails_before_any_mutation() {
    let mut narrow = people_cols();
    narrow[1].precision = 32;

    let src = store_of(vec![person(1, "ann")]);
    let dst = store_of(Vec::new());

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, narrow),
        SyncOptions::new("people", "people"),
    )
    .run()
    .await;

    assert_eq!(result.status, "failed");
    assert!(result.error.as_deref().unwrap_or("").contains("name"));
    assert_eq!(result.inserts, 0);
    assert!(dst.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_hook_abort() {
    let src = store_of(vec![person(1, "ann")]);
    let dst = store_of(Vec::new());

    let hooks = Hooks::new().pre_setup(|_| Err("maintenance window".to_string()));
    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        SyncOptions::new("people", "people"),
    )
    .with_hooks(hooks)
    .run()
    .await;

    assert_eq!(result.status, "failed");
    let msg = result.error.unwrap_or_default();
    assert!(msg.contains("pre_setup"), "got: {msg}");
    assert!(msg.contains("maintenance window"), "got: {msg}");
    assert!(dst.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_post_sync_hook_abort_after_commit() {
    let src = store_of(vec![person(1, "ann"), person(2, "bob")]);
    let dst = store_of(Vec::new());

    let hooks = Hooks::new().post_sync(|_| Err("verification failed".to_string()));
    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        SyncOptions::new("people", "people"),
    )
    .with_hooks(hooks)
    .run()
    .await;

    assert_eq!(result.status, "failed");
    let msg = result.error.unwrap_or_default();
    assert!(msg.contains("post_sync"), "got: {msg}");
    assert!(msg.contains("verification failed"), "got: {msg}");
    // The merge itself finished and was committed before the hook ran.
    assert_eq!(result.inserts, 2);
    assert_eq!(sorted(&dst), sorted(&src));
}

#[tokio::test]
async fn test_failure_reports_landed_commits() {
    let src = store_of((1..=5).map(|i| person(i, "x")).collect());
    let dst = store_of(Vec::new());

    let mut opts = SyncOptions::new("people", "people");
    opts.commit_interval = 1;

    let dest_client = MemoryClient::new(dst.clone(), people_cols()).failing_after(2);
    let result = Syncer::new(
        endpoint(&src, people_cols()),
        Endpoint::Client(Box::new(dest_client)),
        opts,
    )
    .run()
    .await;

    assert_eq!(result.status, "failed");
    assert!(result
        .error
        .as_deref()
        .unwrap_or("")
        .contains("simulated write failure"));
    // Two inserts landed and each was committed before the third failed;
    // the result must say so rather than reporting zero.
    assert_eq!(result.commits, 2);
    assert_eq!(dst.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_null_and_empty_ordering_end_to_end() {
    // A null numeric and an empty string both sort last on their class;
    // convergence must still hold with them present.
    let src = store_of(vec![
        vec![SqlValue::Null, SqlValue::Text("tail".to_string())],
        vec![SqlValue::I64(1), SqlValue::Text(String::new())],
        person(1, "ann"),
    ]);
    let dst = store_of(vec![
        vec![SqlValue::I64(1), SqlValue::Null],
        person(2, "bob"),
    ]);

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        SyncOptions::new("people", "people"),
    )
    .run()
    .await;

    assert_eq!(result.status, "ok", "error: {:?}", result.error);
    // (1, "") on the source and (1, NULL) on the destination are the same
    // row under string-class comparison.
    assert_eq!(result.matching_rows, 1);
    assert_eq!(result.inserts, 2);
    assert_eq!(result.deletes, 1);
}

#[tokio::test]
async fn test_dumpfile_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("run");

    let src = store_of(vec![person(1, "ann")]);
    let dst = store_of(Vec::new());

    let mut opts = SyncOptions::new("people", "people");
    opts.dumpfile = Some(prefix.clone());

    let result = Syncer::new(
        endpoint(&src, people_cols()),
        endpoint(&dst, people_cols()),
        opts,
    )
    .run()
    .await;
    assert_eq!(result.status, "ok", "error: {:?}", result.error);

    for name in ["source.pre", "dest.pre", "source.post", "dest.post"] {
        let path = dir.path().join(format!("run.{name}.csv"));
        assert!(path.exists(), "missing {}", path.display());
    }

    let post = std::fs::read_to_string(dir.path().join("run.dest.post.csv")).unwrap();
    let mut lines = post.lines();
    assert_eq!(lines.next(), Some("id,name"));
    assert_eq!(lines.next(), Some("1,ann"));
}
