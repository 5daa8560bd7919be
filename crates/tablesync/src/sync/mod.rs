//! The sync driver.
//!
//! [`Syncer`] walks both tables as ordered row streams and applies the
//! minimal inserts and deletes that make the destination match the source.
//! Memory stays flat at one buffered row per side regardless of table size.
//!
//! A run moves through Setup, SchemaCheck, Merging and Finalizing, and
//! always produces a [`SyncResult`]; failures are reported in the result
//! rather than panicking the caller. Work already committed by intermediate
//! commits stays committed on failure; only the open batch is rolled back.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compare::{classify, MergeState};
use crate::config::SyncOptions;
use crate::core::schema::UniqueKey;
use crate::core::traits::{RowSource, SelectOptions};
use crate::core::value::Row;
use crate::drivers::{ClientImpl, DbHandle, Role, UkeyCache};
use crate::dump;
use crate::error::{Result, SyncError};
use crate::compare;

/// One side of a sync: a live database connection, or a pre-built client
/// (tests inject in-memory clients this way).
pub enum Endpoint {
    Handle(DbHandle),
    Client(Box<dyn RowSource>),
}

type HookFn = Box<dyn Fn(&SyncOptions) -> std::result::Result<(), String> + Send + Sync>;

/// Optional caller checkpoints. A hook returning `Err(message)` aborts the
/// run with that message at its stage.
#[derive(Default)]
pub struct Hooks {
    pre_setup: Option<HookFn>,
    pre_select: Option<HookFn>,
    post_sync: Option<HookFn>,
    post_commit: Option<HookFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs before any connection or catalog work.
    pub fn pre_setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncOptions) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.pre_setup = Some(Box::new(f));
        self
    }

    /// Runs after key resolution, before the cursors open.
    pub fn pre_select<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncOptions) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.pre_select = Some(Box::new(f));
        self
    }

    /// Runs after the merge completes, before the row-count check.
    pub fn post_sync<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncOptions) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.post_sync = Some(Box::new(f));
        self
    }

    /// Runs last, after everything is committed.
    pub fn post_commit<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncOptions) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.post_commit = Some(Box::new(f));
        self
    }
}

fn run_hook(stage: &str, hook: &Option<HookFn>, opts: &SyncOptions) -> Result<()> {
    if let Some(f) = hook {
        f(opts).map_err(|message| SyncError::hook(stage, message))?;
    }
    Ok(())
}

/// Outcome of one run. Serializes to JSON/YAML for callers that persist
/// sync reports.
#[derive(Debug, Serialize)]
pub struct SyncResult {
    /// `"ok"` or `"failed"`.
    pub status: String,
    /// Failure description when status is `"failed"`.
    pub error: Option<String>,

    /// Rows inserted into the destination (counted even under `dry_run`).
    pub inserts: u64,
    /// Rows deleted from the destination (counted even under `dry_run`).
    pub deletes: u64,
    /// Intermediate commits issued on the destination.
    pub commits: u64,

    pub seen_source_rows: u64,
    pub seen_dest_rows: u64,
    pub matching_rows: u64,
    /// Destination row count after the run; -1 when not measured.
    pub final_dest_rows: i64,

    pub max_inserts_hit: bool,
    pub max_deletes_hit: bool,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    /// Cumulative wall time spent waiting on source fetches.
    pub elapsed_fetch_source: f64,
    /// Cumulative wall time spent waiting on destination fetches.
    pub elapsed_fetch_dest: f64,
    /// User CPU seconds consumed by this process during the run. Zero on
    /// platforms without rusage.
    pub elapsed_user_cpu: f64,
    /// System CPU seconds consumed by this process during the run. Zero on
    /// platforms without rusage.
    pub elapsed_system_cpu: f64,
}

impl SyncResult {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            status: "failed".to_string(),
            error: None,
            inserts: 0,
            deletes: 0,
            commits: 0,
            seen_source_rows: 0,
            seen_dest_rows: 0,
            matching_rows: 0,
            final_dest_rows: -1,
            max_inserts_hit: false,
            max_deletes_hit: false,
            started_at,
            completed_at: started_at,
            elapsed_seconds: 0.0,
            elapsed_fetch_source: 0.0,
            elapsed_fetch_dest: 0.0,
            elapsed_user_cpu: 0.0,
            elapsed_system_cpu: 0.0,
        }
    }

    /// True when the merge stopped on a configured cap.
    pub fn cap_hit(&self) -> bool {
        self.max_inserts_hit || self.max_deletes_hit
    }
}

/// Drives one source-to-destination table sync.
pub struct Syncer {
    source: Endpoint,
    dest: Endpoint,
    opts: SyncOptions,
    hooks: Hooks,
    ukeys: UkeyCache,
}

impl Syncer {
    pub fn new(source: Endpoint, dest: Endpoint, opts: SyncOptions) -> Self {
        Self {
            source,
            dest,
            opts,
            hooks: Hooks::default(),
            ukeys: UkeyCache::new(),
        }
    }

    /// Convenience constructor for two live connections.
    pub fn between(source: DbHandle, dest: DbHandle, opts: SyncOptions) -> Self {
        Self::new(Endpoint::Handle(source), Endpoint::Handle(dest), opts)
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Run the sync to completion. Never returns `Err`: failures are folded
    /// into the result so callers always get counters and timings.
    pub async fn run(mut self) -> SyncResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let (user_cpu_start, system_cpu_start) = cpu_times();
        let mut result = SyncResult::new(started_at);

        match self.execute(&mut result).await {
            Ok(()) => {
                result.status = "ok".to_string();
            }
            Err(e) => {
                result.status = "failed".to_string();
                result.error = Some(e.to_string());
            }
        }

        result.completed_at = Utc::now();
        result.elapsed_seconds = clock.elapsed().as_secs_f64();
        let (user_cpu, system_cpu) = cpu_times();
        result.elapsed_user_cpu = (user_cpu - user_cpu_start).max(0.0);
        result.elapsed_system_cpu = (system_cpu - system_cpu_start).max(0.0);
        info!(
            "sync {}: {} inserts, {} deletes, {} matching, {:.3}s",
            result.status, result.inserts, result.deletes, result.matching_rows,
            result.elapsed_seconds
        );
        result
    }

    async fn execute(&mut self, result: &mut SyncResult) -> Result<()> {
        // Setup.
        self.opts.validate()?;
        run_hook("pre_setup", &self.hooks.pre_setup, &self.opts)?;

        let key_cols = self.resolve_key_cols().await?;
        let has_key = !self.opts.no_dups && !key_cols.is_empty();
        if self.opts.ukey_sort && key_cols.is_empty() {
            return Err(SyncError::Setup(
                "ukey_sort requires a unique key (configured or discoverable)".to_string(),
            ));
        }

        let opts = self.opts.clone();
        let source_endpoint = std::mem::replace(
            &mut self.source,
            Endpoint::Client(Box::new(ClosedEndpoint)),
        );
        let dest_endpoint =
            std::mem::replace(&mut self.dest, Endpoint::Client(Box::new(ClosedEndpoint)));
        let mut source = into_client(source_endpoint, &opts.source_table, Role::Source);
        let mut dest = into_client(dest_endpoint, &opts.dest_table, Role::Dest);

        run_hook("pre_select", &self.hooks.pre_select, &opts)?;

        source
            .init(&SelectOptions {
                excl_cols: opts.excl_cols.clone(),
                mask_cols: opts.mask_cols.clone(),
                key_cols: key_cols.clone(),
                ukey_sort: opts.ukey_sort,
                where_clause: opts.source_where.clone(),
                where_args: opts.source_args.clone(),
                commit_interval: opts.commit_interval,
            })
            .await?;
        dest.init(&SelectOptions {
            excl_cols: opts.excl_cols.clone(),
            mask_cols: opts.mask_cols.clone(),
            key_cols,
            ukey_sort: opts.ukey_sort,
            where_clause: opts.dest_where.clone(),
            where_args: Vec::new(),
            commit_interval: opts.commit_interval,
        })
        .await?;

        if let Some(prefix) = &opts.dumpfile {
            dump::snapshot(source.as_ref(), &dump_path(prefix, "source", "pre")).await?;
            dump::snapshot(dest.as_ref(), &dump_path(prefix, "dest", "pre")).await?;
        }

        // SchemaCheck. The destination's classes drive comparison: it is the
        // side being mutated, so its view of the data is authoritative.
        compare::schema::compare(
            source.colinfo(),
            dest.colinfo(),
            dest.skipcols(),
            opts.compare_schemas,
        )?;

        // Merging.
        let merge_outcome = self
            .merge(source.as_mut(), dest.as_mut(), has_key, result)
            .await;
        if let Err(e) = merge_outcome {
            let _ = dest.roll_back().await;
            let _ = source.roll_back().await;
            // Batches committed before the failure stay committed; report
            // them so the caller knows the destination moved.
            result.commits = dest.commits();
            return Err(e);
        }

        // Finalizing.
        source.close_queries().await?;
        dest.close_queries().await?;
        result.commits = dest.commits();

        if let Some(prefix) = &opts.dumpfile {
            dump::snapshot(source.as_ref(), &dump_path(prefix, "source", "post")).await?;
            dump::snapshot(dest.as_ref(), &dump_path(prefix, "dest", "post")).await?;
        }

        run_hook("post_sync", &self.hooks.post_sync, &opts)?;

        // Full-table counts cannot match when a predicate narrows a side.
        let countable =
            !opts.dry_run && opts.source_where.is_none() && opts.dest_where.is_none();
        if countable {
            result.final_dest_rows = dest.row_count().await?;
            if !opts.skip_row_count_check && !result.cap_hit() {
                let expected = result.seen_source_rows as i64;
                if result.final_dest_rows != expected {
                    return Err(SyncError::Validation(format!(
                        "row count mismatch after sync: destination has {} rows, expected {}",
                        result.final_dest_rows, expected
                    )));
                }
            }
        }

        run_hook("post_commit", &self.hooks.post_commit, &opts)?;
        Ok(())
    }

    /// Resolve the unique-key column list: caller hint first, else catalog
    /// introspection on the destination.
    async fn resolve_key_cols(&mut self) -> Result<Vec<String>> {
        let blocked: HashSet<&String> = self
            .opts
            .excl_cols
            .iter()
            .chain(self.opts.mask_cols.iter())
            .collect();

        if let Some(hints) = &self.opts.unique_keys {
            if let Some(cols) = hints.iter().find(|k| !k.is_empty()) {
                return Ok(cols.clone());
            }
        }

        if let Endpoint::Handle(handle) = &self.dest {
            let keys = self.ukeys.unique_keys(handle, &self.opts.dest_table).await?;
            if let Some(cols) = choose_key(&keys, &blocked) {
                debug!("using discovered unique key: {:?}", cols);
                return Ok(cols);
            }
        }
        Ok(Vec::new())
    }

    async fn merge(
        &self,
        source: &mut dyn RowSource,
        dest: &mut dyn RowSource,
        has_key: bool,
        result: &mut SyncResult,
    ) -> Result<()> {
        let classes = dest.compare_classes().to_vec();
        let opts = &self.opts;

        let mut s_row = fetch_timed(
            source,
            &mut result.elapsed_fetch_source,
            &mut result.seen_source_rows,
        )
        .await?;
        let mut d_row = fetch_timed(
            dest,
            &mut result.elapsed_fetch_dest,
            &mut result.seen_dest_rows,
        )
        .await?;

        let mut processed: u64 = 0;
        while let Some(state) = classify(s_row.as_ref(), d_row.as_ref(), &classes) {
            dest.check_pending().await?;

            match state {
                MergeState::Both(std::cmp::Ordering::Equal) => {
                    result.matching_rows += 1;
                    s_row = fetch_timed(
                        source,
                        &mut result.elapsed_fetch_source,
                        &mut result.seen_source_rows,
                    )
                    .await?;
                    d_row = fetch_timed(
                        dest,
                        &mut result.elapsed_fetch_dest,
                        &mut result.seen_dest_rows,
                    )
                    .await?;
                }
                MergeState::DestOnly | MergeState::Both(std::cmp::Ordering::Greater) => {
                    if opts.check_empty_source && result.seen_source_rows == 0 {
                        return Err(SyncError::Validation(
                            "source is empty and check_empty_source is set; refusing to delete"
                                .to_string(),
                        ));
                    }
                    if opts.max_deletes > 0 && result.deletes >= opts.max_deletes {
                        result.max_deletes_hit = true;
                        if !opts.force {
                            warn!("max_deletes cap ({}) reached, halting", opts.max_deletes);
                        }
                        break;
                    }
                    if let Some(row) = &d_row {
                        if !opts.dry_run {
                            dest.delete_row(row).await.map_err(|e| {
                                SyncError::mutation(&opts.dest_table, e.to_string())
                            })?;
                        }
                        result.deletes += 1;
                    }
                    d_row = fetch_timed(
                        dest,
                        &mut result.elapsed_fetch_dest,
                        &mut result.seen_dest_rows,
                    )
                    .await?;
                }
                MergeState::SourceOnly | MergeState::Both(std::cmp::Ordering::Less) => {
                    if opts.max_inserts > 0 && result.inserts >= opts.max_inserts {
                        result.max_inserts_hit = true;
                        if !opts.force {
                            warn!("max_inserts cap ({}) reached, halting", opts.max_inserts);
                        }
                        break;
                    }
                    if let Some(row) = &s_row {
                        if !opts.dry_run {
                            if has_key {
                                // Clear any key-colliding row ahead of the
                                // cursor; the snapshot cursor still yields it
                                // and delete_row tolerates zero matches.
                                dest.delete_uniq(row).await.map_err(|e| {
                                    SyncError::mutation(&opts.dest_table, e.to_string())
                                })?;
                            }
                            dest.insert_row(row).await.map_err(|e| {
                                SyncError::mutation(&opts.dest_table, e.to_string())
                            })?;
                        }
                        result.inserts += 1;
                    }
                    s_row = fetch_timed(
                        source,
                        &mut result.elapsed_fetch_source,
                        &mut result.seen_source_rows,
                    )
                    .await?;
                }
            }

            processed += 1;
            if opts.row_count_interval > 0 && processed % opts.row_count_interval == 0 {
                info!(
                    "{} rows processed ({} inserts, {} deletes, {} matching)",
                    processed, result.inserts, result.deletes, result.matching_rows
                );
            }
        }

        Ok(())
    }

}

/// Sentinel standing in for an endpoint that was already consumed.
struct ClosedEndpoint;

#[async_trait::async_trait]
impl RowSource for ClosedEndpoint {
    async fn init(&mut self, _opts: &SelectOptions) -> Result<()> {
        Err(SyncError::Internal("endpoint already consumed".into()))
    }
    fn colnames(&self) -> &[String] {
        &[]
    }
    fn compare_classes(&self) -> &[crate::core::schema::CompareClass] {
        &[]
    }
    fn colinfo(&self) -> &[crate::core::schema::ColumnInfo] {
        &[]
    }
    fn dump_colinfo(&self) -> String {
        String::new()
    }
    fn skipcols(&self) -> &HashSet<String> {
        static EMPTY: std::sync::OnceLock<HashSet<String>> = std::sync::OnceLock::new();
        EMPTY.get_or_init(HashSet::new)
    }
    async fn fetch_row(&mut self) -> Result<Option<Row>> {
        Err(SyncError::Internal("endpoint already consumed".into()))
    }
    async fn insert_row(&mut self, _row: &Row) -> Result<()> {
        Err(SyncError::Internal("endpoint already consumed".into()))
    }
    async fn delete_row(&mut self, _row: &Row) -> Result<u64> {
        Err(SyncError::Internal("endpoint already consumed".into()))
    }
    async fn delete_uniq(&mut self, _row: &Row) -> Result<u64> {
        Err(SyncError::Internal("endpoint already consumed".into()))
    }
    async fn row_count(&mut self) -> Result<i64> {
        Err(SyncError::Internal("endpoint already consumed".into()))
    }
    async fn check_pending(&mut self) -> Result<()> {
        Ok(())
    }
    async fn close_queries(&mut self) -> Result<()> {
        Ok(())
    }
    async fn roll_back(&mut self) -> Result<()> {
        Ok(())
    }
    async fn open_dump(&self) -> Result<tokio::sync::mpsc::Receiver<Result<Row>>> {
        Err(SyncError::Internal("endpoint already consumed".into()))
    }
    fn inserts(&self) -> u64 {
        0
    }
    fn deletes(&self) -> u64 {
        0
    }
    fn commits(&self) -> u64 {
        0
    }
    fn label(&self) -> String {
        "closed".to_string()
    }
}

fn into_client(endpoint: Endpoint, table: &str, role: Role) -> Box<dyn RowSource> {
    match endpoint {
        Endpoint::Handle(handle) => Box::new(ClientImpl::new(handle, table, role)),
        Endpoint::Client(client) => client,
    }
}

/// Process-wide (user, system) CPU seconds consumed so far.
#[cfg(unix)]
fn cpu_times() -> (f64, f64) {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return (0.0, 0.0);
    }
    let usage = unsafe { usage.assume_init() };
    let seconds = |t: libc::timeval| t.tv_sec as f64 + t.tv_usec as f64 / 1_000_000.0;
    (seconds(usage.ru_utime), seconds(usage.ru_stime))
}

#[cfg(not(unix))]
fn cpu_times() -> (f64, f64) {
    (0.0, 0.0)
}

async fn fetch_timed(
    client: &mut dyn RowSource,
    elapsed: &mut f64,
    seen: &mut u64,
) -> Result<Option<Row>> {
    let t = Instant::now();
    let row = client.fetch_row().await?;
    *elapsed += t.elapsed().as_secs_f64();
    if row.is_some() {
        *seen += 1;
    }
    Ok(row)
}

/// First discovered key none of whose columns are excluded or masked.
fn choose_key(keys: &[UniqueKey], blocked: &HashSet<&String>) -> Option<Vec<String>> {
    keys.iter()
        .find(|k| k.columns.iter().all(|c| !blocked.contains(c)))
        .map(|k| k.columns.clone())
}

fn dump_path(prefix: &Path, side: &str, phase: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}.{}.csv", prefix.display(), side, phase))
}
