//! Diagnostic CSV snapshots.
//!
//! With a `dumpfile` prefix configured, each side of the sync is written to
//! `{prefix}.{source|dest}.{pre|post}.csv` so a failed convergence can be
//! diffed offline. Values use the same string rendering the comparator uses,
//! with NULL as the empty field.

use std::path::Path;

use tracing::debug;

use crate::core::traits::RowSource;
use crate::error::Result;

/// Write one full ordered scan of `client` to `path`, header row first.
pub async fn snapshot(client: &dyn RowSource, path: &Path) -> Result<()> {
    let mut rx = client.open_dump().await?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(client.colnames())?;

    let mut rows: u64 = 0;
    while let Some(row) = rx.recv().await {
        let row = row?;
        writer.write_record(row.iter().map(|v| v.render()))?;
        rows += 1;
    }
    writer.flush()?;

    debug!("{}: dumped {} rows to {}", client.label(), rows, path.display());
    Ok(())
}
