//! Option validation, checked before any connection is opened.

use super::SyncOptions;
use crate::error::{Result, SyncError};

/// Validate sync options.
pub fn validate(opts: &SyncOptions) -> Result<()> {
    if opts.source_table.is_empty() {
        return Err(SyncError::Config("source_table is required".into()));
    }
    if opts.dest_table.is_empty() {
        return Err(SyncError::Config("dest_table is required".into()));
    }
    if opts.row_count_interval == 0 {
        return Err(SyncError::Config(
            "row_count_interval must be at least 1".into(),
        ));
    }
    if opts.commit_interval == 0 {
        return Err(SyncError::Config(
            "commit_interval must be at least 1".into(),
        ));
    }
    if let Some(keys) = &opts.unique_keys {
        if keys.iter().any(|k| k.is_empty()) {
            return Err(SyncError::Config(
                "unique_keys entries must name at least one column".into(),
            ));
        }
    }

    for col in &opts.mask_cols {
        if opts.excl_cols.contains(col) {
            return Err(SyncError::Config(format!(
                "column '{}' is both masked and excluded",
                col
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_options() {
        assert!(validate(&SyncOptions::new("a", "b")).is_ok());
    }

    #[test]
    fn test_missing_tables() {
        assert!(validate(&SyncOptions::new("", "b")).is_err());
        assert!(validate(&SyncOptions::new("a", "")).is_err());
    }

    #[test]
    fn test_zero_intervals() {
        let mut opts = SyncOptions::new("a", "b");
        opts.row_count_interval = 0;
        assert!(validate(&opts).is_err());

        let mut opts = SyncOptions::new("a", "b");
        opts.commit_interval = 0;
        assert!(validate(&opts).is_err());
    }

    #[test]
    fn test_empty_unique_key() {
        let mut opts = SyncOptions::new("a", "b");
        opts.unique_keys = Some(vec![vec![]]);
        assert!(validate(&opts).is_err());

        opts.unique_keys = Some(vec![vec!["id".to_string()]]);
        assert!(validate(&opts).is_ok());
    }

    #[test]
    fn test_mask_excl_overlap() {
        let mut opts = SyncOptions::new("a", "b");
        opts.mask_cols = vec!["notes".to_string()];
        opts.excl_cols = vec!["notes".to_string()];
        assert!(validate(&opts).is_err());
    }
}
