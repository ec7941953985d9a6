//! Purpose: One incremental app data sync run, from checkpoint to checkpoint.
//! Exports: `AppHashSource`, `SyncReport`, `sync_app_data`.
//! Role: Orchestrates source queries, reconciliation and file writes.
//! Invariants: The checkpoint is written last, after found and missing files.
//! Invariants: Any failure before the writes leaves every file as it was.
//! Invariants: Overlapping runs on one volume are refused via the run lock.
//! Invariants: A hash already in this block's found file is never fetched again.
use std::path::PathBuf;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info, warn};

use super::config::AppDataSyncConfig;
use crate::core::block_range::{BlockRange, GENESIS_BLOCK};
use crate::core::error::{Error, ErrorKind};
use crate::core::reconcile::{ContentSource, RecordHandler, drop_already_found};
use crate::core::record::{AppHashRow, FoundRecord, MissingRecord};
use crate::core::store::FileStore;

/// Where new app hashes come from.
pub trait AppHashSource {
    /// Highest block the source has fully indexed.
    fn latest_app_hash_block(&self) -> Result<u64, Error>;

    fn get_app_hashes(&self, range: &BlockRange) -> Result<Vec<AppHashRow>, Error>;
}

impl<A: AppHashSource + ?Sized> AppHashSource for &A {
    fn latest_app_hash_block(&self) -> Result<u64, Error> {
        (**self).latest_app_hash_block()
    }

    fn get_app_hashes(&self, range: &BlockRange) -> Result<Vec<AppHashRow>, Error> {
        (**self).get_app_hashes(range)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced_at: String,
    pub block_from: u64,
    pub block_to: u64,
    pub from_genesis: bool,
    pub new_rows: usize,
    /// Hashes skipped because this block's found file already holds them.
    pub already_found: usize,
    /// Records resolved or given up on by this run.
    pub found: usize,
    /// Records in the found file after this run, including earlier runs at the same block.
    pub found_total: usize,
    pub recovered: usize,
    pub gave_up: usize,
    pub missing: usize,
    pub found_file: Option<PathBuf>,
    pub missing_file: PathBuf,
    pub checkpoint_file: PathBuf,
}

pub fn sync_app_data<A, C>(
    config: &AppDataSyncConfig,
    source: &A,
    content: C,
) -> Result<SyncReport, Error>
where
    A: AppHashSource + ?Sized,
    C: ContentSource,
{
    config.retry.validate()?;
    let store = FileStore::new(config.output_dir());
    let _lock = store.lock()?;

    let stored = store
        .load_checkpoint(&config.sync_file, &config.sync_column)
        .inspect_err(|err| error!(error = %err, "cannot read checkpoint"))?;
    let block_from = match stored {
        Some(block) => block,
        None => {
            warn!(
                file = %config.sync_file,
                genesis = GENESIS_BLOCK,
                "block range file not found, using genesis block"
            );
            GENESIS_BLOCK
        }
    };

    let block_to = source.latest_app_hash_block()?;
    let block_range = BlockRange::new(block_from, block_to)?;
    info!(%block_range, "syncing app hashes");

    let new_rows = source.get_app_hashes(&block_range)?;
    let missing_records: Vec<MissingRecord> =
        store.load_ndjson_or_empty(&config.missing_files_name)?;
    info!(
        new = new_rows.len(),
        carried = missing_records.len(),
        "loaded records"
    );

    let found_name = config.found_file_name(block_range.block_to);
    // A run that does not advance the block reuses the previous run's output file.
    let mut found: Vec<FoundRecord> = store.load_ndjson_or_empty(&found_name)?;
    let (new_rows, missing_records, already_found) =
        drop_already_found(new_rows, missing_records, &found);

    let handler = RecordHandler::new(content, config.retry);
    let reconciled = handler.fetch_content_and_filter(new_rows, missing_records);
    let found_this_run = reconciled.found.len();
    found.extend(reconciled.found);
    let found_file = store.write_ndjson(&found, &found_name, true)?;
    // Always rewritten: an empty list must replace records that were given up on.
    let missing_file = store
        .write_ndjson(&reconciled.missing, &config.missing_files_name, false)?
        .ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_message("missing records file was not written")
        })?;
    let checkpoint_file =
        store.write_checkpoint(&config.sync_file, &config.sync_column, block_range.block_to)?;
    info!(block_to = block_range.block_to, "checkpoint advanced");

    Ok(SyncReport {
        synced_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        block_from: block_range.block_from,
        block_to: block_range.block_to,
        from_genesis: stored.is_none(),
        new_rows: reconciled.stats.new_rows,
        already_found,
        found: found_this_run,
        found_total: found.len(),
        recovered: reconciled.stats.recovered,
        gave_up: reconciled.stats.gave_up,
        missing: reconciled.missing.len(),
        found_file,
        missing_file,
        checkpoint_file,
    })
}
