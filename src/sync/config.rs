// Paths, file names and retry policy for the app data sync.
use std::path::PathBuf;

use crate::core::retry::RetryPolicy;

pub const DEFAULT_TABLE_NAME: &str = "app_data";
pub const DEFAULT_MISSING_FILE: &str = "missing_app_hashes.json";
pub const DEFAULT_SYNC_FILE: &str = "sync_block.csv";
pub const DEFAULT_SYNC_COLUMN: &str = "last_synced_block";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppDataSyncConfig {
    /// Root of the persistent volume; state lives under `volume_path/table_name`.
    pub volume_path: PathBuf,
    pub table_name: String,
    pub missing_files_name: String,
    pub sync_file: String,
    pub sync_column: String,
    pub retry: RetryPolicy,
}

impl AppDataSyncConfig {
    pub fn new(volume_path: impl Into<PathBuf>) -> Self {
        Self {
            volume_path: volume_path.into(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            missing_files_name: DEFAULT_MISSING_FILE.to_string(),
            sync_file: DEFAULT_SYNC_FILE.to_string(),
            sync_column: DEFAULT_SYNC_COLUMN.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn output_dir(&self) -> PathBuf {
        self.volume_path.join(&self.table_name)
    }

    /// Name of the NDJSON file holding records resolved up to `block_to`.
    pub fn found_file_name(&self, block_to: u64) -> String {
        format!("cow_{block_to}.json")
    }
}
