// File-backed sync state: checkpoint CSV, NDJSON record files, JSON snapshots, run lock.
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind, map_io_error_kind};

const LOCK_FILE: &str = ".sync.lock";

#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

/// Exclusive advisory lock over a store directory; released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to release run lock");
        }
    }
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Takes the directory's run lock without waiting.
    pub fn lock(&self) -> Result<RunLock, Error> {
        self.ensure_dir()?;
        let path = self.path(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| io_failure(err, "failed to open run lock", &path))?;
        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(Error::new(ErrorKind::Busy)
                    .with_message("another sync run holds the lock")
                    .with_path(&path)
                    .with_hint("Wait for the running job to finish; runs must not overlap."));
            }
            return Err(io_failure(err, "failed to acquire run lock", &path));
        }
        Ok(RunLock { file, path })
    }

    /// Reads the single-row checkpoint CSV; `Ok(None)` when the file does not exist.
    pub fn load_checkpoint(&self, name: &str, column: &str) -> Result<Option<u64>, Error> {
        let path = self.path(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_failure(err, "failed to open checkpoint", &path)),
        };

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
        let headers = reader.headers().map_err(|err| csv_failure(err, &path))?.clone();
        let Some(index) = headers.iter().position(|header| header.trim() == column) else {
            return Err(Error::new(ErrorKind::Config)
                .with_message(format!(
                    "checkpoint does not contain column header {column}, refusing to avoid duplication"
                ))
                .with_path(&path)
                .with_hint("Fix or remove the checkpoint file; removal restarts from genesis."));
        };
        let Some(record) = reader.records().next() else {
            return Err(Error::new(ErrorKind::Config)
                .with_message("checkpoint has a header but no value row")
                .with_path(&path));
        };
        let record = record.map_err(|err| csv_failure(err, &path))?;
        let raw = record.get(index).unwrap_or_default().trim();
        let block = raw.parse::<u64>().map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message(format!("checkpoint value {raw:?} is not a block number"))
                .with_path(&path)
                .with_source(err)
        })?;
        Ok(Some(block))
    }

    pub fn write_checkpoint(&self, name: &str, column: &str, block: u64) -> Result<PathBuf, Error> {
        let path = self.path(name);
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([column])
            .and_then(|_| writer.write_record([block.to_string()]))
            .map_err(|err| csv_failure(err, &path))?;
        let bytes = writer.into_inner().map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode checkpoint")
                .with_path(&path)
                .with_source(err.into_error())
        })?;
        self.write_atomic(name, &bytes)
    }

    /// Reads newline-delimited JSON records; blank lines are ignored.
    pub fn load_ndjson<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, Error> {
        let path = self.path(name);
        debug!(path = %path.display(), "loading ndjson");
        let file = File::open(&path).map_err(|err| io_failure(err, "failed to open file", &path))?;
        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| io_failure(err, "failed to read file", &path))?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|err| {
                Error::new(ErrorKind::Corrupt)
                    .with_message(format!("invalid record on line {}", idx + 1))
                    .with_path(&path)
                    .with_source(err)
            })?;
            records.push(record);
        }
        Ok(records)
    }

    pub fn load_ndjson_or_empty<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, Error> {
        match self.load_ndjson(name) {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            other => other,
        }
    }

    /// Writes records as NDJSON. With `skip_empty`, an empty batch writes nothing.
    pub fn write_ndjson<T: Serialize>(
        &self,
        records: &[T],
        name: &str,
        skip_empty: bool,
    ) -> Result<Option<PathBuf>, Error> {
        if records.is_empty() && skip_empty {
            warn!(file = name, "nothing to write, skipping");
            return Ok(None);
        }
        let mut bytes = Vec::new();
        for record in records {
            serde_json::to_writer(&mut bytes, record).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode record")
                    .with_path(self.path(name))
                    .with_source(err)
            })?;
            bytes.push(b'\n');
        }
        self.write_atomic(name, &bytes).map(Some)
    }

    pub fn write_json<T: Serialize>(&self, value: &T, name: &str) -> Result<PathBuf, Error> {
        let mut bytes = serde_json::to_vec_pretty(value).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode json")
                .with_path(self.path(name))
                .with_source(err)
        })?;
        bytes.push(b'\n');
        self.write_atomic(name, &bytes)
    }

    // Temp file in the same directory, fsync, rename over the target, fsync the directory.
    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, Error> {
        self.ensure_dir()?;
        let path = self.path(name);
        let tmp_path = self.path(&format!(".{name}.tmp"));
        let mut tmp = File::create(&tmp_path)
            .map_err(|err| io_failure(err, "failed to create temp file", &tmp_path))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.sync_all())
            .map_err(|err| io_failure(err, "failed to write temp file", &tmp_path))?;
        drop(tmp);
        fs::rename(&tmp_path, &path).map_err(|err| io_failure(err, "failed to replace file", &path))?;
        sync_dir(&self.dir)?;
        debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
        Ok(path)
    }

    fn ensure_dir(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| io_failure(err, "failed to create output directory", &self.dir))
    }
}

// The rename is only durable once the directory entry is flushed.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), Error> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|err| io_failure(err, "failed to sync directory", dir))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), Error> {
    Ok(())
}

fn io_failure(err: io::Error, message: &str, path: &Path) -> Error {
    Error::new(map_io_error_kind(&err))
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

fn csv_failure(err: csv::Error, path: &Path) -> Error {
    Error::new(ErrorKind::Corrupt)
        .with_message("malformed checkpoint csv")
        .with_path(path)
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{FileStore, sync_dir};
    use crate::core::error::ErrorKind;
    use crate::core::record::{FoundRecord, MissingRecord};
    use serde_json::json;
    use std::fs;

    fn store() -> (tempfile::TempDir, FileStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(temp.path().join("app_data"));
        (temp, store)
    }

    #[test]
    fn checkpoint_round_trips() {
        let (_temp, store) = store();
        store
            .write_checkpoint("sync_block.csv", "last_synced_block", 15_000_000)
            .expect("write");
        let raw = fs::read_to_string(store.path("sync_block.csv")).expect("read");
        assert_eq!(raw, "last_synced_block\n15000000\n");
        let block = store
            .load_checkpoint("sync_block.csv", "last_synced_block")
            .expect("load");
        assert_eq!(block, Some(15_000_000));
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let (_temp, store) = store();
        let block = store
            .load_checkpoint("sync_block.csv", "last_synced_block")
            .expect("load");
        assert_eq!(block, None);
    }

    #[test]
    fn checkpoint_without_column_is_config_error() {
        let (_temp, store) = store();
        fs::create_dir_all(store.dir()).expect("dir");
        fs::write(store.path("sync_block.csv"), "block\n12\n").expect("write");
        let err = store
            .load_checkpoint("sync_block.csv", "last_synced_block")
            .expect_err("missing column");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn checkpoint_with_garbage_value_is_config_error() {
        let (_temp, store) = store();
        fs::create_dir_all(store.dir()).expect("dir");
        fs::write(store.path("sync_block.csv"), "last_synced_block\nlater\n").expect("write");
        let err = store
            .load_checkpoint("sync_block.csv", "last_synced_block")
            .expect_err("garbage");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn ndjson_round_trips_records() {
        let (_temp, store) = store();
        let missing = vec![
            MissingRecord {
                app_hash: "0x01".to_string(),
                first_seen_block: 1,
                attempts: 3,
            },
            MissingRecord {
                app_hash: "0x02".to_string(),
                first_seen_block: 2,
                attempts: 9,
            },
        ];
        store
            .write_ndjson(&missing, "missing_app_hashes.json", false)
            .expect("write");
        let loaded: Vec<MissingRecord> =
            store.load_ndjson("missing_app_hashes.json").expect("load");
        assert_eq!(loaded, missing);

        let found = vec![FoundRecord::new(
            "0x03".to_string(),
            3,
            json!({"appCode": "CowSwap", "metadata": {"referrer": {"version": "0.1.0"}}}),
        )];
        store.write_ndjson(&found, "cow_3.json", true).expect("write");
        let loaded: Vec<FoundRecord> = store.load_ndjson("cow_3.json").expect("load");
        assert_eq!(loaded, found);
    }

    #[test]
    fn empty_batch_is_skipped_only_when_asked() {
        let (_temp, store) = store();
        let empty: Vec<MissingRecord> = Vec::new();
        let skipped = store.write_ndjson(&empty, "cow_1.json", true).expect("skip");
        assert!(skipped.is_none());
        assert!(!store.path("cow_1.json").exists());

        let written = store
            .write_ndjson(&empty, "missing_app_hashes.json", false)
            .expect("write");
        assert!(written.is_some());
        let loaded: Vec<MissingRecord> =
            store.load_ndjson("missing_app_hashes.json").expect("load");
        assert!(loaded.is_empty());
    }

    #[test]
    fn absent_ndjson_is_not_found_or_empty() {
        let (_temp, store) = store();
        let err = store
            .load_ndjson::<MissingRecord>("missing_app_hashes.json")
            .expect_err("absent");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let empty: Vec<MissingRecord> = store
            .load_ndjson_or_empty("missing_app_hashes.json")
            .expect("empty");
        assert!(empty.is_empty());
    }

    #[test]
    fn corrupt_ndjson_line_is_reported() {
        let (_temp, store) = store();
        fs::create_dir_all(store.dir()).expect("dir");
        fs::write(
            store.path("missing_app_hashes.json"),
            "{\"app_hash\":\"0x01\",\"first_seen_block\":1,\"attempts\":3}\n\n{oops\n",
        )
        .expect("write");
        let err = store
            .load_ndjson::<MissingRecord>("missing_app_hashes.json")
            .expect_err("corrupt");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(err.message().unwrap_or_default().contains("line 3"));
    }

    #[cfg(unix)]
    #[test]
    fn directory_sync_reports_missing_directory() {
        let (temp, store) = store();
        sync_dir(temp.path()).expect("existing dir");
        let err = sync_dir(store.dir()).expect_err("absent dir");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.path(), Some(store.dir()));
    }

    #[test]
    fn replaced_file_leaves_no_temp_behind() {
        let (_temp, store) = store();
        store
            .write_checkpoint("sync_block.csv", "last_synced_block", 1)
            .expect("first");
        store
            .write_checkpoint("sync_block.csv", "last_synced_block", 2)
            .expect("second");
        let names: Vec<String> = fs::read_dir(store.dir())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["sync_block.csv".to_string()]);
    }

    #[test]
    fn second_lock_is_busy_until_first_is_dropped() {
        let (_temp, store) = store();
        let first = store.lock().expect("first lock");
        let err = store.lock().expect_err("contended");
        assert_eq!(err.kind(), ErrorKind::Busy);
        drop(first);
        store.lock().expect("relock");
    }
}
