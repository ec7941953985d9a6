// Store the rows of one analytics query as a local JSON or NDJSON snapshot.
use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::api::{AnalyticsClient, Query};
use crate::core::error::{Error, ErrorKind};
use crate::core::record::Row;
use crate::core::store::FileStore;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotFormat {
    /// `{"rows": [...], "time_of_download": <unix seconds>}`
    Json,
    /// One row per line.
    Ndjson,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SnapshotReport {
    pub query_id: u64,
    pub rows: usize,
    pub time_of_download: u64,
    pub file: Option<PathBuf>,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    rows: &'a [Row],
    time_of_download: u64,
}

pub fn store_query_result(
    client: &AnalyticsClient,
    query: &Query,
    store: &FileStore,
    file_name: &str,
    format: SnapshotFormat,
) -> Result<SnapshotReport, Error> {
    let time_of_download = unix_now()?;
    let rows = client.refresh(query)?;
    let file = write_snapshot(store, file_name, format, &rows, time_of_download)?;
    info!(query_id = query.query_id, rows = rows.len(), "stored query result");
    Ok(SnapshotReport {
        query_id: query.query_id,
        rows: rows.len(),
        time_of_download,
        file,
    })
}

fn write_snapshot(
    store: &FileStore,
    file_name: &str,
    format: SnapshotFormat,
    rows: &[Row],
    time_of_download: u64,
) -> Result<Option<PathBuf>, Error> {
    match format {
        SnapshotFormat::Json => {
            let snapshot = Snapshot {
                rows,
                time_of_download,
            };
            store.write_json(&snapshot, file_name).map(Some)
        }
        SnapshotFormat::Ndjson => store.write_ndjson(rows, file_name, true),
    }
}

fn unix_now() -> Result<u64, Error> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    u64::try_from(now).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("system clock is before the unix epoch")
            .with_source(err)
    })
}
