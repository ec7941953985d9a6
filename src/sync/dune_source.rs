// `AppHashSource` backed by saved analytics queries.
use serde_json::Value;
use tracing::debug;

use super::app_data::AppHashSource;
use crate::api::queries::{self, LATEST_BLOCK_COLUMN};
use crate::api::AnalyticsClient;
use crate::core::block_range::BlockRange;
use crate::core::error::{Error, ErrorKind};
use crate::core::record::{AppHashRow, Row};

#[derive(Clone)]
pub struct DuneFetcher {
    client: AnalyticsClient,
}

impl DuneFetcher {
    pub fn new(client: AnalyticsClient) -> Self {
        Self { client }
    }
}

impl AppHashSource for DuneFetcher {
    fn latest_app_hash_block(&self) -> Result<u64, Error> {
        let rows = self.client.refresh(&queries::latest_app_hash_block())?;
        latest_block_from_rows(&rows)
    }

    fn get_app_hashes(&self, range: &BlockRange) -> Result<Vec<AppHashRow>, Error> {
        let rows = self.client.refresh(&queries::app_hashes(range))?;
        debug!(count = rows.len(), %range, "fetched app hashes");
        rows.into_iter().map(app_hash_row).collect()
    }
}

fn latest_block_from_rows(rows: &[Row]) -> Result<u64, Error> {
    let Some(row) = rows.first() else {
        return Err(Error::new(ErrorKind::Remote)
            .with_message("latest app hash block query returned no rows"));
    };
    let value = row.get(LATEST_BLOCK_COLUMN).ok_or_else(|| {
        Error::new(ErrorKind::Remote).with_message(format!(
            "latest app hash block query has no column {LATEST_BLOCK_COLUMN}"
        ))
    })?;
    let block = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    block.ok_or_else(|| {
        Error::new(ErrorKind::Remote)
            .with_message(format!("latest block value {value} is not a block number"))
    })
}

fn app_hash_row(row: Row) -> Result<AppHashRow, Error> {
    serde_json::from_value(Value::Object(row)).map_err(|err| {
        Error::new(ErrorKind::Remote)
            .with_message("app hash row has an unexpected shape")
            .with_source(err)
    })
}
