//! Purpose: Named analytics queries and their runtime parameters.
//! Exports: `Query`, `QueryParameter`, `app_hashes`, `latest_app_hash_block`, `parse_param`.
//! Role: Bind parameter values to saved queries; no SQL text is built here.
//! Invariants: Query ids refer to saved queries on the analytics service.
//! Invariants: Parameter values travel as strings, as the execute endpoint expects.
use std::fmt;

use serde_json::{Map, Value};

use crate::core::block_range::BlockRange;
use crate::core::error::{Error, ErrorKind};

pub const APP_HASHES_QUERY_ID: u64 = 1_610_025;
pub const LATEST_APP_HASH_BLOCK_QUERY_ID: u64 = 1_615_490;
/// Column of the latest-block query that carries the block number.
pub const LATEST_BLOCK_COLUMN: &str = "latest_block";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryParameter {
    pub key: String,
    pub value: String,
}

impl QueryParameter {
    pub fn text(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn number(key: impl Into<String>, value: u64) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Query {
    pub query_id: u64,
    pub name: String,
    pub params: Vec<QueryParameter>,
}

impl Query {
    pub fn new(query_id: u64, name: impl Into<String>) -> Self {
        Self {
            query_id,
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Copy of this query carrying `params` instead of its current ones.
    pub fn with_params(&self, params: Vec<QueryParameter>) -> Self {
        Self {
            query_id: self.query_id,
            name: self.name.clone(),
            params,
        }
    }

    pub fn parameters_json(&self) -> Map<String, Value> {
        self.params
            .iter()
            .map(|param| (param.key.clone(), Value::String(param.value.clone())))
            .collect()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query({}, {:?}", self.query_id, self.name)?;
        for param in &self.params {
            write!(f, ", {}={}", param.key, param.value)?;
        }
        write!(f, ")")
    }
}

pub fn app_hashes(range: &BlockRange) -> Query {
    Query::new(APP_HASHES_QUERY_ID, "Unique App Hashes").with_params(vec![
        QueryParameter::number("BlockFrom", range.block_from),
        QueryParameter::number("BlockTo", range.block_to),
    ])
}

pub fn latest_app_hash_block() -> Query {
    Query::new(LATEST_APP_HASH_BLOCK_QUERY_ID, "Latest Possible App Hash Block")
}

/// Parses a `name=value` command-line parameter.
pub fn parse_param(raw: &str) -> Result<QueryParameter, Error> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid query parameter {raw:?}"))
            .with_hint("Use name=value, e.g. --param BlockFrom=12153262."));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("query parameter {raw:?} has an empty name")));
    }
    Ok(QueryParameter::text(key, value))
}
