//! Purpose: Typed view of the app data documents served by the gateway.
//! Exports: `AppData`, `Metadata`, `Referrer`, `Quote`, `Class`, `OrderClass`, `Address`, `referrer_of`.
//! Role: Reads versioned documents (0.1.0 through 0.5.0) and extracts the referrer address.
//! Invariants: Unknown top-level and metadata fields are ignored.
//! Invariants: A versioned sub-object whose fields do not match its version is rejected.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::core::record::lenient_u32;

const ADDRESS_LEN: usize = 20;

/// 20-byte account address, shown as lowercase `0x` hex.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl FromStr for Address {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let stripped = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(stripped, &mut bytes).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message(format!("invalid address {raw:?}"))
                .with_source(err)
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "version")]
pub enum Referrer {
    #[serde(rename = "0.1.0")]
    V1 { address: Address },
}

impl Referrer {
    pub fn address(&self) -> Address {
        match self {
            Self::V1 { address } => *address,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "version")]
pub enum Quote {
    #[serde(rename = "0.1.0", rename_all = "camelCase")]
    V1 {
        #[serde(deserialize_with = "decimal_amount")]
        sell_amount: String,
        #[serde(deserialize_with = "decimal_amount")]
        buy_amount: String,
    },
    #[serde(rename = "0.2.0", rename_all = "camelCase")]
    V2 {
        #[serde(deserialize_with = "lenient_u32")]
        slippage_bips: u32,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "version")]
pub enum Class {
    #[serde(rename = "0.1.0")]
    V1 {
        #[serde(rename = "type")]
        order_class: OrderClass,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderClass {
    Market,
    Limit,
    Liquidity,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Metadata {
    pub referrer: Option<Referrer>,
    pub quote: Option<Quote>,
    pub class: Option<Class>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum Version {
    #[serde(rename = "0.1.0")]
    V1,
    #[serde(rename = "0.2.0")]
    V2,
    #[serde(rename = "0.3.0")]
    V3,
    #[serde(rename = "0.4.0")]
    V4,
    #[default]
    #[serde(rename = "0.5.0")]
    V5,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    pub version: Version,
    pub app_code: String,
    pub environment: Option<String>,
    pub metadata: Option<Metadata>,
}

impl AppData {
    pub fn from_content(content: &Value) -> Result<Self, Error> {
        Self::deserialize(content).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("content is not a recognised app data document")
                .with_source(err)
        })
    }

    pub fn referrer(&self) -> Option<Address> {
        Some(self.metadata.as_ref()?.referrer.as_ref()?.address())
    }
}

/// Referrer address of a resolved document; `None` when absent or unparsable.
pub fn referrer_of(content: &Value) -> Option<Address> {
    AppData::from_content(content).ok()?.referrer()
}

fn decimal_amount<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(de::Error::invalid_value(
            de::Unexpected::Str(&raw),
            &"a decimal amount",
        ));
    }
    Ok(raw)
}
