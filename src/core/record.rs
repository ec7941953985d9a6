//! Purpose: Typed rows flowing through the app data sync.
//! Exports: `AppHashRow`, `MissingRecord`, `FoundRecord`, `Row`.
//! Role: Replace loosely-typed column maps with explicit records at the file/API edges.
//! Invariants: Writers emit numeric fields as JSON numbers.
//! Invariants: Readers also accept decimal strings, the format older runs wrote.
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use std::fmt;

use crate::core::content::{Address, referrer_of};

/// A raw result row from the analytics service.
pub type Row = Map<String, Value>;

/// A hash first observed in the scanned block range.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AppHashRow {
    pub app_hash: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub first_seen_block: u64,
}

/// A hash whose content could not be resolved yet.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MissingRecord {
    pub app_hash: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub first_seen_block: u64,
    #[serde(deserialize_with = "lenient_u32")]
    pub attempts: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FoundRecord {
    pub app_hash: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub first_seen_block: u64,
    pub content: Value,
    /// Referrer address declared by the document, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<Address>,
}

impl AppHashRow {
    pub fn into_missing(self, attempts: u32) -> MissingRecord {
        MissingRecord {
            app_hash: self.app_hash,
            first_seen_block: self.first_seen_block,
            attempts,
        }
    }

    pub fn into_found(self, content: Value) -> FoundRecord {
        FoundRecord::new(self.app_hash, self.first_seen_block, content)
    }
}

impl MissingRecord {
    pub fn into_found(self, content: Value) -> FoundRecord {
        FoundRecord::new(self.app_hash, self.first_seen_block, content)
    }
}

impl FoundRecord {
    pub fn new(app_hash: String, first_seen_block: u64, content: Value) -> Self {
        let referrer = referrer_of(&content);
        Self {
            app_hash,
            first_seen_block,
            content,
            referrer,
        }
    }

    /// Terminal record for a hash given up on; content is an empty object.
    pub fn empty(app_hash: String, first_seen_block: u64) -> Self {
        Self {
            app_hash,
            first_seen_block,
            content: Value::Object(Map::new()),
            referrer: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.content, Value::Object(map) if map.is_empty())
    }
}

struct LenientU64Visitor;

impl de::Visitor<'_> for LenientU64Visitor {
    type Value = u64;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "an unsigned integer or a decimal string")
    }

    fn visit_u64<E>(self, value: u64) -> Result<u64, E>
    where
        E: de::Error,
    {
        Ok(value)
    }

    fn visit_i64<E>(self, value: i64) -> Result<u64, E>
    where
        E: de::Error,
    {
        u64::try_from(value)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Signed(value), &self))
    }

    fn visit_str<E>(self, value: &str) -> Result<u64, E>
    where
        E: de::Error,
    {
        value
            .trim()
            .parse()
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientU64Visitor)
}

pub(crate) fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = deserializer.deserialize_any(LenientU64Visitor)?;
    u32::try_from(value).map_err(|_| de::Error::custom(format!("attempts out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::{AppHashRow, FoundRecord, MissingRecord};
    use serde_json::json;

    #[test]
    fn missing_record_accepts_string_numbers() {
        let value = json!({
            "app_hash": "0xab",
            "first_seen_block": "12153300",
            "attempts": "3"
        });
        let record: MissingRecord = serde_json::from_value(value).expect("record");
        assert_eq!(record.first_seen_block, 12_153_300);
        assert_eq!(record.attempts, 3);
    }

    #[test]
    fn missing_record_writes_numbers() {
        let record = MissingRecord {
            app_hash: "0xab".to_string(),
            first_seen_block: 7,
            attempts: 6,
        };
        let value = serde_json::to_value(&record).expect("value");
        assert_eq!(value["attempts"], json!(6));
        assert_eq!(value["first_seen_block"], json!(7));
    }

    #[test]
    fn negative_or_garbage_numbers_are_rejected() {
        let negative = json!({"app_hash": "0xab", "first_seen_block": -1});
        assert!(serde_json::from_value::<AppHashRow>(negative).is_err());

        let garbage = json!({"app_hash": "0xab", "first_seen_block": "soon"});
        assert!(serde_json::from_value::<AppHashRow>(garbage).is_err());
    }

    #[test]
    fn empty_found_record_has_empty_object_content() {
        let record = FoundRecord::empty("0xab".to_string(), 1);
        assert!(record.is_empty());
        assert_eq!(record.content, json!({}));

        let row = AppHashRow {
            app_hash: "0xcd".to_string(),
            first_seen_block: 2,
        };
        assert!(!row.into_found(json!({"appCode": "CowSwap"})).is_empty());
    }

    #[test]
    fn found_record_carries_referrer_of_its_document() {
        let content = json!({
            "version": "0.1.0",
            "appCode": "MooSwap",
            "metadata": {
                "referrer": {
                    "version": "0.1.0",
                    "address": "0x8c35B7eE520277D14af5F6098835A584C337311b"
                }
            }
        });
        let record = FoundRecord::new("0xab".to_string(), 1, content);
        let value = serde_json::to_value(&record).expect("value");
        assert_eq!(
            value["referrer"],
            json!("0x8c35b7ee520277d14af5f6098835a584c337311b")
        );

        let plain = FoundRecord::new("0xcd".to_string(), 2, json!({"appCode": "CowSwap"}));
        let value = serde_json::to_value(&plain).expect("value");
        assert!(value.get("referrer").is_none());

        let legacy: FoundRecord = serde_json::from_value(json!({
            "app_hash": "0xef",
            "first_seen_block": "3",
            "content": {}
        }))
        .expect("legacy line");
        assert_eq!(legacy.referrer, None);
    }
}
