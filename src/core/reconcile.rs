//! Purpose: Resolve app hashes to content and split them into found / still-missing.
//! Exports: `ContentSource`, `resolve_content`, `RecordHandler`, `Reconciled`, `ReconcileStats`,
//! `drop_already_found`.
//! Role: The state machine of the app data sync; pure apart from the injected source.
//! Invariants: Every fetch failure costs one attempt and is never escalated.
//! Invariants: Attempt counts of carried-over records never decrease.
//! Invariants: A record whose attempts exceed the give-up threshold leaves the missing set for good.
//! Invariants: Each app hash appears at most once across found and missing.
use std::collections::{HashMap, HashSet};
use std::thread;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::cid::Cid;
use crate::core::error::Error;
use crate::core::record::{AppHashRow, FoundRecord, MissingRecord};
use crate::core::retry::RetryPolicy;

/// One fetch attempt against a content-addressed store.
pub trait ContentSource {
    fn fetch(&self, cid: &Cid) -> Result<Value, Error>;
}

impl<S: ContentSource + ?Sized> ContentSource for &S {
    fn fetch(&self, cid: &Cid) -> Result<Value, Error> {
        (**self).fetch(cid)
    }
}

/// Tries `source` up to `policy.max_attempts` times; `None` when every attempt failed.
pub fn resolve_content<S>(source: &S, cid: &Cid, policy: &RetryPolicy) -> Option<Value>
where
    S: ContentSource + ?Sized,
{
    for attempt in 1..=policy.max_attempts {
        match source.fetch(cid) {
            Ok(content) => return Some(content),
            Err(err) => {
                debug!(%cid, attempt, error = %err, "content fetch failed");
                if attempt < policy.max_attempts && !policy.backoff.is_zero() {
                    thread::sleep(policy.backoff);
                }
            }
        }
    }
    None
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReconcileStats {
    pub new_rows: usize,
    pub found_new: usize,
    pub recovered: usize,
    pub gave_up: usize,
    pub still_missing: usize,
    pub duplicates: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reconciled {
    pub found: Vec<FoundRecord>,
    pub missing: Vec<MissingRecord>,
    pub stats: ReconcileStats,
}

pub struct RecordHandler<S> {
    source: S,
    policy: RetryPolicy,
}

impl<S: ContentSource> RecordHandler<S> {
    pub fn new(source: S, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Drains both batches, returning what was resolved and what is still missing.
    pub fn fetch_content_and_filter(
        &self,
        new_rows: Vec<AppHashRow>,
        missing_values: Vec<MissingRecord>,
    ) -> Reconciled {
        let mut out = Reconciled::default();
        let (new_rows, missing_values) =
            collapse_duplicates(new_rows, missing_values, &mut out.stats);
        out.stats.new_rows = new_rows.len();

        for row in new_rows {
            self.handle_new_record(row, &mut out);
        }
        info!(
            count = missing_values.len(),
            "attempting to recover missing records from previous run"
        );
        for record in missing_values {
            self.handle_missing_record(record, &mut out);
        }

        out.stats.still_missing = out.missing.len();
        info!(
            found_new = out.stats.found_new,
            recovered = out.stats.recovered,
            gave_up = out.stats.gave_up,
            still_missing = out.stats.still_missing,
            "reconciled app hashes"
        );
        out
    }

    fn handle_new_record(&self, row: AppHashRow, out: &mut Reconciled) {
        let max_attempts = self.policy.max_attempts;
        match self.resolve(&row.app_hash) {
            Some(content) => {
                debug!(app_hash = %row.app_hash, "found content");
                out.stats.found_new += 1;
                out.found.push(row.into_found(content));
            }
            None => {
                debug!(
                    app_hash = %row.app_hash,
                    attempts = max_attempts,
                    "no content found"
                );
                out.missing.push(row.into_missing(max_attempts));
            }
        }
    }

    fn handle_missing_record(&self, mut record: MissingRecord, out: &mut Reconciled) {
        let content = self.resolve(&record.app_hash);
        let attempts = record.attempts.saturating_add(self.policy.max_attempts);

        if let Some(content) = content {
            debug!(app_hash = %record.app_hash, "found previously missing content");
            out.stats.recovered += 1;
            out.found.push(record.into_found(content));
        } else if self.policy.gives_up_after(attempts) {
            debug!(
                app_hash = %record.app_hash,
                attempts,
                "no content after give-up threshold, recording empty content"
            );
            out.stats.gave_up += 1;
            out.found
                .push(FoundRecord::empty(record.app_hash, record.first_seen_block));
        } else {
            debug!(app_hash = %record.app_hash, attempts, "still no content found");
            record.attempts = attempts;
            out.missing.push(record);
        }
    }

    fn resolve(&self, app_hash: &str) -> Option<Value> {
        match Cid::from_hex(app_hash) {
            Ok(cid) => resolve_content(&self.source, &cid, &self.policy),
            Err(err) => {
                // Unparsable hashes can never resolve; they age out via the threshold.
                warn!(%app_hash, error = %err, "skipping fetch for malformed app hash");
                None
            }
        }
    }
}

fn hash_key(app_hash: &str) -> String {
    let trimmed = app_hash.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    stripped.to_ascii_lowercase()
}

/// Removes rows and carried records whose hash already has a found record.
/// Returns the remaining batches and how many entries were dropped.
pub fn drop_already_found(
    new_rows: Vec<AppHashRow>,
    missing_values: Vec<MissingRecord>,
    found: &[FoundRecord],
) -> (Vec<AppHashRow>, Vec<MissingRecord>, usize) {
    if found.is_empty() {
        return (new_rows, missing_values, 0);
    }
    let resolved: HashSet<String> = found.iter().map(|record| hash_key(&record.app_hash)).collect();
    let before = new_rows.len() + missing_values.len();
    let rows: Vec<AppHashRow> = new_rows
        .into_iter()
        .filter(|row| !resolved.contains(&hash_key(&row.app_hash)))
        .collect();
    let missing: Vec<MissingRecord> = missing_values
        .into_iter()
        .filter(|record| !resolved.contains(&hash_key(&record.app_hash)))
        .collect();
    let dropped = before - rows.len() - missing.len();
    if dropped > 0 {
        debug!(dropped, "skipping app hashes that already have content");
    }
    (rows, missing, dropped)
}

// A hash in both batches is kept once, as missing, so its attempt count survives.
fn collapse_duplicates(
    new_rows: Vec<AppHashRow>,
    missing_values: Vec<MissingRecord>,
    stats: &mut ReconcileStats,
) -> (Vec<AppHashRow>, Vec<MissingRecord>) {
    let mut missing: Vec<MissingRecord> = Vec::with_capacity(missing_values.len());
    let mut missing_index: HashMap<String, usize> = HashMap::new();
    for record in missing_values {
        let key = hash_key(&record.app_hash);
        if let Some(&idx) = missing_index.get(&key) {
            let kept = &mut missing[idx];
            kept.attempts = kept.attempts.max(record.attempts);
            kept.first_seen_block = kept.first_seen_block.min(record.first_seen_block);
            stats.duplicates += 1;
            continue;
        }
        missing_index.insert(key, missing.len());
        missing.push(record);
    }

    let mut rows: Vec<AppHashRow> = Vec::with_capacity(new_rows.len());
    let mut row_index: HashMap<String, usize> = HashMap::new();
    for row in new_rows {
        let key = hash_key(&row.app_hash);
        if let Some(&idx) = missing_index.get(&key) {
            let kept = &mut missing[idx];
            kept.first_seen_block = kept.first_seen_block.min(row.first_seen_block);
            stats.duplicates += 1;
            continue;
        }
        if let Some(&idx) = row_index.get(&key) {
            let kept = &mut rows[idx];
            kept.first_seen_block = kept.first_seen_block.min(row.first_seen_block);
            stats.duplicates += 1;
            continue;
        }
        row_index.insert(key, rows.len());
        rows.push(row);
    }

    (rows, missing)
}
