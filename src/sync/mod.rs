//! Purpose: Sync jobs built on the core state machine and the remote clients.
//! Exports: `sync_app_data`, `DuneFetcher`, `store_query_result` and their configs/reports.
//! Role: Glue between `api` (remote) and `core` (pure logic + files).
//! Invariants: Jobs are one-shot; repetition belongs to an external scheduler.

pub mod app_data;
pub mod config;
pub mod dune_source;
pub mod snapshot;

pub use app_data::{AppHashSource, SyncReport, sync_app_data};
pub use config::AppDataSyncConfig;
pub use dune_source::DuneFetcher;
pub use snapshot::{SnapshotFormat, SnapshotReport, store_query_result};
