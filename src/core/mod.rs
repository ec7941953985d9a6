// Core modules: record model, retry policy, reconciliation and file-backed state.
pub mod block_range;
pub mod cid;
pub mod content;
pub mod error;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod store;
