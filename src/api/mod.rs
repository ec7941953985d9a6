//! Purpose: Remote collaborators of the sync: analytics API and IPFS gateway.
//! Exports: Clients, query definitions and their result/state types.
//! Role: Only place that speaks HTTP; core modules stay transport-free.
//! Invariants: Clients are blocking and sequential; one request in flight at a time.

mod dune;
mod ipfs;
pub mod queries;

pub use dune::{
    AnalyticsClient, DEFAULT_BASE_URL, ExecutionResult, ExecutionState, ExecutionStatus,
    PollOptions,
};
pub use ipfs::GatewayClient;
pub use queries::{Query, QueryParameter};
