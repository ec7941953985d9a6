//! Purpose: Library crate behind the `dune-sync` binary and its tests.
//! Exports: `core` (records, retry, reconciliation, file state), `api` (remote clients), `sync` (jobs).
//! Role: Keeps all behavior testable without the CLI.
//! Invariants: Core modules take their collaborators as explicit inputs.
//! Invariants: Only `api` performs network I/O.
pub mod api;
pub mod core;
pub mod sync;
