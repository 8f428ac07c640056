#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # iamsync
//!
//! Identity lifecycle reconciliation: provision, move and deprovision
//! directory identities idempotently from CSV desired-state sheets.
//!
//! This library holds the pieces the `iamsync` binary wires together around
//! the engine in `iamsync-reconciler`: configuration, the CSV loader and
//! directory snapshot files.

pub mod config;
pub mod loader;
pub mod snapshot;

pub use config::SyncConfig;
pub use loader::{LoadedBatch, LoaderKind, RejectedRow};
