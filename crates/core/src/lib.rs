//! Shared error and result types for iamsync.
//!
//! Library crates that talk to the directory carry their own error taxonomy;
//! this crate covers everything around the engine: reading files, parsing
//! desired-state input, configuration and directory snapshots.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod result;

pub use error::Error;
pub use result::{Result, ResultExt};
