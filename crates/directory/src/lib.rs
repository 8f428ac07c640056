//! Identity directory client interface.
//!
//! The reconciliation engine never talks to a provider SDK directly. It
//! drives a [`DirectoryClient`], an explicitly constructed and injected
//! handle to one directory account. This crate provides:
//!
//! - **`DirectoryClient`**: the async CRUD surface for identities, groups,
//!   policy attachments, tags and credentials
//! - **`DirectoryError`**: the response taxonomy (not found, already exists,
//!   throttled, transient, permission denied, failed) with a coarse
//!   [`ErrorClass`] the engine branches on
//! - **`RetryingDirectory`**: a decorator that retries throttled and transient
//!   calls with bounded exponential backoff and jitter
//! - **`InMemoryDirectory`**: an IAM-like directory held in memory, with fault
//!   injection, used by tests and by the CLI's snapshot mode
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use iamsync_directory::{
//!     DirectoryClient, DirectoryState, InMemoryDirectory, RetryPolicy, RetryingDirectory,
//! };
//!
//! let memory = Arc::new(InMemoryDirectory::new(DirectoryState::new("123456789012")));
//! let client: Arc<dyn DirectoryClient> =
//!     Arc::new(RetryingDirectory::new(memory.clone(), RetryPolicy::default()));
//! assert!(!client.user_exists("alice").await?);
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod client;
pub mod error;
pub mod memory;
pub mod retry;
pub mod types;

pub use client::{DirectoryClient, Operation};
pub use error::{DirectoryError, DirectoryResult, DirectoryResultExt, EntityKind, ErrorClass};
pub use memory::{DirectoryState, InMemoryDirectory, UserEntry};
pub use retry::{RetryPolicy, RetryState, RetryingDirectory};
pub use types::{AccountScope, PolicyRef, Tags};
