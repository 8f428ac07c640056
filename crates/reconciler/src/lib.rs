//! Identity lifecycle reconciliation.
//!
//! Brings the groups, policies, credentials and tags of named identities in
//! line with a declared desired state:
//!
//! - **Inspect**: read the identity's current state from the directory
//! - **Reconcile**: drive it through the provision/move or leave path
//! - **Control**: run a batch on a bounded worker pool and report per identity
//!
//! # Paths
//!
//! - `provision` / `move`: ensure the identity exists, replace its group and
//!   policy, then tag it with `Department` and `LastUpdated`
//! - `leave`: strip groups and policies, revoke credentials, delete the identity
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use iamsync_directory::{DirectoryState, InMemoryDirectory};
//! use iamsync_reconciler::{ControllerConfig, DesiredStateRecord, LifecycleController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = Arc::new(InMemoryDirectory::new(
//!         DirectoryState::new("123456789012")
//!             .with_group("eng")
//!             .with_policy_named("EngReadOnly"),
//!     ));
//!     let controller =
//!         LifecycleController::connect(directory, ControllerConfig::default()).await?;
//!
//!     let report = controller
//!         .run(vec![DesiredStateRecord::provision("alice", "eng", "EngReadOnly", "Engineering")])
//!         .await;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cancel;
pub mod clock;
pub mod controller;
pub mod error;
pub mod inspector;
pub mod reconciler;
pub mod report;
pub mod types;

// Re-export main types
pub use cancel::{CancelHandle, CancelSignal, cancellation};
pub use clock::{Clock, FixedClock, SystemClock};
pub use controller::{ControllerConfig, LifecycleController, PlanEntry, PlannedChange};
pub use error::{Error, Result};
pub use inspector::StateInspector;
pub use reconciler::{
    Convergence, ConvergenceStatus, DEPARTMENT_TAG, DirectoryCommand, LAST_UPDATED_TAG, Phase,
    Reconciler, Step, StepFailure,
};
pub use report::{IdentityReport, Outcome, RunReport, RunTotals, SkipReason};
pub use types::{
    CurrentState, DesiredStateRecord, Intent, LifecycleAction, Observation, TargetRole,
    UnknownAction, ValidatedRecord,
};
