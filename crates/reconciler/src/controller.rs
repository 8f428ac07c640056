//! Batch driver: validates records and reconciles identities in parallel.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::stream::{self, StreamExt};
use iamsync_directory::{AccountScope, DirectoryClient, DirectoryResult, ErrorClass};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span, warn};

use crate::cancel::{CancelSignal, StopCondition};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::inspector::StateInspector;
use crate::reconciler::{Convergence, DirectoryCommand, Reconciler, Step, StepFailure};
use crate::report::{IdentityReport, Outcome, RunReport, SkipReason};
use crate::types::{DesiredStateRecord, Intent, LifecycleAction, ValidatedRecord};

/// Records of one username, in input order, with their input positions.
type Lane = Vec<(usize, ValidatedRecord)>;

/// Configuration for the lifecycle controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum identities reconciled at once.
    pub concurrency: usize,
    /// Stop dispatching new identities after this long.
    pub deadline: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            deadline: None,
        }
    }
}

impl ControllerConfig {
    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `concurrency` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::invalid_config("concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// Runs desired-state batches against one directory.
pub struct LifecycleController {
    inspector: StateInspector,
    reconciler: Reconciler,
    config: ControllerConfig,
    clock: Arc<dyn Clock>,
}

impl LifecycleController {
    /// Validate the configuration and fetch the account scope once.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the account scope
    /// cannot be fetched.
    pub async fn connect(
        client: Arc<dyn DirectoryClient>,
        config: ControllerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let scope = AccountScope::new(
            client
                .account_scope_id()
                .await
                .map_err(Error::account_scope)?,
        );
        info!(
            account = scope.id(),
            concurrency = config.concurrency,
            "Lifecycle controller ready"
        );
        Ok(Self {
            inspector: StateInspector::new(Arc::clone(&client)),
            reconciler: Reconciler::new(client, scope),
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used for tags and report timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.reconciler = self.reconciler.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// Account scope cached for this controller's runs.
    #[must_use]
    pub const fn scope(&self) -> &AccountScope {
        self.reconciler.scope()
    }

    /// Reconcile every record.
    pub async fn run(&self, records: Vec<DesiredStateRecord>) -> RunReport {
        self.run_until(records, CancelSignal::never()).await
    }

    /// Reconcile records until done or cancelled.
    ///
    /// Cancellation (or the configured deadline) stops dispatch; identities
    /// already running finish and the rest are reported as cancelled.
    pub async fn run_until(
        &self,
        records: Vec<DesiredStateRecord>,
        cancel: CancelSignal,
    ) -> RunReport {
        let started_at = self.clock.now();
        let stop = StopCondition::new(cancel, self.config.deadline);
        let total = records.len();
        info!(records = total, "Starting lifecycle run");

        let mut slots: Vec<Option<IdentityReport>> = vec![None; total];
        let mut usernames = Vec::with_capacity(total);
        let mut lanes: Vec<Lane> = Vec::new();
        let mut lane_of: HashMap<String, usize> = HashMap::new();

        for (index, record) in records.into_iter().enumerate() {
            usernames.push(record.username.trim().to_string());
            match record.validate() {
                Ok(valid) => match lane_of.get(&valid.username) {
                    Some(&lane) => lanes[lane].push((index, valid)),
                    None => {
                        lane_of.insert(valid.username.clone(), lanes.len());
                        lanes.push(vec![(index, valid)]);
                    }
                },
                Err(skip) => {
                    warn!(index, username = %record.username, reason = %skip, "Skipping record");
                    slots[index] = Some(IdentityReport::skipped(
                        index,
                        record.username.trim(),
                        Some(record.action),
                        skip,
                    ));
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut workers = JoinSet::new();
        let mut pending = lanes.into_iter();

        while let Some(lane) = pending.next() {
            let permit = tokio::select! {
                biased;
                () = stop.stopped() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit.filter(|_| !stop.is_stopped()) else {
                info!("Dispatch stopped, remaining identities skipped");
                for (index, record) in lane.into_iter().chain(pending.by_ref().flatten()) {
                    slots[index] = Some(cancelled(index, record));
                }
                break;
            };

            let worker = Worker {
                inspector: self.inspector.clone(),
                reconciler: self.reconciler.clone(),
                stop: stop.clone(),
            };
            workers.spawn(async move {
                let _permit = permit;
                worker.run_lane(lane).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(reports) => {
                    for report in reports {
                        let index = report.index;
                        slots[index] = Some(report);
                    }
                }
                Err(e) => error!(error = %e, "Worker task aborted"),
            }
        }

        let entries = slots
            .into_iter()
            .zip(usernames)
            .enumerate()
            .map(|(index, (slot, username))| {
                slot.unwrap_or_else(|| IdentityReport {
                    index,
                    username,
                    action: None,
                    outcome: Outcome::Failed {
                        failure: internal_failure("worker task aborted".to_string()),
                    },
                    applied: Vec::new(),
                })
            })
            .collect();

        let report = RunReport::new(started_at, self.clock.now(), entries);
        info!(
            succeeded = report.totals.succeeded,
            skipped = report.totals.skipped(),
            degraded = report.totals.degraded,
            failed = report.totals.failed,
            "Lifecycle run finished"
        );
        report
    }

    /// Inspect every record's identity and compute the commands a run would
    /// issue, without changing the directory.
    ///
    /// Each record is planned against the directory as it is now, so a later
    /// record for the same username does not see the effect of an earlier one.
    pub async fn plan(&self, records: &[DesiredStateRecord]) -> Vec<PlanEntry> {
        stream::iter(records.iter().enumerate())
            .map(|(index, record)| self.plan_one(index, record))
            .buffered(self.config.concurrency)
            .collect()
            .await
    }

    async fn plan_one(&self, index: usize, record: &DesiredStateRecord) -> PlanEntry {
        let change = match record.validate() {
            Err(skip) => PlannedChange::Skipped { skip },
            Ok(valid) => match self.inspector.inspect(&valid.username).await {
                Err(e) => PlannedChange::Unavailable {
                    cause: e.to_string(),
                },
                Ok(observation)
                    if matches!(valid.intent, Intent::Leave) && !observation.is_present() =>
                {
                    PlannedChange::Skipped {
                        skip: SkipReason::AlreadyAbsent,
                    }
                }
                Ok(observation) => PlannedChange::Commands {
                    commands: self.reconciler.plan(&valid, &observation),
                },
            },
        };
        PlanEntry {
            index,
            username: record.username.trim().to_string(),
            action: record.action,
            change,
        }
    }
}

/// Everything a spawned lane needs.
struct Worker {
    inspector: StateInspector,
    reconciler: Reconciler,
    stop: StopCondition,
}

impl Worker {
    async fn run_lane(self, lane: Lane) -> Vec<IdentityReport> {
        let mut reports = Vec::with_capacity(lane.len());
        for (position, (index, record)) in lane.into_iter().enumerate() {
            if position > 0 && self.stop.is_stopped() {
                reports.push(cancelled(index, record));
                continue;
            }
            let span = info_span!("identity", username = %record.username, action = %record.action);
            reports.push(self.process(index, record).instrument(span).await);
        }
        reports
    }

    async fn process(&self, index: usize, record: ValidatedRecord) -> IdentityReport {
        let attempt = AssertUnwindSafe(self.converge(&record)).catch_unwind().await;
        let (outcome, applied) = match attempt {
            Ok(Ok(convergence)) => (Outcome::from(&convergence), convergence.applied),
            Ok(Err(e)) => (
                Outcome::Failed {
                    failure: StepFailure::new(Step::Inspect, &e),
                },
                Vec::new(),
            ),
            Err(panic) => {
                let cause = panic_message(panic.as_ref());
                error!(cause = %cause, "Identity pipeline panicked");
                (
                    Outcome::Failed {
                        failure: internal_failure(format!("pipeline panicked: {cause}")),
                    },
                    Vec::new(),
                )
            }
        };

        if outcome.is_problem() {
            warn!(outcome = %outcome.tag(), "Identity processed");
        } else {
            info!(outcome = %outcome.tag(), "Identity processed");
        }

        IdentityReport {
            index,
            username: record.username,
            action: Some(record.action),
            outcome,
            applied,
        }
    }

    async fn converge(&self, record: &ValidatedRecord) -> DirectoryResult<Convergence> {
        let observation = self.inspector.inspect(&record.username).await?;
        Ok(self.reconciler.reconcile(record, &observation).await)
    }
}

fn cancelled(index: usize, record: ValidatedRecord) -> IdentityReport {
    IdentityReport::skipped(
        index,
        record.username,
        Some(record.action),
        SkipReason::Cancelled,
    )
}

fn internal_failure(cause: String) -> StepFailure {
    StepFailure {
        step: Step::Internal,
        class: ErrorClass::Fatal,
        cause,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// What a run would do for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlannedChange {
    Commands { commands: Vec<DirectoryCommand> },
    Skipped { skip: SkipReason },
    /// The identity could not be inspected.
    Unavailable { cause: String },
}

/// Planned change for one input record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub index: usize,
    pub username: String,
    pub action: LifecycleAction,
    pub change: PlannedChange,
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.change {
            PlannedChange::Commands { commands } if commands.is_empty() => {
                writeln!(f, "{} ({}): no changes", self.username, self.action)
            }
            PlannedChange::Commands { commands } => {
                writeln!(f, "{} ({}):", self.username, self.action)?;
                for command in commands {
                    match command {
                        // The group is created at apply time when it is missing.
                        DirectoryCommand::AddToGroup { .. } => {
                            writeln!(f, "  - {command} (creates the group if missing)")?;
                        }
                        _ => writeln!(f, "  - {command}")?,
                    }
                }
                Ok(())
            }
            PlannedChange::Skipped { skip } => {
                writeln!(f, "{} ({}): skipped, {skip}", self.username, self.action)
            }
            PlannedChange::Unavailable { cause } => {
                writeln!(f, "{} ({}): cannot inspect, {cause}", self.username, self.action)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamsync_directory::{DirectoryError, DirectoryState, InMemoryDirectory, Operation};

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = ControllerConfig {
            concurrency: 0,
            deadline: None,
        };
        assert!(config.validate().is_err());
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }

    #[tokio::test]
    async fn test_connect_fails_without_account_scope() {
        let memory = Arc::new(InMemoryDirectory::new(DirectoryState::new("123456789012")));
        memory
            .inject_fault(
                Operation::AccountScopeId,
                None,
                DirectoryError::permission_denied(Operation::AccountScopeId, "denied"),
                1,
            )
            .await;

        let result = LifecycleController::connect(memory, ControllerConfig::default()).await;

        assert!(matches!(result, Err(Error::AccountScope { .. })));
    }

    #[test]
    fn test_plan_output_flags_group_creation() {
        let entry = PlanEntry {
            index: 0,
            username: "alice".to_string(),
            action: LifecycleAction::Provision,
            change: PlannedChange::Commands {
                commands: vec![
                    DirectoryCommand::CreateUser,
                    DirectoryCommand::AddToGroup {
                        group: "newgroup".to_string(),
                    },
                ],
            },
        };

        let rendered = entry.to_string();

        assert!(rendered.contains("  - create user\n"));
        assert!(rendered.contains("  - add to group newgroup (creates the group if missing)\n"));
    }

    #[tokio::test]
    async fn test_invalid_records_are_skipped_in_order()
    -> std::result::Result<(), Box<dyn std::error::Error>> {
        let memory = Arc::new(InMemoryDirectory::new(DirectoryState::new("123456789012")));
        let controller = LifecycleController::connect(memory, ControllerConfig::default()).await?;

        let report = controller
            .run(vec![
                DesiredStateRecord::provision("alice", "", "EngReadOnly", "Engineering"),
                DesiredStateRecord::leaver("ghost"),
            ])
            .await;

        assert_eq!(report.entries[0].outcome.tag(), "skipped:invalid");
        assert_eq!(report.entries[1].outcome.tag(), "skipped:already-absent");
        assert_eq!(report.totals.skipped(), 2);
        Ok(())
    }
}
