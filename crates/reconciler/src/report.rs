//! Per-run outcome ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reconciler::{Convergence, ConvergenceStatus, DirectoryCommand, StepFailure};
use crate::types::LifecycleAction;

/// Why a record was not reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The record is malformed.
    Invalid { detail: String },
    /// Leave on an identity that does not exist.
    AlreadyAbsent,
    /// The run was cancelled before the record was dispatched.
    Cancelled,
}

impl SkipReason {
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::Invalid {
            detail: detail.into(),
        }
    }

    /// Short tag used in the outcome label.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "invalid",
            Self::AlreadyAbsent => "already-absent",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { detail } => write!(f, "invalid record: {detail}"),
            Self::AlreadyAbsent => write!(f, "identity already absent"),
            Self::Cancelled => write!(f, "run cancelled before dispatch"),
        }
    }
}

/// Final outcome of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Skipped { skip: SkipReason },
    Degraded { failure: StepFailure },
    Failed { failure: StepFailure },
}

impl Outcome {
    /// Outcome label: `succeeded`, `skipped:<reason>`, `degraded:<step>` or
    /// `failed:<step>,<class>`.
    ///
    /// The full cause text is kept in the failure itself.
    #[must_use]
    pub fn tag(&self) -> String {
        match self {
            Self::Succeeded => "succeeded".to_string(),
            Self::Skipped { skip } => format!("skipped:{}", skip.tag()),
            Self::Degraded { failure } => format!("degraded:{}", failure.step),
            Self::Failed { failure } => format!("failed:{},{}", failure.step, failure.class),
        }
    }

    /// Whether the record needs attention.
    #[must_use]
    pub const fn is_problem(&self) -> bool {
        matches!(self, Self::Degraded { .. } | Self::Failed { .. })
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::Succeeded => None,
            Self::Skipped { skip } => Some(skip.to_string()),
            Self::Degraded { failure } | Self::Failed { failure } => Some(failure.cause.clone()),
        }
    }
}

impl From<&Convergence> for Outcome {
    fn from(convergence: &Convergence) -> Self {
        match &convergence.status {
            ConvergenceStatus::Converged => Self::Succeeded,
            ConvergenceStatus::NothingToDo => Self::Skipped {
                skip: SkipReason::AlreadyAbsent,
            },
            ConvergenceStatus::Degraded(failure) => Self::Degraded {
                failure: failure.clone(),
            },
            ConvergenceStatus::Failed(failure) => Self::Failed {
                failure: failure.clone(),
            },
        }
    }
}

/// Outcome of one input record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityReport {
    /// Position in the input.
    pub index: usize,
    pub username: String,
    pub action: Option<LifecycleAction>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied: Vec<DirectoryCommand>,
}

impl IdentityReport {
    pub fn skipped(
        index: usize,
        username: impl Into<String>,
        action: Option<LifecycleAction>,
        skip: SkipReason,
    ) -> Self {
        Self {
            index,
            username: username.into(),
            action,
            outcome: Outcome::Skipped { skip },
            applied: Vec::new(),
        }
    }
}

/// Run-level counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub succeeded: usize,
    pub skipped_invalid: usize,
    pub skipped_absent: usize,
    pub skipped_cancelled: usize,
    pub degraded: usize,
    pub failed: usize,
}

impl RunTotals {
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped_invalid + self.skipped_absent + self.skipped_cancelled
    }

    fn count(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Skipped { skip } => match skip {
                SkipReason::Invalid { .. } => self.skipped_invalid += 1,
                SkipReason::AlreadyAbsent => self.skipped_absent += 1,
                SkipReason::Cancelled => self.skipped_cancelled += 1,
            },
            Outcome::Degraded { .. } => self.degraded += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Result ledger of one controller run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: RunTotals,
    /// Entries in input order.
    pub entries: Vec<IdentityReport>,
}

impl RunReport {
    /// Build a report, sorting entries into input order.
    #[must_use]
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        mut entries: Vec<IdentityReport>,
    ) -> Self {
        entries.sort_by_key(|entry| entry.index);
        let mut totals = RunTotals::default();
        for entry in &entries {
            totals.count(&entry.outcome);
        }
        Self {
            started_at,
            finished_at,
            totals,
            entries,
        }
    }

    /// Merge rows a loader rejected before they became records.
    ///
    /// They are reported first as `skipped:invalid`.
    pub fn absorb_rejected<I>(&mut self, rejected: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let rejected: Vec<IdentityReport> = rejected
            .into_iter()
            .map(|(label, detail)| {
                IdentityReport::skipped(0, label, None, SkipReason::invalid(detail))
            })
            .collect();
        for entry in &rejected {
            self.totals.count(&entry.outcome);
        }
        let offset = rejected.len();
        for entry in &mut self.entries {
            entry.index += offset;
        }
        let mut merged = rejected;
        for (index, entry) in merged.iter_mut().enumerate() {
            entry.index = index;
        }
        merged.append(&mut self.entries);
        self.entries = merged;
    }

    /// Whether any identity failed or was left degraded.
    #[must_use]
    pub const fn has_problems(&self) -> bool {
        self.totals.degraded > 0 || self.totals.failed > 0
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let totals = &self.totals;
        writeln!(
            f,
            "{} succeeded, {} skipped, {} degraded, {} failed",
            totals.succeeded,
            totals.skipped(),
            totals.degraded,
            totals.failed
        )?;
        let width = self
            .entries
            .iter()
            .map(|entry| entry.username.len())
            .max()
            .unwrap_or(0);
        for entry in &self.entries {
            match entry.outcome.detail() {
                Some(detail) => writeln!(
                    f,
                    "  {:<width$}  {}  ({detail})",
                    entry.username,
                    entry.outcome.tag()
                )?,
                None => writeln!(f, "  {:<width$}  {}", entry.username, entry.outcome.tag())?,
            }
        }
        Ok(())
    }
}
