//! Reconciler implementation.
//!
//! One identity is driven through a fixed path of idempotent steps:
//!
//! ```text
//! provision/move: Start -> Ensured -> GroupsCleared -> GroupsTarget
//!                 -> PoliciesCleared -> PoliciesTarget -> Tagged -> Done
//! leave:          Start -> AccessStripped -> CredentialsRevoked -> Deleted -> Done
//! ```
//!
//! Memberships and attachments are cleared before the target is applied, so
//! the end state does not depend on what the identity held before.

use std::fmt;
use std::sync::Arc;

use iamsync_directory::{
    AccountScope, DirectoryClient, DirectoryError, DirectoryResult, DirectoryResultExt,
    EntityKind, ErrorClass, PolicyRef, Tags,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::types::{CurrentState, Intent, Observation, TargetRole, ValidatedRecord};

/// Mandatory department tag key.
pub const DEPARTMENT_TAG: &str = "Department";

/// Timestamp tag key, refreshed on every convergence.
pub const LAST_UPDATED_TAG: &str = "LastUpdated";

/// One transition of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Reading the identity's current state (controller only).
    Inspect,
    /// Failure outside any directory call, such as a panic in the pipeline.
    Internal,
    EnsureExists,
    ClearGroups,
    ApplyTargetGroup,
    ClearPolicies,
    ApplyTargetPolicy,
    ApplyTags,
    StripAccess,
    RevokeCredentials,
    DeleteIdentity,
}

impl Step {
    /// Provision and move path.
    pub const CONVERGE_PATH: [Self; 6] = [
        Self::EnsureExists,
        Self::ClearGroups,
        Self::ApplyTargetGroup,
        Self::ClearPolicies,
        Self::ApplyTargetPolicy,
        Self::ApplyTags,
    ];

    /// Leave path.
    pub const LEAVE_PATH: [Self; 3] = [
        Self::StripAccess,
        Self::RevokeCredentials,
        Self::DeleteIdentity,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::Internal => "internal",
            Self::EnsureExists => "ensureExists",
            Self::ClearGroups => "clearGroups",
            Self::ApplyTargetGroup => "applyTargetGroup",
            Self::ClearPolicies => "clearPolicies",
            Self::ApplyTargetPolicy => "applyTargetPolicy",
            Self::ApplyTags => "applyTags",
            Self::StripAccess => "stripAccess",
            Self::RevokeCredentials => "revokeCredentials",
            Self::DeleteIdentity => "deleteIdentity",
        }
    }

    /// Phase reached once this step completes.
    #[must_use]
    pub const fn reaches(self) -> Phase {
        match self {
            Self::Inspect | Self::Internal => Phase::Start,
            Self::EnsureExists => Phase::Ensured,
            Self::ClearGroups => Phase::GroupsCleared,
            Self::ApplyTargetGroup => Phase::GroupsTarget,
            Self::ClearPolicies => Phase::PoliciesCleared,
            Self::ApplyTargetPolicy => Phase::PoliciesTarget,
            Self::ApplyTags => Phase::Tagged,
            Self::StripAccess => Phase::AccessStripped,
            Self::RevokeCredentials => Phase::CredentialsRevoked,
            Self::DeleteIdentity => Phase::Deleted,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one identity pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Ensured,
    GroupsCleared,
    GroupsTarget,
    PoliciesCleared,
    PoliciesTarget,
    Tagged,
    AccessStripped,
    CredentialsRevoked,
    Deleted,
    Done,
}

/// One mutating directory call issued for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DirectoryCommand {
    CreateUser,
    RemoveFromGroup { group: String },
    CreateGroup { group: String },
    AddToGroup { group: String },
    DetachPolicy { policy: PolicyRef },
    AttachPolicy { policy: PolicyRef },
    SetTags { tags: Tags },
    DeleteLoginProfile,
    DeleteAccessKey { key_id: String },
    DeleteUser,
}

impl fmt::Display for DirectoryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateUser => write!(f, "create user"),
            Self::RemoveFromGroup { group } => write!(f, "remove from group {group}"),
            Self::CreateGroup { group } => write!(f, "create group {group}"),
            Self::AddToGroup { group } => write!(f, "add to group {group}"),
            Self::DetachPolicy { policy } => write!(f, "detach policy {policy}"),
            Self::AttachPolicy { policy } => write!(f, "attach policy {policy}"),
            Self::SetTags { tags } => write!(
                f,
                "set tags {}",
                tags.iter().map(|(k, v)| format!("{k}={v}")).join(", ")
            ),
            Self::DeleteLoginProfile => write!(f, "delete login profile"),
            Self::DeleteAccessKey { key_id } => write!(f, "delete access key {key_id}"),
            Self::DeleteUser => write!(f, "delete user"),
        }
    }
}

/// Why a step did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: Step,
    pub class: ErrorClass,
    pub cause: String,
}

impl StepFailure {
    pub fn new(step: Step, error: &DirectoryError) -> Self {
        Self {
            step,
            class: error.class(),
            cause: error.to_string(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.step, self.cause)
    }
}

/// How far an identity got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "failure", rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// Every step completed.
    Converged,
    /// Leave on an identity that does not exist.
    NothingToDo,
    /// A step failed after this pipeline had already changed the directory.
    Degraded(StepFailure),
    /// A step failed before this pipeline changed anything.
    Failed(StepFailure),
}

/// Result of reconciling one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Convergence {
    pub status: ConvergenceStatus,
    /// Last phase completed.
    pub reached: Phase,
    /// Commands that changed the directory, in order.
    pub applied: Vec<DirectoryCommand>,
}

/// The identity reconciliation state machine.
///
/// Holds no per-identity state; every call is a function of the observation,
/// the record, the cached account scope and the clock.
#[derive(Clone)]
pub struct Reconciler {
    client: Arc<dyn DirectoryClient>,
    scope: AccountScope,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    /// Create a reconciler using the wall clock.
    pub fn new(client: Arc<dyn DirectoryClient>, scope: AccountScope) -> Self {
        Self {
            client,
            scope,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for the timestamp tag.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Account scope used to qualify policy names.
    #[must_use]
    pub const fn scope(&self) -> &AccountScope {
        &self.scope
    }

    /// Commands the state machine would issue, without calling the directory.
    #[must_use]
    pub fn plan(
        &self,
        record: &ValidatedRecord,
        observation: &Observation,
    ) -> Vec<DirectoryCommand> {
        path(&record.intent, observation)
            .iter()
            .flat_map(|step| self.commands_for(*step, &record.intent, observation.current()))
            .collect()
    }

    /// Drive one identity to its target state.
    ///
    /// Never returns an error: failures are reported in the [`Convergence`].
    pub async fn reconcile(
        &self,
        record: &ValidatedRecord,
        observation: &Observation,
    ) -> Convergence {
        let username = record.username.as_str();
        if matches!(record.intent, Intent::Leave) && !observation.is_present() {
            info!(username, "Identity already absent, nothing to do");
            return Convergence {
                status: ConvergenceStatus::NothingToDo,
                reached: Phase::Done,
                applied: Vec::new(),
            };
        }

        let mut pipeline = Pipeline::new(self.client.as_ref(), username);
        let mut reached = Phase::Start;

        for step in path(&record.intent, observation) {
            debug!(username, step = %step, "Running step");
            if let Err(error) = self.run_step(*step, record, observation, &mut pipeline).await {
                let failure = StepFailure::new(*step, &error);
                // A leaver that reached deletion has already lost all access.
                let partial = !pipeline.applied.is_empty() || *step == Step::DeleteIdentity;
                let status = if partial {
                    warn!(
                        username,
                        step = %step,
                        applied = pipeline.applied.len(),
                        error = %error,
                        "Step failed, identity left partially converged"
                    );
                    ConvergenceStatus::Degraded(failure)
                } else {
                    warn!(
                        username,
                        step = %step,
                        error = %error,
                        "Step failed, directory unchanged"
                    );
                    ConvergenceStatus::Failed(failure)
                };
                return Convergence {
                    status,
                    reached,
                    applied: pipeline.applied,
                };
            }
            reached = step.reaches();
        }

        info!(
            username,
            action = %record.action,
            applied = pipeline.applied.len(),
            "Identity converged"
        );
        Convergence {
            status: ConvergenceStatus::Converged,
            reached: Phase::Done,
            applied: pipeline.applied,
        }
    }

    async fn run_step(
        &self,
        step: Step,
        record: &ValidatedRecord,
        observation: &Observation,
        pipeline: &mut Pipeline<'_>,
    ) -> DirectoryResult<()> {
        if let (Step::ApplyTargetGroup, Intent::Converge(role)) = (step, &record.intent) {
            return apply_target_group(pipeline, &role.group).await;
        }
        for command in self.commands_for(step, &record.intent, observation.current()) {
            pipeline.run(command).await?;
        }
        Ok(())
    }

    fn commands_for(
        &self,
        step: Step,
        intent: &Intent,
        current: Option<&CurrentState>,
    ) -> Vec<DirectoryCommand> {
        let role = match intent {
            Intent::Converge(role) => Some(role),
            Intent::Leave => None,
        };
        match step {
            Step::Inspect | Step::Internal => Vec::new(),
            Step::EnsureExists => {
                if current.is_some() {
                    Vec::new()
                } else {
                    vec![DirectoryCommand::CreateUser]
                }
            }
            Step::ClearGroups => clear_groups(current),
            Step::ClearPolicies => clear_policies(current),
            Step::ApplyTargetGroup => role
                .map(|role| DirectoryCommand::AddToGroup {
                    group: role.group.clone(),
                })
                .into_iter()
                .collect(),
            Step::ApplyTargetPolicy => role
                .map(|role| DirectoryCommand::AttachPolicy {
                    policy: self.scope.qualify(&role.policy),
                })
                .into_iter()
                .collect(),
            Step::ApplyTags => role
                .map(|role| DirectoryCommand::SetTags {
                    tags: self.tags_for(role),
                })
                .into_iter()
                .collect(),
            Step::StripAccess => clear_policies(current)
                .into_iter()
                .chain(clear_groups(current))
                .collect(),
            Step::RevokeCredentials => current
                .map(|state| {
                    state
                        .login_profile
                        .then_some(DirectoryCommand::DeleteLoginProfile)
                        .into_iter()
                        .chain(state.access_keys.iter().map(|key_id| {
                            DirectoryCommand::DeleteAccessKey {
                                key_id: key_id.clone(),
                            }
                        }))
                        .collect()
                })
                .unwrap_or_default(),
            Step::DeleteIdentity => vec![DirectoryCommand::DeleteUser],
        }
    }

    fn tags_for(&self, role: &TargetRole) -> Tags {
        let mut tags = role.attributes.clone();
        tags.insert(DEPARTMENT_TAG.to_string(), role.department.clone());
        tags.insert(LAST_UPDATED_TAG.to_string(), self.clock.timestamp());
        tags
    }
}

fn path(intent: &Intent, observation: &Observation) -> &'static [Step] {
    match (intent, observation) {
        (Intent::Converge(_), _) => &Step::CONVERGE_PATH,
        (Intent::Leave, Observation::Present(_)) => &Step::LEAVE_PATH,
        (Intent::Leave, Observation::Absent) => &[],
    }
}

fn clear_groups(current: Option<&CurrentState>) -> Vec<DirectoryCommand> {
    current
        .map(|state| {
            state
                .groups
                .iter()
                .map(|group| DirectoryCommand::RemoveFromGroup {
                    group: group.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn clear_policies(current: Option<&CurrentState>) -> Vec<DirectoryCommand> {
    current
        .map(|state| {
            state
                .policies
                .iter()
                .map(|policy| DirectoryCommand::DetachPolicy {
                    policy: policy.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Add to the target group, creating the group once if it is missing.
async fn apply_target_group(pipeline: &mut Pipeline<'_>, group: &str) -> DirectoryResult<()> {
    let add = DirectoryCommand::AddToGroup {
        group: group.to_string(),
    };
    match pipeline.run(add.clone()).await {
        Err(e) if e.is_missing(EntityKind::Group) => {
            info!(username = pipeline.username, group, "Target group missing, creating it");
            pipeline
                .run(DirectoryCommand::CreateGroup {
                    group: group.to_string(),
                })
                .await?;
            pipeline.run(add).await
        }
        other => other,
    }
}

/// Issues commands for one identity and keeps the ledger of applied ones.
struct Pipeline<'a> {
    client: &'a dyn DirectoryClient,
    username: &'a str,
    applied: Vec<DirectoryCommand>,
}

impl<'a> Pipeline<'a> {
    fn new(client: &'a dyn DirectoryClient, username: &'a str) -> Self {
        Self {
            client,
            username,
            applied: Vec::new(),
        }
    }

    /// Issue a command, treating the responses that already satisfy it as
    /// no-ops.
    async fn run(&mut self, command: DirectoryCommand) -> DirectoryResult<()> {
        let response = self.send(&command).await;
        let outcome = match command {
            DirectoryCommand::CreateUser | DirectoryCommand::CreateGroup { .. } => {
                response.conflict_as_none()?
            }
            DirectoryCommand::RemoveFromGroup { .. }
            | DirectoryCommand::DetachPolicy { .. }
            | DirectoryCommand::DeleteLoginProfile
            | DirectoryCommand::DeleteAccessKey { .. }
            | DirectoryCommand::DeleteUser => response.not_found_as_none()?,
            DirectoryCommand::AddToGroup { .. }
            | DirectoryCommand::AttachPolicy { .. }
            | DirectoryCommand::SetTags { .. } => Some(response?),
        };

        if outcome.is_some() {
            debug!(username = self.username, command = %command, "Applied");
            self.applied.push(command);
        } else {
            debug!(username = self.username, command = %command, "Already satisfied");
        }
        Ok(())
    }

    async fn send(&self, command: &DirectoryCommand) -> DirectoryResult<()> {
        let client = self.client;
        let username = self.username;
        match command {
            DirectoryCommand::CreateUser => client.create_user(username).await,
            DirectoryCommand::RemoveFromGroup { group } => {
                client.remove_from_group(username, group).await
            }
            DirectoryCommand::CreateGroup { group } => client.create_group(group).await,
            DirectoryCommand::AddToGroup { group } => client.add_to_group(username, group).await,
            DirectoryCommand::DetachPolicy { policy } => {
                client.detach_policy(username, policy).await
            }
            DirectoryCommand::AttachPolicy { policy } => {
                client.attach_policy(username, policy).await
            }
            DirectoryCommand::SetTags { tags } => client.set_tags(username, tags).await,
            DirectoryCommand::DeleteLoginProfile => client.delete_login_profile(username).await,
            DirectoryCommand::DeleteAccessKey { key_id } => {
                client.delete_access_key(username, key_id).await
            }
            DirectoryCommand::DeleteUser => client.delete_user(username).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::types::DesiredStateRecord;
    use chrono::{TimeZone, Utc};
    use iamsync_directory::{DirectoryState, InMemoryDirectory, Operation, UserEntry};

    const ACCOUNT: &str = "123456789012";

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn reconciler(
        memory: &Arc<InMemoryDirectory>,
    ) -> Result<Reconciler, Box<dyn std::error::Error>> {
        let at = Utc
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .single()
            .ok_or("invalid instant")?;
        Ok(Reconciler::new(memory.clone(), AccountScope::new(ACCOUNT))
            .with_clock(Arc::new(FixedClock(at))))
    }

    fn present(username: &str) -> Observation {
        Observation::Present(CurrentState::new(username))
    }

    #[test]
    fn test_step_names_are_camel_case() {
        assert_eq!(Step::ApplyTargetPolicy.to_string(), "applyTargetPolicy");
        assert_eq!(Step::RevokeCredentials.to_string(), "revokeCredentials");
    }

    #[test]
    fn test_plan_for_absent_identity_creates_it() -> TestResult {
        let memory = Arc::new(InMemoryDirectory::new(DirectoryState::new(ACCOUNT)));
        let record = DesiredStateRecord::provision("alice", "eng", "EngReadOnly", "Engineering")
            .validate()
            .map_err(|r| r.to_string())?;

        let plan = reconciler(&memory)?.plan(&record, &Observation::Absent);

        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0], DirectoryCommand::CreateUser);
        assert_eq!(
            plan[2],
            DirectoryCommand::AttachPolicy {
                policy: PolicyRef::new("arn:aws:iam::123456789012:policy/EngReadOnly")
            }
        );
        match &plan[3] {
            DirectoryCommand::SetTags { tags } => {
                assert_eq!(tags.get(DEPARTMENT_TAG).map(String::as_str), Some("Engineering"));
                assert_eq!(
                    tags.get(LAST_UPDATED_TAG).map(String::as_str),
                    Some("2024-01-02T03:04:05Z")
                );
            }
            other => return Err(format!("expected tags, got {other}").into()),
        }
        Ok(())
    }

    #[test]
    fn test_plan_for_absent_leaver_is_empty() -> TestResult {
        let memory = Arc::new(InMemoryDirectory::new(DirectoryState::new(ACCOUNT)));
        let record = DesiredStateRecord::leaver("ghost")
            .validate()
            .map_err(|r| r.to_string())?;
        assert!(reconciler(&memory)?.plan(&record, &Observation::Absent).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_group_is_created_then_joined() -> TestResult {
        let memory = Arc::new(InMemoryDirectory::new(
            DirectoryState::new(ACCOUNT)
                .with_policy_named("DataReadOnly")
                .with_user("alice", UserEntry::default()),
        ));
        let record = DesiredStateRecord::mover("alice", "data", "DataReadOnly", "Data")
            .validate()
            .map_err(|r| r.to_string())?;

        let convergence = reconciler(&memory)?.reconcile(&record, &present("alice")).await;

        assert_eq!(convergence.status, ConvergenceStatus::Converged);
        assert!(convergence.applied.contains(&DirectoryCommand::CreateGroup {
            group: "data".to_string()
        }));
        let state = memory.snapshot().await;
        assert!(state.groups.contains("data"));
        assert!(state.user("alice").is_some_and(|u| u.groups.contains("data")));
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_before_any_mutation_is_failed() -> TestResult {
        let memory = Arc::new(InMemoryDirectory::new(DirectoryState::new(ACCOUNT)));
        memory
            .inject_fault(
                Operation::CreateUser,
                Some("alice"),
                DirectoryError::permission_denied(Operation::CreateUser, "explicit deny"),
                1,
            )
            .await;
        let record = DesiredStateRecord::provision("alice", "eng", "EngReadOnly", "Engineering")
            .validate()
            .map_err(|r| r.to_string())?;

        let convergence = reconciler(&memory)?
            .reconcile(&record, &Observation::Absent)
            .await;

        match convergence.status {
            ConvergenceStatus::Failed(failure) => {
                assert_eq!(failure.step, Step::EnsureExists);
                assert_eq!(failure.class, ErrorClass::Denied);
            }
            other => return Err(format!("expected failure, got {other:?}").into()),
        }
        assert_eq!(convergence.reached, Phase::Start);
        assert_eq!(memory.mutation_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_creation_is_benign() -> TestResult {
        let memory = Arc::new(InMemoryDirectory::new(
            DirectoryState::new(ACCOUNT)
                .with_group("eng")
                .with_policy_named("EngReadOnly")
                .with_user("alice", UserEntry::default()),
        ));
        let record = DesiredStateRecord::provision("alice", "eng", "EngReadOnly", "Engineering")
            .validate()
            .map_err(|r| r.to_string())?;

        // Stale observation: alice was created after inspection.
        let convergence = reconciler(&memory)?
            .reconcile(&record, &Observation::Absent)
            .await;

        assert_eq!(convergence.status, ConvergenceStatus::Converged);
        assert!(!convergence.applied.contains(&DirectoryCommand::CreateUser));
        Ok(())
    }

    fn eng_catalogue() -> DirectoryState {
        DirectoryState::new(ACCOUNT)
            .with_group("eng")
            .with_policy_named("EngReadOnly")
    }

    #[tokio::test]
    async fn test_group_add_is_retried_only_once() -> TestResult {
        let memory = Arc::new(InMemoryDirectory::new(eng_catalogue()));
        memory
            .inject_fault(
                Operation::AddToGroup,
                Some("alice"),
                DirectoryError::not_found(EntityKind::Group, "eng"),
                5,
            )
            .await;
        let record = DesiredStateRecord::provision("alice", "eng", "EngReadOnly", "Engineering")
            .validate()
            .map_err(|r| r.to_string())?;

        let convergence = reconciler(&memory)?
            .reconcile(&record, &Observation::Absent)
            .await;

        match &convergence.status {
            ConvergenceStatus::Degraded(failure) => {
                assert_eq!(failure.step, Step::ApplyTargetGroup);
                assert_eq!(failure.class, ErrorClass::NotFound);
            }
            other => return Err(format!("expected degraded, got {other:?}").into()),
        }
        assert_eq!(convergence.reached, Phase::GroupsCleared);
        assert_eq!(convergence.applied, vec![DirectoryCommand::CreateUser]);
        assert_eq!(memory.call_count(Operation::AddToGroup).await, 2);
        assert_eq!(memory.call_count(Operation::CreateGroup).await, 1);
        assert_eq!(memory.call_count(Operation::AttachPolicy).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_group_created_elsewhere_is_benign() -> TestResult {
        let memory = Arc::new(InMemoryDirectory::new(
            eng_catalogue().with_user("alice", UserEntry::default()),
        ));
        // The first add races a concurrent creation of the group.
        memory
            .inject_fault(
                Operation::AddToGroup,
                Some("alice"),
                DirectoryError::not_found(EntityKind::Group, "eng"),
                1,
            )
            .await;
        let record = DesiredStateRecord::mover("alice", "eng", "EngReadOnly", "Engineering")
            .validate()
            .map_err(|r| r.to_string())?;

        let convergence = reconciler(&memory)?.reconcile(&record, &present("alice")).await;

        assert_eq!(convergence.status, ConvergenceStatus::Converged);
        assert_eq!(memory.call_count(Operation::CreateGroup).await, 1);
        assert!(!convergence.applied.contains(&DirectoryCommand::CreateGroup {
            group: "eng".to_string()
        }));
        assert!(convergence.applied.contains(&DirectoryCommand::AddToGroup {
            group: "eng".to_string()
        }));
        let state = memory.snapshot().await;
        assert!(state.user("alice").is_some_and(|u| u.groups.contains("eng")));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_failure_on_bare_leaver_is_degraded() -> TestResult {
        let memory = Arc::new(InMemoryDirectory::new(
            eng_catalogue().with_user("alice", UserEntry::default()),
        ));
        memory
            .inject_fault(
                Operation::DeleteUser,
                Some("alice"),
                DirectoryError::permission_denied(Operation::DeleteUser, "explicit deny"),
                1,
            )
            .await;
        let record = DesiredStateRecord::leaver("alice")
            .validate()
            .map_err(|r| r.to_string())?;

        let convergence = reconciler(&memory)?.reconcile(&record, &present("alice")).await;

        match &convergence.status {
            ConvergenceStatus::Degraded(failure) => {
                assert_eq!(failure.step, Step::DeleteIdentity);
                assert_eq!(failure.class, ErrorClass::Denied);
            }
            other => return Err(format!("expected degraded, got {other:?}").into()),
        }
        assert!(convergence.applied.is_empty());
        assert_eq!(convergence.reached, Phase::CredentialsRevoked);
        Ok(())
    }
}
