//! Desired-state records and observed identity state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use iamsync_directory::PolicyRef;
use serde::{Deserialize, Serialize};

use crate::report::SkipReason;

/// Lifecycle transition requested for an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    /// Create the identity (if needed) and converge it onto its role.
    Provision,
    /// Reassign the identity to a new role.
    Move,
    /// Remove all access and the identity itself.
    Leave,
}

impl LifecycleAction {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Move => "move",
            Self::Leave => "leave",
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown action name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown lifecycle action '{}' (expected provision, move or leave)",
            self.0
        )
    }
}

impl std::error::Error for UnknownAction {}

impl FromStr for LifecycleAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "provision" => Ok(Self::Provision),
            "move" => Ok(Self::Move),
            "leave" => Ok(Self::Leave),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

/// One row of desired state, as produced by a loader.
///
/// Fields are stored as given; [`DesiredStateRecord::validate`] trims them and
/// checks that the fields required by the action are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredStateRecord {
    pub username: String,
    pub action: LifecycleAction,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub policy: String,
    #[serde(default)]
    pub department: String,
    /// Extra attributes, applied as tags.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl DesiredStateRecord {
    /// Record that provisions a new identity.
    pub fn provision(
        username: impl Into<String>,
        group: impl Into<String>,
        policy: impl Into<String>,
        department: impl Into<String>,
    ) -> Self {
        Self::converging(LifecycleAction::Provision, username, group, policy, department)
    }

    /// Record that moves an identity to a new role.
    pub fn mover(
        username: impl Into<String>,
        group: impl Into<String>,
        policy: impl Into<String>,
        department: impl Into<String>,
    ) -> Self {
        Self::converging(LifecycleAction::Move, username, group, policy, department)
    }

    /// Record that deprovisions an identity.
    pub fn leaver(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            action: LifecycleAction::Leave,
            group: String::new(),
            policy: String::new(),
            department: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    fn converging(
        action: LifecycleAction,
        username: impl Into<String>,
        group: impl Into<String>,
        policy: impl Into<String>,
        department: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            action,
            group: group.into(),
            policy: policy.into(),
            department: department.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an extra attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Trim and check the record.
    ///
    /// # Errors
    ///
    /// Returns [`SkipReason::Invalid`] naming the first missing field.
    pub fn validate(&self) -> Result<ValidatedRecord, SkipReason> {
        let username = required("username", &self.username)?;
        let intent = match self.action {
            LifecycleAction::Leave => Intent::Leave,
            LifecycleAction::Provision | LifecycleAction::Move => {
                let group = required("group", &self.group)?;
                let policy = required("policy", &self.policy)?;
                let department = required("department", &self.department)?;
                let attributes = self
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                    .collect();
                Intent::Converge(TargetRole {
                    group,
                    policy,
                    department,
                    attributes,
                })
            }
        };
        Ok(ValidatedRecord {
            username,
            action: self.action,
            intent,
        })
    }
}

fn required(field: &str, value: &str) -> Result<String, SkipReason> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(SkipReason::invalid(format!("missing required field '{field}'")))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Role an identity converges onto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRole {
    pub group: String,
    /// Policy name, qualified with the account scope at attach time.
    pub policy: String,
    pub department: String,
    pub attributes: BTreeMap<String, String>,
}

/// What the state machine should do with an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum Intent {
    /// Provision/move path.
    Converge(TargetRole),
    /// Leave path.
    Leave,
}

/// A record that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub username: String,
    pub action: LifecycleAction,
    pub intent: Intent,
}

/// Directory state of an existing identity at inspection time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    pub username: String,
    pub groups: BTreeSet<String>,
    pub policies: BTreeSet<PolicyRef>,
    pub login_profile: bool,
    pub access_keys: BTreeSet<String>,
}

impl CurrentState {
    /// Empty state for a named identity.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }
}

/// Result of inspecting an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Observation {
    Present(CurrentState),
    Absent,
}

impl Observation {
    /// Whether the identity exists.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// The observed state, if present.
    #[must_use]
    pub const fn current(&self) -> Option<&CurrentState> {
        match self {
            Self::Present(state) => Some(state),
            Self::Absent => None,
        }
    }
}
