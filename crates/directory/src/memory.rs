//! In-memory directory with IAM-like semantics.
//!
//! Used as the test double for the engine and, loaded from a JSON snapshot,
//! as a local directory for the CLI. Behaves like the real service where it
//! matters for convergence:
//!
//! - creating an existing user or group is a conflict
//! - operations naming a missing user, group, policy or credential are not-found
//! - attaching a policy the account does not define is not-found
//! - deleting a user that still holds groups, policies or credentials fails

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::client::{DirectoryClient, Operation};
use crate::error::{DirectoryError, DirectoryResult, EntityKind};
use crate::types::{AccountScope, PolicyRef, Tags};

/// State of one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub policies: BTreeSet<PolicyRef>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub login_profile: bool,
    #[serde(default)]
    pub access_keys: BTreeSet<String>,
}

impl UserEntry {
    /// Add a group membership.
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Add an attached policy.
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyRef) -> Self {
        self.policies.insert(policy);
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Give the user a console login profile.
    #[must_use]
    pub const fn with_login_profile(mut self) -> Self {
        self.login_profile = true;
        self
    }

    /// Add an access key.
    #[must_use]
    pub fn with_access_key(mut self, key_id: impl Into<String>) -> Self {
        self.access_keys.insert(key_id.into());
        self
    }

    /// Whether anything still blocks deletion.
    fn has_attachments(&self) -> bool {
        !self.groups.is_empty()
            || !self.policies.is_empty()
            || self.login_profile
            || !self.access_keys.is_empty()
    }
}

/// Complete directory contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryState {
    pub account_id: String,
    #[serde(default)]
    pub users: BTreeMap<String, UserEntry>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub policies: BTreeSet<PolicyRef>,
}

impl DirectoryState {
    /// Create an empty directory for the given account.
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Self::default()
        }
    }

    /// The account scope of this directory.
    #[must_use]
    pub fn scope(&self) -> AccountScope {
        AccountScope::new(self.account_id.clone())
    }

    /// Define a group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Define a customer-managed policy by name, qualified with the account.
    #[must_use]
    pub fn with_policy_named(mut self, name: &str) -> Self {
        let policy = self.scope().qualify(name);
        self.policies.insert(policy);
        self
    }

    /// Add a user; its groups and policies are defined as a side effect.
    #[must_use]
    pub fn with_user(mut self, username: impl Into<String>, entry: UserEntry) -> Self {
        self.groups.extend(entry.groups.iter().cloned());
        self.policies.extend(entry.policies.iter().cloned());
        self.users.insert(username.into(), entry);
        self
    }

    /// Look up a user.
    #[must_use]
    pub fn user(&self, username: &str) -> Option<&UserEntry> {
        self.users.get(username)
    }

    fn user_mut(&mut self, username: &str) -> DirectoryResult<&mut UserEntry> {
        self.users
            .get_mut(username)
            .ok_or_else(|| DirectoryError::not_found(EntityKind::User, username))
    }

    fn user_ref(&self, username: &str) -> DirectoryResult<&UserEntry> {
        self.users
            .get(username)
            .ok_or_else(|| DirectoryError::not_found(EntityKind::User, username))
    }
}

/// An injected failure for a directory call.
#[derive(Debug, Clone)]
struct Fault {
    operation: Operation,
    username: Option<String>,
    error: DirectoryError,
    remaining: u32,
}

impl Fault {
    fn matches(&self, operation: Operation, username: Option<&str>) -> bool {
        self.remaining > 0
            && self.operation == operation
            && self
                .username
                .as_deref()
                .is_none_or(|wanted| username == Some(wanted))
    }
}

/// Directory held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<BTreeMap<Operation, usize>>,
}

impl InMemoryDirectory {
    /// Create a directory with the given contents.
    #[must_use]
    pub fn new(state: DirectoryState) -> Self {
        Self {
            state: RwLock::new(state),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> DirectoryState {
        self.state.read().await.clone()
    }

    /// Make the next `times` calls of `operation` fail with `error`.
    ///
    /// With a username, only calls for that identity are affected.
    pub async fn inject_fault(
        &self,
        operation: Operation,
        username: Option<&str>,
        error: DirectoryError,
        times: u32,
    ) {
        self.faults.lock().await.push(Fault {
            operation,
            username: username.map(str::to_string),
            error,
            remaining: times,
        });
    }

    /// Number of calls made for an operation, including failed ones.
    pub async fn call_count(&self, operation: Operation) -> usize {
        self.calls
            .lock()
            .await
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    /// Number of mutating calls made so far.
    pub async fn mutation_count(&self) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|(operation, _)| operation.is_mutation())
            .map(|(_, count)| *count)
            .sum()
    }

    /// Count the call and fire a matching fault, if any.
    async fn enter(&self, operation: Operation, username: Option<&str>) -> DirectoryResult<()> {
        {
            let mut calls = self.calls.lock().await;
            let count = calls.entry(operation).or_insert(0);
            *count = count.saturating_add(1);
        }

        let mut faults = self.faults.lock().await;
        if let Some(fault) = faults
            .iter_mut()
            .find(|fault| fault.matches(operation, username))
        {
            fault.remaining = fault.remaining.saturating_sub(1);
            return Err(fault.error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn user_exists(&self, username: &str) -> DirectoryResult<bool> {
        self.enter(Operation::UserExists, Some(username)).await?;
        Ok(self.state.read().await.users.contains_key(username))
    }

    async fn create_user(&self, username: &str) -> DirectoryResult<()> {
        self.enter(Operation::CreateUser, Some(username)).await?;
        let mut state = self.state.write().await;
        if state.users.contains_key(username) {
            return Err(DirectoryError::already_exists(EntityKind::User, username));
        }
        state.users.insert(username.to_string(), UserEntry::default());
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> DirectoryResult<()> {
        self.enter(Operation::DeleteUser, Some(username)).await?;
        let mut state = self.state.write().await;
        if state.user_ref(username)?.has_attachments() {
            return Err(DirectoryError::failed(format!(
                "cannot delete {username}: user still has attached entities"
            )));
        }
        state.users.remove(username);
        Ok(())
    }

    async fn list_groups(&self, username: &str) -> DirectoryResult<BTreeSet<String>> {
        self.enter(Operation::ListGroups, Some(username)).await?;
        Ok(self.state.read().await.user_ref(username)?.groups.clone())
    }

    async fn add_to_group(&self, username: &str, group: &str) -> DirectoryResult<()> {
        self.enter(Operation::AddToGroup, Some(username)).await?;
        let mut state = self.state.write().await;
        state.user_ref(username)?;
        if !state.groups.contains(group) {
            return Err(DirectoryError::not_found(EntityKind::Group, group));
        }
        state.user_mut(username)?.groups.insert(group.to_string());
        Ok(())
    }

    async fn create_group(&self, group: &str) -> DirectoryResult<()> {
        self.enter(Operation::CreateGroup, None).await?;
        let mut state = self.state.write().await;
        if !state.groups.insert(group.to_string()) {
            return Err(DirectoryError::already_exists(EntityKind::Group, group));
        }
        Ok(())
    }

    async fn remove_from_group(&self, username: &str, group: &str) -> DirectoryResult<()> {
        self.enter(Operation::RemoveFromGroup, Some(username)).await?;
        let mut state = self.state.write().await;
        if !state.user_mut(username)?.groups.remove(group) {
            return Err(DirectoryError::not_found(EntityKind::Group, group));
        }
        Ok(())
    }

    async fn list_attached_policies(
        &self,
        username: &str,
    ) -> DirectoryResult<BTreeSet<PolicyRef>> {
        self.enter(Operation::ListAttachedPolicies, Some(username))
            .await?;
        Ok(self.state.read().await.user_ref(username)?.policies.clone())
    }

    async fn attach_policy(&self, username: &str, policy: &PolicyRef) -> DirectoryResult<()> {
        self.enter(Operation::AttachPolicy, Some(username)).await?;
        let mut state = self.state.write().await;
        state.user_ref(username)?;
        if !state.policies.contains(policy) {
            return Err(DirectoryError::not_found(
                EntityKind::Policy,
                policy.as_str(),
            ));
        }
        state.user_mut(username)?.policies.insert(policy.clone());
        Ok(())
    }

    async fn detach_policy(&self, username: &str, policy: &PolicyRef) -> DirectoryResult<()> {
        self.enter(Operation::DetachPolicy, Some(username)).await?;
        let mut state = self.state.write().await;
        if !state.user_mut(username)?.policies.remove(policy) {
            return Err(DirectoryError::not_found(
                EntityKind::Policy,
                policy.as_str(),
            ));
        }
        Ok(())
    }

    async fn set_tags(&self, username: &str, tags: &Tags) -> DirectoryResult<()> {
        self.enter(Operation::SetTags, Some(username)).await?;
        let mut state = self.state.write().await;
        let user = state.user_mut(username)?;
        for (key, value) in tags {
            user.tags.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn has_login_profile(&self, username: &str) -> DirectoryResult<bool> {
        self.enter(Operation::HasLoginProfile, Some(username)).await?;
        Ok(self.state.read().await.user_ref(username)?.login_profile)
    }

    async fn delete_login_profile(&self, username: &str) -> DirectoryResult<()> {
        self.enter(Operation::DeleteLoginProfile, Some(username))
            .await?;
        let mut state = self.state.write().await;
        let user = state.user_mut(username)?;
        if !user.login_profile {
            return Err(DirectoryError::not_found(EntityKind::LoginProfile, username));
        }
        user.login_profile = false;
        Ok(())
    }

    async fn list_access_keys(&self, username: &str) -> DirectoryResult<BTreeSet<String>> {
        self.enter(Operation::ListAccessKeys, Some(username)).await?;
        Ok(self.state.read().await.user_ref(username)?.access_keys.clone())
    }

    async fn delete_access_key(&self, username: &str, key_id: &str) -> DirectoryResult<()> {
        self.enter(Operation::DeleteAccessKey, Some(username)).await?;
        let mut state = self.state.write().await;
        if !state.user_mut(username)?.access_keys.remove(key_id) {
            return Err(DirectoryError::not_found(EntityKind::AccessKey, key_id));
        }
        Ok(())
    }

    async fn account_scope_id(&self) -> DirectoryResult<String> {
        self.enter(Operation::AccountScopeId, None).await?;
        Ok(self.state.read().await.account_id.clone())
    }
}
