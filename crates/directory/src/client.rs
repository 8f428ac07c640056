//! The directory client trait.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DirectoryResult;
use crate::types::{PolicyRef, Tags};

/// Async CRUD surface of one identity directory account.
///
/// Every call is a blocking network request from the engine's point of view;
/// callers await each one before issuing the next for the same identity.
/// Implementations report missing entities as [`DirectoryError::NotFound`]
/// and duplicate creations as [`DirectoryError::AlreadyExists`]; the engine
/// decides what those mean for convergence.
///
/// [`DirectoryError::NotFound`]: crate::DirectoryError::NotFound
/// [`DirectoryError::AlreadyExists`]: crate::DirectoryError::AlreadyExists
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Whether the identity exists.
    async fn user_exists(&self, username: &str) -> DirectoryResult<bool>;

    /// Create the identity.
    async fn create_user(&self, username: &str) -> DirectoryResult<()>;

    /// Delete the identity.
    async fn delete_user(&self, username: &str) -> DirectoryResult<()>;

    /// Groups the identity is a member of.
    async fn list_groups(&self, username: &str) -> DirectoryResult<BTreeSet<String>>;

    /// Add the identity to a group.
    async fn add_to_group(&self, username: &str, group: &str) -> DirectoryResult<()>;

    /// Create a group.
    async fn create_group(&self, group: &str) -> DirectoryResult<()>;

    /// Remove the identity from a group.
    async fn remove_from_group(&self, username: &str, group: &str) -> DirectoryResult<()>;

    /// Managed policies attached directly to the identity.
    async fn list_attached_policies(&self, username: &str)
    -> DirectoryResult<BTreeSet<PolicyRef>>;

    /// Attach a managed policy.
    async fn attach_policy(&self, username: &str, policy: &PolicyRef) -> DirectoryResult<()>;

    /// Detach a managed policy.
    async fn detach_policy(&self, username: &str, policy: &PolicyRef) -> DirectoryResult<()>;

    /// Set tags, replacing values of existing keys.
    async fn set_tags(&self, username: &str, tags: &Tags) -> DirectoryResult<()>;

    /// Whether the identity has a console login profile.
    async fn has_login_profile(&self, username: &str) -> DirectoryResult<bool>;

    /// Delete the console login profile.
    async fn delete_login_profile(&self, username: &str) -> DirectoryResult<()>;

    /// Access key identifiers of the identity.
    async fn list_access_keys(&self, username: &str) -> DirectoryResult<BTreeSet<String>>;

    /// Delete one access key.
    async fn delete_access_key(&self, username: &str, key_id: &str) -> DirectoryResult<()>;

    /// Account-scope identifier used to qualify policy names.
    async fn account_scope_id(&self) -> DirectoryResult<String>;
}

#[async_trait]
impl<T: DirectoryClient + ?Sized> DirectoryClient for Arc<T> {
    async fn user_exists(&self, username: &str) -> DirectoryResult<bool> {
        (**self).user_exists(username).await
    }

    async fn create_user(&self, username: &str) -> DirectoryResult<()> {
        (**self).create_user(username).await
    }

    async fn delete_user(&self, username: &str) -> DirectoryResult<()> {
        (**self).delete_user(username).await
    }

    async fn list_groups(&self, username: &str) -> DirectoryResult<BTreeSet<String>> {
        (**self).list_groups(username).await
    }

    async fn add_to_group(&self, username: &str, group: &str) -> DirectoryResult<()> {
        (**self).add_to_group(username, group).await
    }

    async fn create_group(&self, group: &str) -> DirectoryResult<()> {
        (**self).create_group(group).await
    }

    async fn remove_from_group(&self, username: &str, group: &str) -> DirectoryResult<()> {
        (**self).remove_from_group(username, group).await
    }

    async fn list_attached_policies(
        &self,
        username: &str,
    ) -> DirectoryResult<BTreeSet<PolicyRef>> {
        (**self).list_attached_policies(username).await
    }

    async fn attach_policy(&self, username: &str, policy: &PolicyRef) -> DirectoryResult<()> {
        (**self).attach_policy(username, policy).await
    }

    async fn detach_policy(&self, username: &str, policy: &PolicyRef) -> DirectoryResult<()> {
        (**self).detach_policy(username, policy).await
    }

    async fn set_tags(&self, username: &str, tags: &Tags) -> DirectoryResult<()> {
        (**self).set_tags(username, tags).await
    }

    async fn has_login_profile(&self, username: &str) -> DirectoryResult<bool> {
        (**self).has_login_profile(username).await
    }

    async fn delete_login_profile(&self, username: &str) -> DirectoryResult<()> {
        (**self).delete_login_profile(username).await
    }

    async fn list_access_keys(&self, username: &str) -> DirectoryResult<BTreeSet<String>> {
        (**self).list_access_keys(username).await
    }

    async fn delete_access_key(&self, username: &str, key_id: &str) -> DirectoryResult<()> {
        (**self).delete_access_key(username, key_id).await
    }

    async fn account_scope_id(&self) -> DirectoryResult<String> {
        (**self).account_scope_id().await
    }
}

/// Name of a directory call, used for logging, retries and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    UserExists,
    CreateUser,
    DeleteUser,
    ListGroups,
    AddToGroup,
    CreateGroup,
    RemoveFromGroup,
    ListAttachedPolicies,
    AttachPolicy,
    DetachPolicy,
    SetTags,
    HasLoginProfile,
    DeleteLoginProfile,
    ListAccessKeys,
    DeleteAccessKey,
    AccountScopeId,
}

impl Operation {
    /// Whether the call changes directory state.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::CreateUser
                | Self::DeleteUser
                | Self::AddToGroup
                | Self::CreateGroup
                | Self::RemoveFromGroup
                | Self::AttachPolicy
                | Self::DetachPolicy
                | Self::SetTags
                | Self::DeleteLoginProfile
                | Self::DeleteAccessKey
        )
    }

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserExists => "user_exists",
            Self::CreateUser => "create_user",
            Self::DeleteUser => "delete_user",
            Self::ListGroups => "list_groups",
            Self::AddToGroup => "add_to_group",
            Self::CreateGroup => "create_group",
            Self::RemoveFromGroup => "remove_from_group",
            Self::ListAttachedPolicies => "list_attached_policies",
            Self::AttachPolicy => "attach_policy",
            Self::DetachPolicy => "detach_policy",
            Self::SetTags => "set_tags",
            Self::HasLoginProfile => "has_login_profile",
            Self::DeleteLoginProfile => "delete_login_profile",
            Self::ListAccessKeys => "list_access_keys",
            Self::DeleteAccessKey => "delete_access_key",
            Self::AccountScopeId => "account_scope_id",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
