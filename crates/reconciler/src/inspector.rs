//! Read-only view of an identity's directory state.

use std::sync::Arc;

use iamsync_directory::{DirectoryClient, DirectoryResult, DirectoryResultExt};
use tracing::debug;

use crate::types::{CurrentState, Observation};

/// Queries the directory for an identity's current state.
#[derive(Clone)]
pub struct StateInspector {
    client: Arc<dyn DirectoryClient>,
}

impl StateInspector {
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }

    /// Observe an identity.
    ///
    /// A not-found response from any listing call means the identity vanished
    /// after the existence probe and is reported as [`Observation::Absent`].
    ///
    /// # Errors
    ///
    /// Returns any directory error other than not-found.
    pub async fn inspect(&self, username: &str) -> DirectoryResult<Observation> {
        if !self.client.user_exists(username).await? {
            debug!(username, "Identity absent");
            return Ok(Observation::Absent);
        }

        let Some(groups) = self.client.list_groups(username).await.not_found_as_none()? else {
            return Ok(Observation::Absent);
        };
        let Some(policies) = self
            .client
            .list_attached_policies(username)
            .await
            .not_found_as_none()?
        else {
            return Ok(Observation::Absent);
        };
        let Some(login_profile) = self
            .client
            .has_login_profile(username)
            .await
            .not_found_as_none()?
        else {
            return Ok(Observation::Absent);
        };
        let Some(access_keys) = self
            .client
            .list_access_keys(username)
            .await
            .not_found_as_none()?
        else {
            return Ok(Observation::Absent);
        };

        debug!(
            username,
            groups = groups.len(),
            policies = policies.len(),
            login_profile,
            access_keys = access_keys.len(),
            "Identity inspected"
        );

        Ok(Observation::Present(CurrentState {
            username: username.to_string(),
            groups,
            policies,
            login_profile,
            access_keys,
        }))
    }
}
