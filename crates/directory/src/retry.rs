//! Call-site retry with exponential backoff and jitter.
//!
//! Only throttled and transient responses are retried. Everything else
//! (not found, conflicts, permission errors) is returned on the first attempt
//! because the engine interprets those classes itself.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{DirectoryClient, Operation};
use crate::error::{DirectoryError, DirectoryResult};
use crate::types::{PolicyRef, Tags};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 100;
const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first call
    pub max_retries: u32,
    /// Base delay for exponential backoff (milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (milliseconds)
    pub max_delay_ms: u64,
    /// Jitter factor to add randomness (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom settings.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// No retries - every call is attempted once.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(0, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }

    /// Set jitter factor.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Check the policy for values that cannot produce a sane schedule.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(format!(
                "jitter_factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }

    /// Calculate delay for the given attempt number using exponential backoff with jitter.
    ///
    /// Delay formula: min(base_delay * 2^attempt, max_delay) + jitter
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let exponential_delay = self.base_delay_ms.saturating_mul(factor);
        let capped_delay = exponential_delay.min(self.max_delay_ms);

        // Add jitter to prevent thundering herd
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jitter_ms = {
            let jitter_range = (capped_delay as f64) * self.jitter_factor;
            if jitter_range >= 1.0 {
                rand::thread_rng().gen_range(0.0..jitter_range).floor() as u64
            } else {
                0
            }
        };

        Duration::from_millis(capped_delay.saturating_add(jitter_ms))
    }

    /// Create a retry state for tracking attempts.
    #[must_use]
    pub fn state(&self) -> RetryState {
        RetryState::new(self.clone())
    }
}

/// Retry state for tracking retry attempts of one call.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    /// Create a new retry state.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Retries consumed so far.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.attempt
    }

    /// Check if more retries are available.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.attempt < self.policy.max_retries
    }

    /// Record a retry attempt and get the delay before next retry.
    ///
    /// Returns None if no more retries are available.
    pub fn next_retry(&mut self) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }

        let delay = self.policy.calculate_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}

/// Directory decorator retrying throttled and transient calls.
///
/// A retried call is the same idempotent command issued again; the
/// reconciler above never sees the intermediate failures.
pub struct RetryingDirectory<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: DirectoryClient> RetryingDirectory<C> {
    /// Wrap a client with the given policy.
    pub const fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn call<T, F, Fut>(&self, operation: Operation, mut request: F) -> DirectoryResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = DirectoryResult<T>> + Send,
        T: Send,
    {
        let mut state = self.policy.state();
        loop {
            match request().await {
                Ok(value) => {
                    if state.retries() > 0 {
                        debug!(%operation, retries = state.retries(), "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    let Some(delay) = state.next_retry() else {
                        warn!(%operation, error = %e, "Retries exhausted");
                        return Err(DirectoryError::RetriesExhausted {
                            operation,
                            attempts: state.retries().saturating_add(1),
                            last_error: e.to_string(),
                        });
                    };
                    warn!(
                        %operation,
                        error = %e,
                        retry = state.retries(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Transient directory error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<C: DirectoryClient> DirectoryClient for RetryingDirectory<C> {
    async fn user_exists(&self, username: &str) -> DirectoryResult<bool> {
        self.call(Operation::UserExists, || self.inner.user_exists(username))
            .await
    }

    async fn create_user(&self, username: &str) -> DirectoryResult<()> {
        self.call(Operation::CreateUser, || self.inner.create_user(username))
            .await
    }

    async fn delete_user(&self, username: &str) -> DirectoryResult<()> {
        self.call(Operation::DeleteUser, || self.inner.delete_user(username))
            .await
    }

    async fn list_groups(&self, username: &str) -> DirectoryResult<BTreeSet<String>> {
        self.call(Operation::ListGroups, || self.inner.list_groups(username))
            .await
    }

    async fn add_to_group(&self, username: &str, group: &str) -> DirectoryResult<()> {
        self.call(Operation::AddToGroup, || {
            self.inner.add_to_group(username, group)
        })
        .await
    }

    async fn create_group(&self, group: &str) -> DirectoryResult<()> {
        self.call(Operation::CreateGroup, || self.inner.create_group(group))
            .await
    }

    async fn remove_from_group(&self, username: &str, group: &str) -> DirectoryResult<()> {
        self.call(Operation::RemoveFromGroup, || {
            self.inner.remove_from_group(username, group)
        })
        .await
    }

    async fn list_attached_policies(
        &self,
        username: &str,
    ) -> DirectoryResult<BTreeSet<PolicyRef>> {
        self.call(Operation::ListAttachedPolicies, || {
            self.inner.list_attached_policies(username)
        })
        .await
    }

    async fn attach_policy(&self, username: &str, policy: &PolicyRef) -> DirectoryResult<()> {
        self.call(Operation::AttachPolicy, || {
            self.inner.attach_policy(username, policy)
        })
        .await
    }

    async fn detach_policy(&self, username: &str, policy: &PolicyRef) -> DirectoryResult<()> {
        self.call(Operation::DetachPolicy, || {
            self.inner.detach_policy(username, policy)
        })
        .await
    }

    async fn set_tags(&self, username: &str, tags: &Tags) -> DirectoryResult<()> {
        self.call(Operation::SetTags, || self.inner.set_tags(username, tags))
            .await
    }

    async fn has_login_profile(&self, username: &str) -> DirectoryResult<bool> {
        self.call(Operation::HasLoginProfile, || {
            self.inner.has_login_profile(username)
        })
        .await
    }

    async fn delete_login_profile(&self, username: &str) -> DirectoryResult<()> {
        self.call(Operation::DeleteLoginProfile, || {
            self.inner.delete_login_profile(username)
        })
        .await
    }

    async fn list_access_keys(&self, username: &str) -> DirectoryResult<BTreeSet<String>> {
        self.call(Operation::ListAccessKeys, || {
            self.inner.list_access_keys(username)
        })
        .await
    }

    async fn delete_access_key(&self, username: &str, key_id: &str) -> DirectoryResult<()> {
        self.call(Operation::DeleteAccessKey, || {
            self.inner.delete_access_key(username, key_id)
        })
        .await
    }

    async fn account_scope_id(&self) -> DirectoryResult<String> {
        self.call(Operation::AccountScopeId, || self.inner.account_scope_id())
            .await
    }
}
