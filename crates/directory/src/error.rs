//! Directory response taxonomy.
//!
//! Errors carry a transient/permanent classification for the retry decorator
//! and a coarse [`ErrorClass`] the reconciler branches on explicitly.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::Operation;

/// Result type for directory calls.
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// Kind of directory entity named in a not-found or conflict response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Group,
    Policy,
    LoginProfile,
    AccessKey,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Group => write!(f, "group"),
            Self::Policy => write!(f, "policy"),
            Self::LoginProfile => write!(f, "login profile"),
            Self::AccessKey => write!(f, "access key"),
        }
    }
}

/// Coarse classification of a directory error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The named entity does not exist.
    NotFound,
    /// The entity already exists.
    Conflict,
    /// Throttling or a temporary failure; retrying may succeed.
    Transient,
    /// The caller is not allowed to perform the call.
    Denied,
    /// Anything else.
    Fatal,
}

impl ErrorClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Denied => "denied",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a [`DirectoryClient`](crate::DirectoryClient) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// Entity does not exist.
    #[error("{entity} not found: {name}")]
    NotFound { entity: EntityKind, name: String },

    /// Entity already exists (create conflict).
    #[error("{entity} already exists: {name}")]
    AlreadyExists { entity: EntityKind, name: String },

    /// The service rate-limited the request.
    #[error("request throttled: {message}")]
    Throttled { message: String },

    /// Temporary failure (network, service unavailable).
    #[error("transient failure: {message}")]
    Transient { message: String },

    /// The caller lacks permission for the operation.
    #[error("permission denied for {operation}: {message}")]
    PermissionDenied { operation: Operation, message: String },

    /// Retries for a throttled or transient call ran out.
    #[error("{operation} still failing after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: Operation,
        attempts: u32,
        last_error: String,
    },

    /// Any other unrecoverable failure.
    #[error("directory request failed: {message}")]
    Failed { message: String },
}

impl DirectoryError {
    /// Create a not-found error.
    pub fn not_found(entity: EntityKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            name: name.into(),
        }
    }

    /// Create an already-exists error.
    pub fn already_exists(entity: EntityKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            name: name.into(),
        }
    }

    /// Create a throttling error.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::Throttled {
            message: message.into(),
        }
    }

    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a permission-denied error.
    pub fn permission_denied(operation: Operation, message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            operation,
            message: message.into(),
        }
    }

    /// Create a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Classify the error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::AlreadyExists { .. } => ErrorClass::Conflict,
            Self::Throttled { .. } | Self::Transient { .. } => ErrorClass::Transient,
            Self::PermissionDenied { .. } => ErrorClass::Denied,
            Self::RetriesExhausted { .. } | Self::Failed { .. } => ErrorClass::Fatal,
        }
    }

    /// Whether the call should be retried as-is.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Whether this is a not-found response for the given entity kind.
    #[must_use]
    pub fn is_missing(&self, kind: EntityKind) -> bool {
        matches!(self, Self::NotFound { entity, .. } if *entity == kind)
    }
}

/// Branching helpers over directory results.
///
/// They turn the response classes that are success-equivalent at a given call
/// site into `Ok(None)`, so the call site states explicitly which classes it
/// tolerates.
pub trait DirectoryResultExt<T> {
    /// Map a not-found response to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns every other error unchanged.
    fn not_found_as_none(self) -> DirectoryResult<Option<T>>;

    /// Map an already-exists response to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns every other error unchanged.
    fn conflict_as_none(self) -> DirectoryResult<Option<T>>;
}

impl<T> DirectoryResultExt<T> for DirectoryResult<T> {
    fn not_found_as_none(self) -> DirectoryResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.class() == ErrorClass::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn conflict_as_none(self) -> DirectoryResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.class() == ErrorClass::Conflict => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DirectoryError::throttled("rate exceeded").is_transient());
        assert!(DirectoryError::transient("connection reset").is_transient());
        assert!(!DirectoryError::failed("boom").is_transient());
        assert!(
            !DirectoryError::permission_denied(Operation::CreateUser, "no").is_transient()
        );
    }

    #[test]
    fn test_retries_exhausted_is_not_retried_again() {
        let err = DirectoryError::RetriesExhausted {
            operation: Operation::AttachPolicy,
            attempts: 4,
            last_error: "request throttled: slow down".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(err.to_string().contains("attach_policy"));
    }

    #[test]
    fn test_is_missing_checks_entity_kind() {
        let err = DirectoryError::not_found(EntityKind::Group, "eng");
        assert!(err.is_missing(EntityKind::Group));
        assert!(!err.is_missing(EntityKind::User));
    }

    #[test]
    fn test_not_found_as_none() {
        let missing: DirectoryResult<()> =
            Err(DirectoryError::not_found(EntityKind::LoginProfile, "alice"));
        assert_eq!(missing.not_found_as_none(), Ok(None));

        let denied: DirectoryResult<()> = Err(DirectoryError::permission_denied(
            Operation::DeleteLoginProfile,
            "explicit deny",
        ));
        assert!(denied.not_found_as_none().is_err());
    }

    #[test]
    fn test_conflict_as_none() {
        let exists: DirectoryResult<()> =
            Err(DirectoryError::already_exists(EntityKind::Group, "eng"));
        assert_eq!(exists.conflict_as_none(), Ok(None));

        let ok: DirectoryResult<u8> = Ok(7);
        assert_eq!(ok.conflict_as_none(), Ok(Some(7)));
    }
}
