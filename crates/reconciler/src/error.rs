//! Error types for the reconciler crate.
//!
//! Only run setup can fail. Per-identity failures are reported as data in the
//! [`RunReport`](crate::RunReport).

use std::fmt;

use iamsync_directory::DirectoryError;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone)]
pub enum Error {
    /// The account scope could not be fetched before the run.
    AccountScope { source: DirectoryError },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountScope { source } => {
                write!(f, "failed to fetch account scope: {source}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AccountScope { source } => Some(source),
            Self::InvalidConfig { .. } => None,
        }
    }
}

impl Error {
    /// Create an account scope error.
    pub const fn account_scope(source: DirectoryError) -> Self {
        Self::AccountScope { source }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_config("concurrency must be at least 1");
        assert!(err.to_string().contains("concurrency must be at least 1"));
    }

    #[test]
    fn test_account_scope_keeps_source() {
        let err = Error::account_scope(DirectoryError::transient("connection reset"));
        assert!(err.to_string().contains("connection reset"));
        assert!(err.source().is_some());
    }
}
