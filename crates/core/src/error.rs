//! Core error types for iamsync operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for iamsync file, input and configuration handling.
#[derive(Debug, Error)]
pub enum Error {
    // I/O errors
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("failed to write file '{path}': {reason}")]
    FileWriteFailed { path: PathBuf, reason: String },

    // Parsing errors
    #[error("CSV parse error: {reason}")]
    CsvParseFailed { reason: String },

    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    // Configuration
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Output
    #[error("failed to serialize {what}: {reason}")]
    SerializeFailed { what: String, reason: String },
}

impl Error {
    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a file write error.
    pub fn file_write_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a CSV parse error.
    pub fn csv_parse_failed(reason: impl Into<String>) -> Self {
        Self::CsvParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse_failed(reason: impl Into<String>) -> Self {
        Self::JsonParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a serialization error for `what`.
    pub fn serialize_failed(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SerializeFailed {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_read_failed_mentions_path() {
        let err = Error::file_read_failed("/tmp/users.csv", "no such file");
        let message = err.to_string();
        assert!(message.contains("/tmp/users.csv"));
        assert!(message.contains("no such file"));
    }

    #[test]
    fn test_serialize_failed_is_not_a_parse_error() {
        let err = Error::serialize_failed("directory snapshot", "key must be a string");
        assert_eq!(
            err.to_string(),
            "failed to serialize directory snapshot: key must be a string"
        );
    }

    #[test]
    fn test_invalid_config_display() {
        let err = Error::invalid_config("concurrency must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid configuration: concurrency must be at least 1"
        );
    }
}
