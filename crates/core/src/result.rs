//! Result type definition and extension traits.
//!
//! Provides combinators for Result types, enabling clean error handling
//! without unwrap/expect/panic.

use crate::error::Error;

/// The standard Result type for iamsync file and configuration handling.
///
/// # Examples
///
/// ```ignore
/// fn load() -> Result<SyncConfig> {
///     let config = SyncConfig::from_file(path)?;
///     config.validate()?;
///     Ok(config)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing safe combinators for Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error as a warning if present.
    ///
    /// Used for optional inputs (environment overrides and the like) where a
    /// bad value should be reported and then ignored.
    fn into_option_logged(self) -> Option<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring invalid value");
                None
            }
        }
    }
}
