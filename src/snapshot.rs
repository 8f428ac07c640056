//! JSON snapshot files for the in-memory directory.

use std::path::Path;

use iamsync_core::{Error, Result};
use iamsync_directory::DirectoryState;
use tracing::debug;

/// Read a directory snapshot.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid snapshot.
pub fn load(path: &Path) -> Result<DirectoryState> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    let state: DirectoryState =
        serde_json::from_str(&content).map_err(|e| Error::json_parse_failed(e.to_string()))?;
    debug!(
        path = %path.display(),
        users = state.users.len(),
        groups = state.groups.len(),
        "Loaded directory snapshot"
    );
    Ok(state)
}

/// Write a directory snapshot, replacing the file.
///
/// The content is written to a sibling temporary file first and renamed over
/// the target.
///
/// # Errors
///
/// Returns an error if the snapshot cannot be serialized or written.
pub fn save(path: &Path, state: &DirectoryState) -> Result<()> {
    let content = serde_json::to_string_pretty(state)
        .map_err(|e| Error::serialize_failed("directory snapshot", e.to_string()))?;
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, content)
        .map_err(|e| Error::file_write_failed(&staging, e.to_string()))?;
    std::fs::rename(&staging, path).map_err(|e| Error::file_write_failed(path, e.to_string()))?;
    debug!(path = %path.display(), users = state.users.len(), "Saved directory snapshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamsync_directory::UserEntry;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_save_then_load() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("directory.json");
        let state = DirectoryState::new("123456789012")
            .with_group("eng")
            .with_user("alice", UserEntry::default().in_group("eng").with_login_profile());

        save(&path, &state)?;
        let loaded = load(&path)?;

        assert_eq!(loaded, state);
        assert!(!path.with_extension("json.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_minimal_snapshot_uses_defaults() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("directory.json");
        std::fs::write(&path, r#"{"account_id": "123456789012"}"#)?;

        let state = load(&path)?;

        assert_eq!(state.account_id, "123456789012");
        assert!(state.users.is_empty());
        Ok(())
    }

    #[test]
    fn test_unwritable_target_is_a_write_error() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("missing").join("directory.json");

        let result = save(&path, &DirectoryState::new("123456789012"));

        assert!(matches!(result, Err(Error::FileWriteFailed { .. })));
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let result = load(Path::new("/nonexistent/iamsync/directory.json"));
        assert!(matches!(result, Err(Error::FileReadFailed { .. })));
    }
}
