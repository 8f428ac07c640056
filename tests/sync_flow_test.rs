//! Integration tests for the file-driven sync flow.
//!
//! These tests verify that:
//! - A lifecycle sheet and a directory snapshot drive a full run
//! - Loader-rejected rows show up in the run report
//! - Configuration files feed the controller

#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

use std::sync::Arc;

use iamsync::{LoaderKind, SyncConfig, loader, snapshot};
use iamsync_directory::{
    DirectoryClient, DirectoryState, InMemoryDirectory, RetryingDirectory, UserEntry,
};
use iamsync_reconciler::LifecycleController;

const ACCOUNT: &str = "123456789012";

/// # GIVEN
/// A lifecycle sheet with an active mover, an inactive leaver and a row with
/// an unknown status, and a snapshot where both identities exist
///
/// # WHEN
/// The sheet is applied and the directory written back
///
/// # THEN
/// The mover is re-roled, the leaver is gone, the bad row is reported as
/// skipped and the snapshot on disk reflects the run
#[tokio::test]
async fn test_lifecycle_sheet_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("users_lifecycle.csv");
    let directory_path = dir.path().join("directory.json");

    std::fs::write(
        &input,
        "username,status,group,policy,department\n\
         alice,active,finance,FinanceReadOnly,Finance\n\
         bob,inactive,,,\n\
         carol,suspended,,,\n",
    )?;

    let initial = DirectoryState::new(ACCOUNT)
        .with_group("eng")
        .with_group("finance")
        .with_policy_named("EngReadOnly")
        .with_policy_named("FinanceReadOnly");
    let eng = initial.scope().qualify("EngReadOnly");
    let initial = initial
        .with_user("alice", UserEntry::default().in_group("eng").with_policy(eng.clone()))
        .with_user(
            "bob",
            UserEntry::default()
                .in_group("eng")
                .with_policy(eng)
                .with_login_profile()
                .with_access_key("AKIA1"),
        );
    snapshot::save(&directory_path, &initial)?;

    let config = SyncConfig::default();
    let batch = loader::load_file(&input, LoaderKind::Lifecycle)?;
    let directory = Arc::new(InMemoryDirectory::new(snapshot::load(&directory_path)?));
    let client: Arc<dyn DirectoryClient> = Arc::new(RetryingDirectory::new(
        Arc::clone(&directory),
        config.retry.clone(),
    ));
    let controller = LifecycleController::connect(client, config.controller_config()).await?;

    let mut report = controller.run(batch.records.clone()).await;
    report.absorb_rejected(batch.rejected_entries());
    snapshot::save(&directory_path, &directory.snapshot().await)?;

    assert_eq!(report.totals.succeeded, 2);
    assert_eq!(report.totals.skipped_invalid, 1);
    assert!(!report.has_problems());
    assert_eq!(report.entries[0].username, "line 4");

    let written = snapshot::load(&directory_path)?;
    let alice = written.user("alice").ok_or("alice missing")?;
    assert!(alice.groups.contains("finance"));
    assert!(!alice.groups.contains("eng"));
    assert!(written.user("bob").is_none());
    Ok(())
}

#[tokio::test]
async fn test_config_file_sets_concurrency_and_retries() -> Result<(), Box<dyn std::error::Error>>
{
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("iamsync.toml");
    std::fs::write(
        &path,
        "concurrency = 2\ndeadline_secs = 120\n\n[retry]\nmax_retries = 6\nbase_delay_ms = 50\n",
    )?;

    let config = SyncConfig::from_file(&path)?;
    config.validate()?;

    assert_eq!(config.concurrency, 2);
    assert_eq!(config.retry.max_retries, 6);
    assert_eq!(config.retry.base_delay_ms, 50);
    assert_eq!(config.retry.max_delay_ms, 10_000);
    assert_eq!(config.controller_config().concurrency, 2);
    Ok(())
}

#[test]
fn test_malformed_config_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("iamsync.toml");
    std::fs::write(&path, "concurrency = \"many\"\n")?;

    assert!(SyncConfig::from_file(&path).is_err());
    Ok(())
}
