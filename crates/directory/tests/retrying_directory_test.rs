//! Integration tests for the retry decorator over the in-memory directory.
//!
//! These tests verify that:
//! - Throttled calls are retried as the same command and eventually succeed
//! - Exhausted retries surface as a non-transient error
//! - Non-transient responses are returned on the first attempt

use std::sync::Arc;

use iamsync_directory::{
    DirectoryClient, DirectoryError, DirectoryState, EntityKind, ErrorClass, InMemoryDirectory,
    Operation, RetryPolicy, RetryingDirectory, UserEntry,
};

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, 1, 5).with_jitter(0.0)
}

fn seeded() -> Arc<InMemoryDirectory> {
    Arc::new(InMemoryDirectory::new(
        DirectoryState::new("123456789012")
            .with_group("eng")
            .with_user("alice", UserEntry::default().in_group("eng")),
    ))
}

/// # GIVEN
/// A directory that throttles the first two group listings
///
/// # WHEN
/// The groups are listed through the retry decorator
///
/// # THEN
/// The call succeeds and the underlying directory saw three attempts
#[tokio::test]
async fn test_throttled_call_is_retried_transparently() -> Result<(), Box<dyn std::error::Error>> {
    let memory = seeded();
    memory
        .inject_fault(
            Operation::ListGroups,
            Some("alice"),
            DirectoryError::throttled("Rate exceeded"),
            2,
        )
        .await;
    let client = RetryingDirectory::new(memory.clone(), fast_policy(3));

    let groups = client.list_groups("alice").await?;

    assert!(groups.contains("eng"));
    assert_eq!(memory.call_count(Operation::ListGroups).await, 3);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_escalate() -> Result<(), Box<dyn std::error::Error>> {
    let memory = seeded();
    memory
        .inject_fault(
            Operation::AddToGroup,
            None,
            DirectoryError::transient("connection reset"),
            10,
        )
        .await;
    let client = RetryingDirectory::new(memory.clone(), fast_policy(2));

    let err = client.add_to_group("alice", "eng").await.err();

    match err {
        Some(DirectoryError::RetriesExhausted {
            operation,
            attempts,
            ..
        }) => {
            assert_eq!(operation, Operation::AddToGroup);
            assert_eq!(attempts, 3);
        }
        other => return Err(format!("expected RetriesExhausted, got {other:?}").into()),
    }
    assert_eq!(memory.call_count(Operation::AddToGroup).await, 3);
    Ok(())
}

#[tokio::test]
async fn test_not_found_is_not_retried() -> Result<(), Box<dyn std::error::Error>> {
    let memory = seeded();
    let client = RetryingDirectory::new(memory.clone(), fast_policy(5));

    let err = client.list_groups("nobody").await.err();

    assert!(err.as_ref().is_some_and(|e| e.is_missing(EntityKind::User)));
    assert_eq!(err.map(|e| e.class()), Some(ErrorClass::NotFound));
    assert_eq!(memory.call_count(Operation::ListGroups).await, 1);
    Ok(())
}

#[tokio::test]
async fn test_decorator_works_behind_trait_object() -> Result<(), Box<dyn std::error::Error>> {
    let memory = seeded();
    let client: Arc<dyn DirectoryClient> =
        Arc::new(RetryingDirectory::new(memory.clone(), RetryPolicy::no_retry()));

    assert_eq!(client.account_scope_id().await?, "123456789012");
    assert!(client.user_exists("alice").await?);
    assert!(!client.user_exists("bob").await?);
    Ok(())
}
