//! Lock manager tests against SQLite, in memory and on a shared file.

use metadata::{LockMode, LockableResource, MetadataCatalog, ResourceLocks};
use uuid::Uuid;

const DATASET: LockableResource = LockableResource::Dataset;

async fn catalog_with_dataset() -> (MetadataCatalog, Uuid) {
    let catalog = MetadataCatalog::new_in_memory()
        .await
        .expect("Failed to create in-memory catalog");
    let id = Uuid::new_v4();
    catalog
        .create_and_lock(DATASET, id, "dataset-a", "creator")
        .await
        .unwrap();
    assert!(catalog.unlock_exclusive(DATASET, id, "creator").await.unwrap());
    (catalog, id)
}

#[tokio::test]
async fn test_exclusive_lock_conflicts_with_other_flight() {
    let (catalog, id) = catalog_with_dataset().await;

    catalog.lock_exclusive(DATASET, id, "flight-a").await.unwrap();
    // same token re-locks
    catalog.lock_exclusive(DATASET, id, "flight-a").await.unwrap();

    let err = catalog
        .lock_exclusive(DATASET, id, "flight-b")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), common::ErrorKind::Conflict);
    assert!(err.is_retryable());

    assert!(catalog.unlock_exclusive(DATASET, id, "flight-a").await.unwrap());
    catalog.lock_exclusive(DATASET, id, "flight-b").await.unwrap();
    assert_eq!(
        catalog.lock_state(DATASET, id).await.unwrap().exclusive.as_deref(),
        Some("flight-b")
    );
}

#[tokio::test]
async fn test_shared_locks_accumulate() {
    let (catalog, id) = catalog_with_dataset().await;

    catalog.lock_shared(DATASET, id, "flight-a").await.unwrap();
    catalog.lock_shared(DATASET, id, "flight-b").await.unwrap();
    catalog.lock_shared(DATASET, id, "flight-a").await.unwrap();

    let state = catalog.lock_state(DATASET, id).await.unwrap();
    assert_eq!(state.exclusive, None);
    assert_eq!(state.shared, vec!["flight-a", "flight-b"]);

    let err = catalog
        .lock_exclusive(DATASET, id, "flight-c")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), common::ErrorKind::Conflict);
    // state unchanged
    assert_eq!(catalog.lock_state(DATASET, id).await.unwrap(), state);

    assert!(catalog.unlock_shared(DATASET, id, "flight-a").await.unwrap());
    assert!(catalog.unlock_shared(DATASET, id, "flight-b").await.unwrap());
    assert!(catalog.lock_state(DATASET, id).await.unwrap().is_unlocked());
}

#[tokio::test]
async fn test_shared_lock_conflicts_with_exclusive() {
    let (catalog, id) = catalog_with_dataset().await;
    catalog.lock_exclusive(DATASET, id, "flight-a").await.unwrap();

    let err = catalog.lock_shared(DATASET, id, "flight-b").await.unwrap_err();
    assert_eq!(err.kind(), common::ErrorKind::Conflict);
    // even the holder cannot add a shared lock on top
    assert!(catalog.lock_shared(DATASET, id, "flight-a").await.is_err());
}

#[tokio::test]
async fn test_unlocks_are_idempotent() {
    let (catalog, id) = catalog_with_dataset().await;
    catalog.lock_shared(DATASET, id, "flight-a").await.unwrap();

    assert!(catalog.unlock_shared(DATASET, id, "flight-a").await.unwrap());
    assert!(!catalog.unlock_shared(DATASET, id, "flight-a").await.unwrap());

    assert!(!catalog.unlock_exclusive(DATASET, id, "flight-a").await.unwrap());
    catalog.lock_exclusive(DATASET, id, "flight-a").await.unwrap();
    // wrong token is a no-op
    assert!(!catalog.unlock_exclusive(DATASET, id, "flight-b").await.unwrap());
    assert!(catalog.unlock_exclusive(DATASET, id, "flight-a").await.unwrap());
    assert!(!catalog.unlock_exclusive(DATASET, id, "flight-a").await.unwrap());

    // unlocking a missing row is also fine
    let missing = Uuid::new_v4();
    assert!(!catalog.unlock_shared(DATASET, missing, "flight-a").await.unwrap());
}

#[tokio::test]
async fn test_missing_resource_is_not_found() {
    let catalog = MetadataCatalog::new_in_memory().await.unwrap();
    let missing = Uuid::new_v4();

    for mode in [LockMode::Exclusive, LockMode::Shared] {
        let err = catalog
            .lock(DATASET, missing, mode, "flight-a")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
    assert!(catalog.retrieve_summary(DATASET, missing).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_create_and_lock() {
    let catalog = MetadataCatalog::new_in_memory().await.unwrap();
    let id = Uuid::new_v4();
    catalog
        .create_and_lock(DATASET, id, "dataset-a", "flight-a")
        .await
        .unwrap();
    // re-run by the same flight
    catalog
        .create_and_lock(DATASET, id, "dataset-a", "flight-a")
        .await
        .unwrap();

    let summary = catalog.retrieve_summary(DATASET, id).await.unwrap();
    assert_eq!(summary.name, "dataset-a");
    assert_eq!(
        summary.locks,
        ResourceLocks {
            exclusive: Some("flight-a".to_string()),
            shared: vec![],
        }
    );

    let err = catalog
        .lock_shared(DATASET, id, "flight-b")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), common::ErrorKind::Conflict);

    let err = catalog
        .create_and_lock(DATASET, Uuid::new_v4(), "dataset-a", "flight-b")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), common::ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_delete_locked_requires_the_holder() {
    let catalog = MetadataCatalog::new_in_memory().await.unwrap();
    let id = Uuid::new_v4();
    catalog
        .create_and_lock(LockableResource::Snapshot, id, "snap", "flight-a")
        .await
        .unwrap();

    assert!(!catalog.delete_locked(LockableResource::Snapshot, id, "flight-b").await.unwrap());
    assert!(catalog.delete_locked(LockableResource::Snapshot, id, "flight-a").await.unwrap());
    assert!(!catalog.delete_locked(LockableResource::Snapshot, id, "flight-a").await.unwrap());
}

#[tokio::test]
async fn test_resources_are_independent() {
    let catalog = MetadataCatalog::new_in_memory().await.unwrap();
    let id = Uuid::new_v4();
    catalog.create_and_lock(DATASET, id, "shared-name", "flight-a").await.unwrap();
    // same name in the snapshots table is fine
    catalog
        .create_and_lock(LockableResource::Snapshot, Uuid::new_v4(), "shared-name", "flight-a")
        .await
        .unwrap();
    assert!(catalog.lock_state(LockableResource::Snapshot, id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_two_workers_race_for_the_exclusive_lock() {
    let dir = tempfile::tempdir().unwrap();
    let dsn = format!("sqlite://{}", dir.path().join("catalog.db").display());

    let worker_a = MetadataCatalog::new(&dsn).await.unwrap();
    let worker_b = MetadataCatalog::new(&dsn).await.unwrap();
    let id = Uuid::new_v4();
    worker_a.create_and_lock(DATASET, id, "contended", "setup").await.unwrap();
    worker_a.unlock_exclusive(DATASET, id, "setup").await.unwrap();

    let (a, b) = tokio::join!(
        worker_a.lock_exclusive(DATASET, id, "flight-a"),
        worker_b.lock_exclusive(DATASET, id, "flight-b"),
    );
    assert!(a.is_ok() ^ b.is_ok(), "exactly one worker must win");

    let winner = if a.is_ok() { "flight-a" } else { "flight-b" };
    let state = worker_b.lock_state(DATASET, id).await.unwrap();
    assert_eq!(state.exclusive.as_deref(), Some(winner));
}
