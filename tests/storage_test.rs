//! Snapshot persistence integration tests
//! Run with: cargo test --test storage_test

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use leviatan_bot::application::errors::{EngineError, StorageError};
use leviatan_bot::domain::entities::{ProposedArticle, Snapshot};
use leviatan_bot::domain::rules::ProposalState;
use leviatan_bot::domain::traits::{ManualClock, SnapshotStore};
use leviatan_bot::infrastructure::storage::{JsonSnapshotStore, MemoryStore};
use leviatan_bot::{Config, Engine};

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

struct BrokenStore;

#[async_trait]
impl SnapshotStore for BrokenStore {
    async fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        Ok(None)
    }

    async fn save(&self, _snapshot: &Snapshot) -> Result<(), StorageError> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        )))
    }
}

/// Memory store whose saves fail while `broken` is set
#[derive(Default)]
struct SwitchableStore {
    inner: MemoryStore,
    broken: AtomicBool,
}

#[async_trait]
impl SnapshotStore for SwitchableStore {
    async fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        self.inner.load().await
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save(snapshot).await
    }
}

#[tokio::test]
async fn test_engine_state_survives_restart() {
    ensure_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("leviatan.json");
    let clock = Arc::new(ManualClock::default());

    let first = Engine::new(
        Config::default(),
        Arc::new(JsonSnapshotStore::new(&path)),
        clock.clone(),
    );
    first.load().await.unwrap();
    for voter in ["ana", "ben", "cai"] {
        first.add_voter(voter).await.unwrap();
    }
    first.delegate("ana", "ben", 300, true).await.unwrap();
    first.subdelegate("ben", "cai", 120).await.unwrap();
    first.add_article("1", "Equal vote", 1.0, 100).await.unwrap();
    let id = first
        .create_proposal("ana", "Amend 1", vec![ProposedArticle::new("1", "Equal voice")], vec![])
        .await
        .unwrap();
    first.transition(&id, ProposalState::Gathering).await.unwrap();
    first.flush().await.unwrap();
    assert!(path.exists());
    assert!(first.last_save_error().is_none());

    let second = Engine::new(
        Config::default(),
        Arc::new(JsonSnapshotStore::new(&path)),
        clock.clone(),
    );
    second.load().await.unwrap();

    assert_eq!(second.voter_count().await, 3);
    assert!(second.ledger_is_consistent().await);
    for voter in ["ana", "ben", "cai"] {
        assert_eq!(
            second.get_voter_snapshot(voter).await,
            first.get_voter_snapshot(voter).await
        );
    }
    assert_eq!(
        second.subdelegable_by_source("cai").await,
        first.subdelegable_by_source("cai").await
    );
    assert_eq!(second.article("1").await.unwrap().last_turnout(), 100);
    assert_eq!(second.proposal(&id).await.unwrap().state, ProposalState::Gathering);
    assert_eq!(
        second.get_article_requirements("1").await.unwrap(),
        first.get_article_requirements("1").await.unwrap()
    );
}

#[tokio::test]
async fn test_missing_or_empty_file_starts_fresh() {
    ensure_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leviatan.json");

    let engine = Engine::new(
        Config::default(),
        Arc::new(JsonSnapshotStore::new(&path)),
        Arc::new(ManualClock::default()),
    );
    engine.load().await.unwrap();
    assert_eq!(engine.voter_count().await, 0);

    std::fs::write(&path, "").unwrap();
    engine.load().await.unwrap();
    assert_eq!(engine.articles().await.len(), 1);
}

#[tokio::test]
async fn test_corrupt_file_fails_to_load() {
    ensure_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leviatan.json");
    std::fs::write(&path, "{ not json").unwrap();

    let engine = Engine::new(
        Config::default(),
        Arc::new(JsonSnapshotStore::new(&path)),
        Arc::new(ManualClock::default()),
    );
    assert!(matches!(engine.load().await, Err(EngineError::Persistence(_))));
}

#[tokio::test]
async fn test_failed_saves_are_reported() {
    ensure_init();
    let engine = Engine::new(
        Config::default(),
        Arc::new(BrokenStore),
        Arc::new(ManualClock::default()),
    );
    engine.load().await.unwrap();

    // the mutation itself succeeds, only the save fails
    assert!(engine.add_voter("ana").await.unwrap());
    assert!(matches!(engine.flush().await, Err(EngineError::Persistence(_))));
    assert!(engine
        .last_save_error()
        .map(|e| e.contains("read-only volume"))
        .unwrap_or(false));
    assert!(engine.get_voter_snapshot("ana").await.is_some());
}

#[tokio::test]
async fn test_failed_flush_is_recorded() {
    ensure_init();
    let store = Arc::new(SwitchableStore::default());
    let engine = Engine::new(Config::default(), store.clone(), Arc::new(ManualClock::default()));
    engine.load().await.unwrap();
    engine.add_voter("ana").await.unwrap();
    engine.flush().await.unwrap();
    assert!(engine.last_save_error().is_none());

    // no queued saves: only the flush itself can report the failure
    store.broken.store(true, Ordering::SeqCst);
    assert!(engine.flush().await.is_err());
    assert!(engine
        .last_save_error()
        .map(|e| e.contains("disk full"))
        .unwrap_or(false));

    store.broken.store(false, Ordering::SeqCst);
    engine.flush().await.unwrap();
    assert!(engine.last_save_error().is_none());
}
