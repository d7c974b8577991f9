use async_trait::async_trait;
use crate::application::errors::StorageError;
use crate::domain::entities::Snapshot;

/// Snapshot store trait - abstraction for engine persistence
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest saved snapshot, `None` when nothing was saved yet
    async fn load(&self) -> Result<Option<Snapshot>, StorageError>;

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError>;
}
