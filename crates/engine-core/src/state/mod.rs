use crate::error::CheckpointError;
use async_trait::async_trait;
use model::pagination::checkpoint::Checkpoint;

pub mod memory_store;
pub mod sled_store;

pub use memory_store::MemoryCheckpointStore;
pub use sled_store::SledCheckpointStore;

/// Durable record of how far each job has safely committed.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Stores `checkpoint` unless the stored one for the same job definition
    /// is already further ahead. Returns whether the write happened.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<bool, CheckpointError>;

    async fn clear(&self, job_id: &str) -> Result<(), CheckpointError>;
}

/// The advance rule shared by every store.
pub(crate) fn should_replace(existing: &Checkpoint, candidate: &Checkpoint) -> bool {
    if existing.fingerprint != candidate.fingerprint || existing.strategy != candidate.strategy {
        return true;
    }
    !existing.cursor.is_ahead_of(&candidate.cursor)
}
