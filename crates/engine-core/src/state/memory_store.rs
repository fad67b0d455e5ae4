use crate::{
    error::CheckpointError,
    state::{CheckpointStore, should_replace},
};
use async_trait::async_trait;
use model::pagination::checkpoint::Checkpoint;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Process-local store with the same advance rule as the sled store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, Checkpoint>>,
    saves: Mutex<Vec<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, checkpoint: Checkpoint) {
        self.entries
            .lock()
            .await
            .insert(checkpoint.job_id.clone(), checkpoint);
    }

    /// Every accepted write, in order.
    pub async fn history(&self) -> Vec<Checkpoint> {
        self.saves.lock().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.entries.lock().await.get(job_id).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<bool, CheckpointError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(&checkpoint.job_id)
            && !should_replace(existing, checkpoint)
        {
            return Ok(false);
        }
        entries.insert(checkpoint.job_id.clone(), checkpoint.clone());
        self.saves.lock().await.push(checkpoint.clone());
        Ok(true)
    }

    async fn clear(&self, job_id: &str) -> Result<(), CheckpointError> {
        self.entries.lock().await.remove(job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{execution::load::CheckpointStrategy, pagination::cursor::Cursor};

    #[tokio::test]
    async fn test_row_offsets_only_advance() {
        let store = MemoryCheckpointStore::new();
        let at = |offset| {
            Checkpoint::new("job", CheckpointStrategy::RowSkip, "run")
                .with_cursor(Cursor::RowOffset { offset }, offset)
        };
        assert!(store.save(&at(10)).await.unwrap());
        assert!(!store.save(&at(5)).await.unwrap());
        assert_eq!(store.load("job").await.unwrap().unwrap().rows_done, 10);
        assert_eq!(store.history().await.len(), 1);
    }
}
