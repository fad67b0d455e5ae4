use crate::{
    error::CheckpointError,
    state::{CheckpointStore, should_replace},
};
use async_trait::async_trait;
use model::pagination::checkpoint::Checkpoint;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;
use tracing::debug;

pub struct SledCheckpointStore {
    db: sled::Db,
}

impl SledCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    #[inline]
    fn chk_key(job_id: &str) -> String {
        format!("chk:{}", job_id)
    }
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        match self.db.get(Self::chk_key(job_id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<bool, CheckpointError> {
        let key = Self::chk_key(&checkpoint.job_id);
        let new_bytes = bincode::serialize(checkpoint)?;

        // Check-then-set runs inside one transaction so concurrent savers
        // cannot move the checkpoint backwards.
        let result = self
            .db
            .transaction::<_, _, CheckpointError>(|tx_db| {
                if let Some(existing_bytes) = tx_db.get(&key)? {
                    let existing: Checkpoint = bincode::deserialize(&existing_bytes)
                        .map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
                    if !should_replace(&existing, checkpoint) {
                        return Ok(false);
                    }
                }
                tx_db.insert(key.as_bytes(), new_bytes.as_slice())?;
                Ok(true)
            });

        let written = match result {
            Ok(written) => written,
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(e.into()),
        };
        if written {
            self.db.flush_async().await?;
        } else {
            debug!(job_id = %checkpoint.job_id, "Stored checkpoint is ahead; keeping it");
        }
        Ok(written)
    }

    async fn clear(&self, job_id: &str) -> Result<(), CheckpointError> {
        self.db.remove(Self::chk_key(job_id))?;
        self.db.flush_async().await?;
        Ok(())
    }
}
