//! Per-worker connection pools. A worker holds one connection for the whole
//! chunk; nothing is shared between concurrently running chunks.

use crate::error::PoolError;
use async_trait::async_trait;
use connectors::{
    error::ConnectorError,
    source::{SourceConnection, SourceConnector},
    target::{TargetConnection, TargetConnector},
};
use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: Send + 'static;

    async fn open(&self) -> Result<Self::Conn, ConnectorError>;

    fn describe(&self) -> String;
}

pub struct SourceFactory(pub Arc<dyn SourceConnector>);

#[async_trait]
impl ConnectionFactory for SourceFactory {
    type Conn = Box<dyn SourceConnection>;

    async fn open(&self) -> Result<Self::Conn, ConnectorError> {
        self.0.connect().await
    }

    fn describe(&self) -> String {
        format!("source:{}", self.0.name())
    }
}

pub struct TargetFactory(pub Arc<dyn TargetConnector>);

#[async_trait]
impl ConnectionFactory for TargetFactory {
    type Conn = Box<dyn TargetConnection>;

    async fn open(&self) -> Result<Self::Conn, ConnectorError> {
        self.0.connect().await
    }

    fn describe(&self) -> String {
        format!("target:{}", self.0.name())
    }
}

pub type SourcePool = ConnectionPool<SourceFactory>;
pub type TargetPool = ConnectionPool<TargetFactory>;

/// At most `size` connections exist at once; `acquire` waits for a free slot.
/// Idle connections are reused, broken ones are dropped and replaced lazily.
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<F::Conn>>,
    size: usize,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, size: usize) -> Arc<Self> {
        let size = size.max(1);
        Arc::new(ConnectionPool {
            factory,
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::with_capacity(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Fails when fewer than `workers` connections could be handed out at once.
    pub fn ensure_capacity(&self, workers: usize) -> Result<(), PoolError> {
        if self.size < workers {
            return Err(PoolError::Undersized {
                size: self.size,
                required: workers,
            });
        }
        Ok(())
    }

    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<F>, PoolError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let reused = self.lock_idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(pool = %self.factory.describe(), "Opening pooled connection");
                self.factory.open().await?
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            broken: false,
            _permit: permit,
        })
    }

    pub fn close(&self) {
        self.permits.close();
        self.lock_idle().clear();
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<F::Conn>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A connection checked out of a pool. Returned on drop unless marked broken.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Conn>,
    pool: Arc<ConnectionPool<F>>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// The connection is discarded instead of returned to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Conn;

    fn deref(&self) -> &Self::Target {
        // Only `drop` takes the connection out.
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && !self.broken
        {
            self.pool.lock_idle().push(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::memory::{MemorySource, MemoryTarget};
    use std::time::Duration;

    #[tokio::test]
    async fn test_connections_are_reused() {
        let source = MemorySource::new(Vec::new());
        let pool = SourcePool::new(SourceFactory(Arc::new(source.clone())), 2);
        {
            let _a = pool.acquire().await.unwrap();
        }
        let _b = pool.acquire().await.unwrap();
        assert_eq!(source.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_broken_connection_is_discarded() {
        let pool = TargetPool::new(TargetFactory(Arc::new(MemoryTarget::new())), 1);
        {
            let mut conn = pool.acquire().await.unwrap();
            conn.mark_broken();
        }
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_free_slot() {
        let pool = TargetPool::new(TargetFactory(Arc::new(MemoryTarget::new())), 1);
        let held = pool.acquire().await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(waiting.is_err());
        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[test]
    fn test_undersized_pool_is_rejected() {
        let pool = TargetPool::new(TargetFactory(Arc::new(MemoryTarget::new())), 2);
        assert!(matches!(
            pool.ensure_capacity(4),
            Err(PoolError::Undersized { size: 2, required: 4 })
        ));
        assert!(pool.ensure_capacity(2).is_ok());
    }
}
