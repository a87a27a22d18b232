use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::StoreConfig;
use crate::repo::{RepoError, RepoResult};

/// Fixed-capacity admission pool for the in-memory store.
///
/// Each repository operation holds one [`PoolGuard`] for its whole duration,
/// mirroring one pooled connection per operation on the Postgres backend.
#[derive(Clone, Debug)]
pub struct StorePool {
    permits: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
}

/// A checked-out slot; returned to the pool on drop.
#[derive(Debug)]
pub struct PoolGuard {
    _permit: OwnedSemaphorePermit,
}

impl StorePool {
    pub fn new(capacity: usize, acquire_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self { permits: Arc::new(Semaphore::new(capacity)), capacity, acquire_timeout }
    }

    pub fn from_config(cfg: &StoreConfig) -> Self {
        Self::new(cfg.max_connections as usize, cfg.acquire_timeout)
    }

    /// Waits for a free slot, up to the configured acquire timeout.
    pub async fn acquire(&self) -> RepoResult<PoolGuard> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                log::error!("store pool exhausted: no slot within {:?}", self.acquire_timeout);
                RepoError::Internal("pool timed out".into())
            })?
            .map_err(|_| RepoError::Internal("pool closed".into()))?;
        Ok(PoolGuard { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for StorePool {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}
