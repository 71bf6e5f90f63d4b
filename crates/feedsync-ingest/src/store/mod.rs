//! Adapters for the durable key-value service
//!
//! - **watermark**: the single cursor recording the newest ingested batch
//! - **queue**: the outbound list receiving extracted documents
//!
//! Both Redis adapters share one [`RedisBackend`], which caps the number of
//! commands in flight at `max_connections`.

pub mod queue;
pub mod watermark;

pub use queue::{DocumentSink, MemoryDocumentQueue, RedisDocumentQueue};
pub use watermark::{MemoryWatermarkStore, RedisWatermarkStore, WatermarkStore};

use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::info;

/// Shared handle to the Redis server.
///
/// Cloning is cheap; every clone multiplexes over the same connection and
/// draws from the same pool of permits.
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
    permits: Arc<Semaphore>,
}

impl RedisBackend {
    pub async fn connect(url: &str, max_connections: usize) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        info!(max_connections, "Connected to Redis");

        Ok(Self {
            manager,
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
        })
    }

    /// Wait for a free slot and return a connection bound to it.
    ///
    /// The slot is released when the returned permit is dropped.
    pub(crate) async fn acquire(
        &self,
    ) -> Result<(OwnedSemaphorePermit, ConnectionManager), AcquireError> {
        let permit = Arc::clone(&self.permits).acquire_owned().await?;
        Ok((permit, self.manager.clone()))
    }
}
