//! Durable watermark: the newest batch whose ingestion fully completed
//!
//! Writing the watermark is the commit point of a run. An unset watermark
//! means nothing has been ingested yet.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

use super::RedisBackend;
use crate::error::StoreError;
use crate::types::BatchId;

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Current watermark, `None` when never set
    async fn get(&self) -> Result<Option<BatchId>, StoreError>;

    /// Durably record `watermark`
    async fn set(&self, watermark: BatchId) -> Result<(), StoreError>;
}

/// Watermark kept under a single Redis key as its decimal text form
#[derive(Clone)]
pub struct RedisWatermarkStore {
    backend: RedisBackend,
    key: String,
}

impl RedisWatermarkStore {
    pub fn new(backend: RedisBackend, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl WatermarkStore for RedisWatermarkStore {
    #[tracing::instrument(level = "debug", skip(self), fields(key = %self.key))]
    async fn get(&self) -> Result<Option<BatchId>, StoreError> {
        let (_permit, mut conn) = self
            .backend
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let raw: Option<String> = conn
            .get(&self.key)
            .await
            .map_err(|e| StoreError::backend("GET", e))?;

        let Some(raw) = raw else {
            debug!("Watermark not set");
            return Ok(None);
        };

        parse_watermark(&self.key, raw).map(Some)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(key = %self.key))]
    async fn set(&self, watermark: BatchId) -> Result<(), StoreError> {
        let (_permit, mut conn) = self
            .backend
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let _: () = conn
            .set(&self.key, watermark.to_string())
            .await
            .map_err(|e| StoreError::backend("SET", e))?;

        Ok(())
    }
}

/// Decode a stored watermark; anything but a bare decimal integer is rejected
pub(crate) fn parse_watermark(key: &str, raw: String) -> Result<BatchId, StoreError> {
    raw.parse::<BatchId>().map_err(|_| StoreError::InvalidValue {
        key: key.to_string(),
        value: raw,
    })
}

/// In-process watermark for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    value: Mutex<Option<BatchId>>,
    history: Mutex<Vec<BatchId>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(watermark: BatchId) -> Self {
        let store = Self::default();
        *store.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(watermark);
        store
    }

    /// Make subsequent `get` calls fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `set` calls fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn current(&self) -> Option<BatchId> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every value written through `set`, oldest first
    pub fn history(&self) -> Vec<BatchId> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self) -> Result<Option<BatchId>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(self.current())
    }

    async fn set(&self, watermark: BatchId) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(watermark);
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(watermark);
        Ok(())
    }
}
