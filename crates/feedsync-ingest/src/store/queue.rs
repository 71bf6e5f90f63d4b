//! Outbound document queue
//!
//! Documents are appended to a named list as two positional fields, the
//! document name followed by its content. Delivery is at-least-once: a run
//! that fails after publishing some batches publishes them again next time.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::RedisBackend;
use crate::error::SinkError;
use crate::types::Document;

#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Append one document to the queue
    async fn append(&self, document: &Document) -> Result<(), SinkError>;
}

/// Redis list fed with `RPUSH <queue> <name> <content>`
#[derive(Clone)]
pub struct RedisDocumentQueue {
    backend: RedisBackend,
    queue: String,
}

impl RedisDocumentQueue {
    pub fn new(backend: RedisBackend, queue: impl Into<String>) -> Self {
        Self {
            backend,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

#[async_trait]
impl DocumentSink for RedisDocumentQueue {
    async fn append(&self, document: &Document) -> Result<(), SinkError> {
        let (_permit, mut conn) = self
            .backend
            .acquire()
            .await
            .map_err(|e| SinkError::Rejected(e.to_string()))?;

        let _: i64 = redis::cmd("RPUSH")
            .arg(&self.queue)
            .arg(&document.name)
            .arg(document.content.as_slice())
            .query_async(&mut conn)
            .await
            .map_err(|source| SinkError::Backend { op: "RPUSH", source })?;

        Ok(())
    }
}

/// In-process queue that records every appended document
#[derive(Debug, Default)]
pub struct MemoryDocumentQueue {
    documents: Mutex<Vec<Document>>,
    appends: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
    reject_names: Mutex<Vec<String>>,
}

impl MemoryDocumentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every append once `count` documents have been accepted
    pub fn fail_after(&self, count: usize) {
        *self.fail_after.lock().unwrap_or_else(|e| e.into_inner()) = Some(count);
    }

    /// Reject any document carrying `name`
    pub fn reject_name(&self, name: impl Into<String>) {
        self.reject_names
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.into());
    }

    /// Accepted documents in append order
    pub fn documents(&self) -> Vec<Document> {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentSink for MemoryDocumentQueue {
    async fn append(&self, document: &Document) -> Result<(), SinkError> {
        let rejected = self
            .reject_names
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&document.name);
        if rejected {
            return Err(SinkError::Rejected(format!("name '{}' is rejected", document.name)));
        }

        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        let limit = *self.fail_after.lock().unwrap_or_else(|e| e.into_inner());
        if limit.is_some_and(|limit| documents.len() >= limit) {
            return Err(SinkError::Rejected("queue is full".to_string()));
        }

        documents.push(document.clone());
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
