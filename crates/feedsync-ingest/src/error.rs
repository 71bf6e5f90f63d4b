//! Error types for the ingestion pipeline
//!
//! Each component has its own error enum. A batch task wraps whatever stopped
//! it in [`BatchError`]; the orchestrator surfaces run-level failures as
//! [`IngestError`].

use crate::types::{BatchId, BatchState};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for a whole ingestion run
pub type Result<T> = std::result::Result<T, IngestError>;

/// Listing could not be fetched or interpreted
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("failed to fetch listing {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("listing {url} returned HTTP {status}")]
    Status { url: String, status: reqwest::StatusCode },

    #[error("invalid link selector: {0}")]
    Selector(String),

    #[error("link '{href}' does not carry a numeric batch id: {source}")]
    InvalidBatchId {
        href: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Watermark store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis {op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: redis::RedisError,
    },

    #[error("watermark '{key}' holds a non-integer value '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("watermark store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn backend(op: &'static str, source: redis::RedisError) -> Self {
        Self::Backend { op, source }
    }
}

/// Outbound queue failures
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("redis {op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: redis::RedisError,
    },

    #[error("queue rejected document: {0}")]
    Rejected(String),
}

/// Archive download failures
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to download {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} returned HTTP {status}")]
    Status { url: String, status: reqwest::StatusCode },

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download of {url} cancelled")]
    Cancelled { url: String },
}

/// Archive unpacking failures
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("malformed archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive entry '{name}' escapes the extraction directory")]
    UnsafeEntry { name: String },

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction of {} cancelled", .path.display())]
    Cancelled { path: PathBuf },

    #[error("extraction task aborted: {0}")]
    Aborted(String),
}

/// Failures while emitting an extracted tree to the queue
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to walk {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append document '{name}': {source}")]
    Sink {
        name: String,
        #[source]
        source: SinkError,
    },

    #[error("directory walk aborted: {0}")]
    Aborted(String),

    #[error("publishing cancelled")]
    Cancelled,
}

/// Why a batch task stopped before succeeding
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    /// A sibling failed under fail-fast before this batch started
    #[error("abandoned before starting")]
    Abandoned,
}

impl BatchError {
    /// The step that was running when the error occurred
    pub fn state(&self) -> BatchState {
        match self {
            BatchError::Abandoned => BatchState::Created,
            BatchError::Fetch(_) => BatchState::Fetching,
            BatchError::Extract(_) => BatchState::Extracting,
            BatchError::Publish(_) => BatchState::Publishing,
        }
    }

    /// True when the batch stopped because the run was cancelled, not because it failed
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            BatchError::Abandoned
                | BatchError::Fetch(FetchError::Cancelled { .. })
                | BatchError::Extract(ExtractError::Cancelled { .. })
                | BatchError::Publish(PublishError::Cancelled)
        )
    }
}

/// A batch task that ended in `Failed`
#[derive(Error, Debug)]
#[error("batch {id} failed while {}: {error}", .error.state())]
pub struct BatchFailure {
    pub id: BatchId,
    #[source]
    pub error: BatchError,
}

/// Run-level failure; the watermark is never advanced when one is returned
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scratch storage error: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("Watermark store error: {0}")]
    Store(#[from] StoreError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Failed to commit watermark {watermark}: {source}")]
    Commit {
        watermark: BatchId,
        #[source]
        source: StoreError,
    },

    #[error("{} of {pending} batches failed; watermark left unchanged", .failures.len())]
    BatchesFailed {
        pending: usize,
        failures: Vec<BatchFailure>,
    },
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Process exit code: `2` when only batch tasks failed, `1` otherwise
    pub fn exit_code(&self) -> u8 {
        match self {
            IngestError::BatchesFailed { .. } => 2,
            _ => 1,
        }
    }
}
