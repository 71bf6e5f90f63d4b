//! Ingestion orchestrator
//!
//! One run:
//!
//! 1. Create the run's scratch area
//! 2. Read the watermark
//! 3. Discover every published batch
//! 4. Keep the batches newer than the watermark (the pending set)
//! 5. Fetch, extract and publish each pending batch, at most `concurrency`
//!    at a time
//! 6. Advance the watermark to the newest pending batch, but only when every
//!    batch task succeeded
//!
//! A failed run leaves the watermark untouched, so the next run retries the
//! same pending set. Documents from batches that did succeed may already be
//! on the queue and will be published again (at-least-once delivery).

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{FailurePolicy, IngestConfig};
use crate::discovery::ListingDiscoverer;
use crate::error::{BatchError, BatchFailure, IngestError, Result, StoreError};
use crate::extractor::extract_archive_blocking;
use crate::fetcher::BatchFetcher;
use crate::publisher::DocumentPublisher;
use crate::scratch::ScratchArea;
use crate::store::{
    DocumentSink, RedisBackend, RedisDocumentQueue, RedisWatermarkStore, WatermarkStore,
};
use crate::types::{Batch, BatchId, BatchState};

/// Batches newer than `watermark`, ascending. An unset watermark selects everything.
pub fn pending_batches(discovered: &[BatchId], watermark: Option<BatchId>) -> Vec<BatchId> {
    let mut pending: Vec<BatchId> = discovered
        .iter()
        .copied()
        .filter(|id| watermark.map_or(true, |w| *id > w))
        .collect();
    pending.sort_unstable();
    pending.dedup();
    pending
}

/// Watermark and pending set as seen at the start of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSet {
    pub watermark: Option<BatchId>,
    pub discovered: usize,
    pub pending: Vec<BatchId>,
}

/// Outcome of one successful batch task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub id: BatchId,
    pub archive_bytes: u64,
    pub files_extracted: usize,
    pub documents: usize,
    pub document_bytes: u64,
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub previous: Option<BatchId>,
    pub discovered: usize,
    pub pending: Vec<BatchId>,
    /// New watermark, `None` when there was nothing to ingest
    pub committed: Option<BatchId>,
    pub batches: Vec<BatchReport>,
}

impl RunReport {
    pub fn documents(&self) -> usize {
        self.batches.iter().map(|b| b.documents).sum()
    }
}

/// Runs watermark-based incremental ingestion
pub struct Ingestor {
    config: IngestConfig,
    discoverer: ListingDiscoverer,
    fetcher: BatchFetcher,
    publisher: DocumentPublisher,
    store: Arc<dyn WatermarkStore>,
}

impl Ingestor {
    /// Build an ingestor around explicit store and queue handles
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn WatermarkStore>,
        sink: Arc<dyn DocumentSink>,
    ) -> Result<Self> {
        config.validate()?;

        let listing_url = config.listing_url()?;
        let client = config.http_client()?;

        let discoverer =
            ListingDiscoverer::new(client.clone(), listing_url.clone(), &config.archive_extension);
        let fetcher = BatchFetcher::new(client, listing_url, &config.archive_extension);

        Ok(Self {
            config,
            discoverer,
            fetcher,
            publisher: DocumentPublisher::new(sink),
            store,
        })
    }

    /// Build an ingestor backed by the configured Redis server
    pub async fn connect(config: IngestConfig) -> Result<Self> {
        config.validate()?;

        let backend = RedisBackend::connect(&config.redis_url, config.max_connections)
            .await
            .map_err(|e| StoreError::backend("connect", e))?;

        let store = Arc::new(RedisWatermarkStore::new(backend.clone(), &config.watermark_key));
        let sink = Arc::new(RedisDocumentQueue::new(backend, &config.queue_name));

        Self::new(config, store, sink)
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Read the watermark and discover, without ingesting anything
    pub async fn pending(&self) -> Result<PendingSet> {
        let watermark = self.store.get().await?;
        info!(watermark = ?watermark, "Read watermark");

        let discovered = self.discoverer.discover().await?;
        let pending = pending_batches(&discovered, watermark);

        Ok(PendingSet {
            watermark,
            discovered: discovered.len(),
            pending,
        })
    }

    /// Perform one ingestion run
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunReport> {
        let started_at = Utc::now();
        info!(listing = %self.discoverer.listing_url(), "Starting ingestion run");

        // Dropping the scratch area removes it, so every early return below
        // cleans up too.
        let scratch =
            ScratchArea::create(self.config.scratch_root.as_deref()).map_err(IngestError::Scratch)?;

        let plan = self.pending().await?;

        // Pending is ascending, so its last id is the commit candidate
        let Some(&newest) = plan.pending.last() else {
            info!(watermark = ?plan.watermark, "No new batches");
            scratch.close().map_err(IngestError::Scratch)?;
            return Ok(RunReport {
                run_id,
                started_at,
                finished_at: Utc::now(),
                previous: plan.watermark,
                discovered: plan.discovered,
                pending: Vec::new(),
                committed: None,
                batches: Vec::new(),
            });
        };

        info!(
            pending = plan.pending.len(),
            oldest = %plan.pending[0],
            newest = %newest,
            concurrency = self.config.concurrency,
            "Ingesting pending batches"
        );

        let outcomes = self.ingest_all(&plan.pending, scratch.path()).await;

        let mut batches = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(report) => batches.push(report),
                Err(failure) => failures.push(failure),
            }
        }

        if !failures.is_empty() {
            error!(
                failed = failures.len(),
                succeeded = batches.len(),
                pending = plan.pending.len(),
                watermark = ?plan.watermark,
                "Run failed; watermark not advanced"
            );
            return Err(IngestError::BatchesFailed {
                pending: plan.pending.len(),
                failures,
            });
        }

        // Every pending batch succeeded
        let watermark = newest;

        self.store
            .set(watermark)
            .await
            .map_err(|source| IngestError::Commit { watermark, source })?;

        info!(previous = ?plan.watermark, watermark = %watermark, "Committed watermark");

        scratch.close().map_err(IngestError::Scratch)?;

        batches.sort_by_key(|b| b.id);
        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            previous: plan.watermark,
            discovered: plan.discovered,
            pending: plan.pending,
            committed: Some(watermark),
            batches,
        })
    }

    /// Run one task per pending batch through a bounded pool.
    ///
    /// Under fail-fast the first failure cancels the remaining tasks, but
    /// every task is still driven to completion so none is left writing into
    /// scratch storage after this returns. Cancelled tasks are not reported.
    async fn ingest_all(
        &self,
        pending: &[BatchId],
        scratch: &Path,
    ) -> Vec<std::result::Result<BatchReport, BatchFailure>> {
        let cancel = CancellationToken::new();
        let mut tasks = stream::iter(pending.iter().copied())
            .map(|id| self.ingest_batch(id, scratch, &cancel))
            .buffer_unordered(self.config.concurrency);

        let mut outcomes = Vec::with_capacity(pending.len());
        let mut abandoned = 0usize;

        while let Some(outcome) = tasks.next().await {
            match outcome {
                Err(failure) if failure.error.is_cancelled() => abandoned += 1,
                outcome => {
                    let failed = outcome.is_err();
                    outcomes.push(outcome);

                    if failed
                        && self.config.failure_policy == FailurePolicy::FailFast
                        && !cancel.is_cancelled()
                    {
                        warn!("Batch failed; cancelling remaining batches");
                        cancel.cancel();
                    }
                },
            }
        }

        if abandoned > 0 {
            warn!(abandoned, "Batches abandoned after an earlier failure");
        }

        outcomes
    }

    async fn ingest_batch(
        &self,
        id: BatchId,
        scratch: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<BatchReport, BatchFailure> {
        if cancel.is_cancelled() {
            return Err(BatchFailure {
                id,
                error: BatchError::Abandoned,
            });
        }

        let batch = Batch::new(
            id,
            self.fetcher.archive_url(id),
            scratch,
            &self.config.archive_extension,
        );
        let span = info_span!("batch", batch_id = %id);

        async move {
            debug!(state = %BatchState::Created, url = %batch.source_url, "Batch task started");

            match self.process(&batch, cancel).await {
                Ok(report) => {
                    debug!(state = %BatchState::Succeeded, "Batch task finished");
                    Ok(report)
                },
                Err(error) if error.is_cancelled() => {
                    debug!(
                        state = %BatchState::Failed,
                        cancelled_while = %error.state(),
                        "Batch task cancelled"
                    );
                    Err(BatchFailure { id, error })
                },
                Err(error) => {
                    error!(
                        state = %BatchState::Failed,
                        failed_while = %error.state(),
                        error = %error,
                        "Batch task failed"
                    );
                    Err(BatchFailure { id, error })
                },
            }
        }
        .instrument(span)
        .await
    }

    /// Fetch, extract and publish, stopping at the first error
    async fn process(
        &self,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> std::result::Result<BatchReport, BatchError> {
        debug!(state = %BatchState::Fetching);
        let archive_bytes = self
            .fetcher
            .fetch(&batch.source_url, &batch.archive_path, cancel)
            .await?;

        debug!(state = %BatchState::Extracting);
        let files_extracted = extract_archive_blocking(
            batch.archive_path.clone(),
            batch.extract_dir.clone(),
            cancel.clone(),
        )
        .await?;

        debug!(state = %BatchState::Publishing);
        let stats = self
            .publisher
            .publish_dir(batch.id, &batch.extract_dir, cancel)
            .await?;

        Ok(BatchReport {
            id: batch.id,
            archive_bytes,
            files_extracted,
            documents: stats.documents,
            document_bytes: stats.bytes,
        })
    }
}
