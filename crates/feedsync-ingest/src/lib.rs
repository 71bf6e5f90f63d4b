//! Feedsync Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental ingestion of dated archive batches published on a remote
//! directory listing.
//!
//! # Pipeline
//!
//! - **discovery**: list the batch ids linked from the listing page
//! - **store**: the durable watermark and the outbound document queue
//! - **fetcher**: download one batch archive into scratch storage
//! - **extractor**: unpack an archive into a scratch directory
//! - **publisher**: emit every extracted file as a document
//! - **orchestrator**: tie the above together and commit the watermark only
//!   when every batch of the run succeeded
//!
//! # Example
//!
//! ```no_run
//! use feedsync_ingest::{IngestConfig, Ingestor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ingestor = Ingestor::connect(IngestConfig::default()).await?;
//!     let report = ingestor.run().await?;
//!     println!("committed watermark: {:?}", report.committed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod orchestrator;
pub mod publisher;
pub mod scratch;
pub mod store;
pub mod types;

pub use config::{FailurePolicy, IngestConfig};
pub use error::{IngestError, Result};
pub use orchestrator::{pending_batches, BatchReport, Ingestor, PendingSet, RunReport};
pub use types::{Batch, BatchId, BatchState, Document};
