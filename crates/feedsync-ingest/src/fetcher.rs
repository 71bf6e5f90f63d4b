//! Archive download

use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::FetchError;
use crate::types::BatchId;

/// Streams batch archives from the listing location to local files
#[derive(Debug, Clone)]
pub struct BatchFetcher {
    client: Client,
    base_url: Url,
    extension: String,
}

impl BatchFetcher {
    pub fn new(client: Client, base_url: Url, extension: impl Into<String>) -> Self {
        Self {
            client,
            base_url,
            extension: extension.into(),
        }
    }

    /// `<base path>/<id>.<ext>`, joined the way a filesystem path would be
    pub fn archive_url(&self, id: BatchId) -> Url {
        let mut url = self.base_url.clone();
        let file_name = format!("{id}.{}", self.extension);

        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&file_name);
        }
        url
    }

    /// Download `url` into a newly created file at `dest`, returning the byte count.
    ///
    /// No retry: any failure is returned to the owning batch task. `cancel`
    /// stops the download between chunks.
    pub async fn fetch(
        &self,
        url: &Url,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let cancelled = || FetchError::Cancelled {
            url: url.to_string(),
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        debug!(url = %url, dest = %dest.display(), "Downloading archive");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let io_err = |source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(io_err)?;

        info!(url = %url, bytes = written, "Downloaded archive");
        Ok(written)
    }
}
