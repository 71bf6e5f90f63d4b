//! Document publishing
//!
//! Walks an extracted batch in file-name order and appends every file to the
//! outbound queue. The first read or append failure stops the batch; nothing
//! already appended is withdrawn.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::PublishError;
use crate::store::DocumentSink;
use crate::types::{BatchId, Document};

/// Totals for one published batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub documents: usize,
    pub bytes: u64,
}

#[derive(Clone)]
pub struct DocumentPublisher {
    sink: Arc<dyn DocumentSink>,
}

impl DocumentPublisher {
    pub fn new(sink: Arc<dyn DocumentSink>) -> Self {
        Self { sink }
    }

    /// Emit every file under `dir` as a [`Document`] named after the file.
    ///
    /// `cancel` is checked before each document.
    pub async fn publish_dir(
        &self,
        batch: BatchId,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PublishStats, PublishError> {
        let files = list_files_blocking(dir.to_path_buf()).await?;
        let mut stats = PublishStats::default();

        for path in files {
            if cancel.is_cancelled() {
                debug!(batch_id = %batch, published = stats.documents, "Publishing cancelled");
                return Err(PublishError::Cancelled);
            }

            let content = tokio::fs::read(&path)
                .await
                .map_err(|source| PublishError::Read {
                    path: path.clone(),
                    source,
                })?;

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let document = Document::new(name, content);

            self.sink
                .append(&document)
                .await
                .map_err(|source| PublishError::Sink {
                    name: document.name.clone(),
                    source,
                })?;

            debug!(batch_id = %batch, document = %document.name, bytes = document.len(), "Published document");
            stats.documents += 1;
            stats.bytes += document.len() as u64;
        }

        info!(
            batch_id = %batch,
            documents = stats.documents,
            bytes = stats.bytes,
            "Published batch"
        );
        Ok(stats)
    }
}

/// Every non-directory entry under `dir`, in deterministic walk order
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, PublishError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|source| PublishError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;

        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

async fn list_files_blocking(dir: PathBuf) -> Result<Vec<PathBuf>, PublishError> {
    tokio::task::spawn_blocking(move || list_files(&dir))
        .await
        .map_err(|e| PublishError::Aborted(e.to_string()))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::store::MemoryDocumentQueue;
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b_dir")).unwrap();
        fs::write(dir.path().join("c.xml"), b"<c/>").unwrap();
        fs::write(dir.path().join("a.xml"), b"<a/>").unwrap();
        fs::write(dir.path().join("b_dir").join("b.xml"), b"<b/>").unwrap();
        dir
    }

    #[test]
    fn test_list_files_is_sorted_and_skips_directories() {
        let dir = tree();
        let files: Vec<_> = list_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            files,
            vec![
                PathBuf::from("a.xml"),
                PathBuf::from("b_dir/b.xml"),
                PathBuf::from("c.xml"),
            ]
        );
    }

    #[test]
    fn test_list_files_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_files(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, PublishError::Walk { .. }));
    }

    #[tokio::test]
    async fn test_publish_dir_emits_every_file() {
        let dir = tree();
        let queue = Arc::new(MemoryDocumentQueue::new());
        let publisher = DocumentPublisher::new(queue.clone());

        let stats = publisher
            .publish_dir(BatchId::new(1), dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats, PublishStats { documents: 3, bytes: 12 });
        assert_eq!(
            queue.documents(),
            vec![
                Document::new("a.xml", "<a/>"),
                Document::new("b.xml", "<b/>"),
                Document::new("c.xml", "<c/>"),
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_stops_at_first_sink_failure() {
        let dir = tree();
        let queue = Arc::new(MemoryDocumentQueue::new());
        queue.reject_name("b.xml");
        let publisher = DocumentPublisher::new(queue.clone());

        let err = publisher
            .publish_dir(BatchId::new(2), dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PublishError::Sink { ref name, source: SinkError::Rejected(_) } if name == "b.xml"
        ));
        assert_eq!(queue.documents(), vec![Document::new("a.xml", "<a/>")]);
    }

    #[tokio::test]
    async fn test_publish_stops_when_cancelled() {
        let dir = tree();
        let queue = Arc::new(MemoryDocumentQueue::new());
        let publisher = DocumentPublisher::new(queue.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = publisher
            .publish_dir(BatchId::new(3), dir.path(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Cancelled));
        assert!(queue.is_empty());
    }
}
