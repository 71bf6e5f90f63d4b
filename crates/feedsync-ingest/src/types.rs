//! Core value types shared by the ingestion pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// Identifier of one published archive.
///
/// Derived from the archive's file name (a timestamp in practice) and used as
/// the ordering key for watermark comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(u64);

impl BatchId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for BatchId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for BatchId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress of a single batch task.
///
/// `Created -> Fetching -> Extracting -> Publishing -> Succeeded`, or
/// `Failed` from whichever step raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Created,
    Fetching,
    Extracting,
    Publishing,
    Succeeded,
    Failed,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchState::Succeeded | BatchState::Failed)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Created => "created",
            BatchState::Fetching => "fetching",
            BatchState::Extracting => "extracting",
            BatchState::Publishing => "publishing",
            BatchState::Succeeded => "succeeded",
            BatchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One unit of work: an archive and the scratch paths it owns for the run
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: BatchId,
    pub source_url: Url,
    pub archive_path: PathBuf,
    pub extract_dir: PathBuf,
}

impl Batch {
    /// Lay out the scratch paths for `id` under `scratch_root`.
    ///
    /// Archive and extraction directory are keyed by the id, so concurrent
    /// batches never share a path.
    pub fn new(id: BatchId, source_url: Url, scratch_root: &Path, extension: &str) -> Self {
        Self {
            id,
            source_url,
            archive_path: scratch_root.join(format!("{id}.{extension}")),
            extract_dir: scratch_root.join(id.to_string()),
        }
    }
}

/// A named file extracted from a batch, as sent to the outbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub content: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_parse_and_order() {
        let mut ids: Vec<BatchId> = ["30", "10", "20"].iter().map(|s| s.parse().unwrap()).collect();
        ids.sort();
        assert_eq!(ids, vec![BatchId::new(10), BatchId::new(20), BatchId::new(30)]);
        assert!("abc".parse::<BatchId>().is_err());
        assert!("-5".parse::<BatchId>().is_err());
    }

    #[test]
    fn test_batch_paths_are_keyed_by_id() {
        let url = Url::parse("http://feed.example/posts/1500.zip").unwrap();
        let batch = Batch::new(BatchId::new(1500), url, Path::new("/tmp/scratch"), "zip");

        assert_eq!(batch.archive_path, PathBuf::from("/tmp/scratch/1500.zip"));
        assert_eq!(batch.extract_dir, PathBuf::from("/tmp/scratch/1500"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(BatchState::Succeeded.is_terminal());
        assert!(BatchState::Failed.is_terminal());
        assert!(!BatchState::Publishing.is_terminal());
        assert_eq!(BatchState::Extracting.to_string(), "extracting");
    }
}
