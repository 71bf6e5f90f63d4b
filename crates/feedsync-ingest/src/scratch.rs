//! Per-run scratch storage
//!
//! A run owns one temporary directory. Each batch task writes only beneath
//! paths keyed by its own id. The directory is removed when the
//! [`ScratchArea`] is dropped, whatever the run's outcome.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const SCRATCH_PREFIX: &str = "feedsync-";

#[derive(Debug)]
pub struct ScratchArea {
    dir: TempDir,
}

impl ScratchArea {
    /// Create a fresh scratch directory under `root`, or the system temp dir
    pub fn create(root: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            },
            None => builder.tempdir()?,
        };

        debug!(path = %dir.path().display(), "Created scratch area");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the scratch directory, reporting any failure
    pub fn close(self) -> std::io::Result<()> {
        let path: PathBuf = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => {
                debug!(path = %path.display(), "Removed scratch area");
                Ok(())
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove scratch area");
                Err(e)
            },
        }
    }
}
