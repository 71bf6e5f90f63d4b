//! Archive extraction
//!
//! Unpacks a zip archive into a destination directory, recreating the
//! directory structure and restoring unix permission bits when the archive
//! carries them. Extraction is blocking; async callers go through
//! [`extract_archive_blocking`].

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::ExtractError;

/// Extract every entry of `archive` under `dest`, returning the number of files written.
///
/// `dest` is created if missing. `cancel` is checked before each entry; once
/// it fires no further entry is written. On failure, whatever was already
/// written is left in place for the scratch-area teardown to reclaim.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<usize, ExtractError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ExtractError::Io { path, source }
    };
    let zip_err = |source| ExtractError::Archive {
        path: archive.to_path_buf(),
        source,
    };
    let cancelled = || ExtractError::Cancelled {
        path: archive.to_path_buf(),
    };

    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    let file = File::open(archive).map_err(io_err(archive))?;
    let mut zip = ZipArchive::new(file).map_err(zip_err)?;

    fs::create_dir_all(dest).map_err(io_err(dest))?;

    let mut files = 0usize;
    // Applied last so a read-only directory does not block its own entries
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    for index in 0..zip.len() {
        if cancel.is_cancelled() {
            debug!(archive = %archive.display(), files, "Extraction cancelled");
            return Err(cancelled());
        }

        let mut entry = zip.by_index(index).map_err(zip_err)?;

        let relative: PathBuf = entry.enclosed_name().ok_or_else(|| ExtractError::UnsafeEntry {
            name: entry.name().to_string(),
        })?;
        let target = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(io_err(&target))?;
            if let Some(mode) = entry.unix_mode() {
                dir_modes.push((target, mode));
            }
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let mut out = File::create(&target).map_err(io_err(&target))?;
        let bytes = io::copy(&mut entry, &mut out).map_err(io_err(&target))?;

        if let Some(mode) = entry.unix_mode() {
            restore_permissions(&target, mode).map_err(io_err(&target))?;
        }

        debug!(entry = %relative.display(), bytes, "Extracted entry");
        files += 1;
    }

    // Deepest first, so a parent's mode never gates a child's update
    dir_modes.sort_by(|(a, _), (b, _)| b.components().count().cmp(&a.components().count()));
    for (dir, mode) in dir_modes {
        restore_permissions(&dir, mode).map_err(io_err(&dir))?;
    }

    info!(archive = %archive.display(), files, "Extracted archive");
    Ok(files)
}

#[cfg(unix)]
fn restore_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
}

#[cfg(not(unix))]
fn restore_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// [`extract_archive`] on the blocking thread pool.
///
/// The returned future must be awaited to completion: dropping it does not
/// stop the blocking task, only `cancel` does.
pub async fn extract_archive_blocking(
    archive: PathBuf,
    dest: PathBuf,
    cancel: CancellationToken,
) -> Result<usize, ExtractError> {
    tokio::task::spawn_blocking(move || extract_archive(&archive, &dest, &cancel))
        .await
        .map_err(|e| ExtractError::Aborted(e.to_string()))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    /// Names ending in '/' become directory entries
    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }
        let cursor = writer.finish().unwrap();
        std::fs::write(path, cursor.into_inner()).unwrap();
    }

    #[test]
    fn test_extract_recreates_tree() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("20.zip");
        write_zip(
            &archive,
            &[
                ("posts/", ""),
                ("posts/a.xml", "<a/>"),
                ("posts/deep/b.xml", "<b/>"),
                ("c.xml", "<c/>"),
            ],
        );

        let dest = dir.path().join("20");
        let files = extract_archive(&archive, &dest, &CancellationToken::new()).unwrap();

        assert_eq!(files, 3);
        assert_eq!(fs::read(dest.join("posts/a.xml")).unwrap(), b"<a/>");
        assert_eq!(fs::read(dest.join("posts/deep/b.xml")).unwrap(), b"<b/>");
        assert_eq!(fs::read(dest.join("c.xml")).unwrap(), b"<c/>");
    }

    #[test]
    fn test_extract_into_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("21.zip");
        write_zip(&archive, &[("one.xml", "1")]);

        let dest = dir.path().join("21");
        fs::create_dir_all(&dest).unwrap();

        assert_eq!(extract_archive(&archive, &dest, &CancellationToken::new()).unwrap(), 1);
    }

    #[test]
    fn test_extract_malformed_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("22.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        let err = extract_archive(&archive, &dir.path().join("22"), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, ExtractError::Archive { .. }));
    }

    #[test]
    fn test_extract_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive(
            &dir.path().join("nope.zip"),
            &dir.path().join("x"),
            &CancellationToken::new(),
        ).unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }

    #[test]
    fn test_extract_rejects_escaping_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("23.zip");
        write_zip(&archive, &[("../escape.xml", "x")]);

        let err = extract_archive(&archive, &dir.path().join("23"), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, ExtractError::UnsafeEntry { ref name } if name == "../escape.xml"));
        assert!(!dir.path().join("escape.xml").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_restores_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("24.zip");

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("run.sh", SimpleFileOptions::default().unix_permissions(0o750))
            .unwrap();
        writer.write_all(b"#!/bin/sh\n").unwrap();
        fs::write(&archive, writer.finish().unwrap().into_inner()).unwrap();

        let dest = dir.path().join("24");
        extract_archive(&archive, &dest, &CancellationToken::new()).unwrap();

        let mode = fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_restores_directory_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("26.zip");

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .add_directory("locked/", SimpleFileOptions::default().unix_permissions(0o550))
            .unwrap();
        writer
            .start_file("locked/post.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<post/>").unwrap();
        fs::write(&archive, writer.finish().unwrap().into_inner()).unwrap();

        let dest = dir.path().join("26");
        assert_eq!(extract_archive(&archive, &dest, &CancellationToken::new()).unwrap(), 1);

        let mode = fs::metadata(dest.join("locked")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o550);
        assert_eq!(fs::read(dest.join("locked/post.xml")).unwrap(), b"<post/>");

        // Let the tempdir clean up
        fs::set_permissions(dest.join("locked"), fs::Permissions::from_mode(0o750)).unwrap();
    }

    #[test]
    fn test_extract_stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("27.zip");
        write_zip(&archive, &[("a.xml", "a"), ("b.xml", "b")]);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let dest = dir.path().join("27");
        let err = extract_archive(&archive, &dest, &cancel).unwrap_err();

        assert!(matches!(err, ExtractError::Cancelled { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_extract_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("25.zip");
        write_zip(&archive, &[("x.xml", "x"), ("y.xml", "y")]);

        let files = extract_archive_blocking(archive, dir.path().join("25"), CancellationToken::new()).await.unwrap();
        assert_eq!(files, 2);
    }
}
