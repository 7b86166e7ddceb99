//! Filesystem helpers shared across modules.
//!
//! These helpers attach operation + path context to IO errors and cover the
//! move semantics used when repair is disabled.

use std::path::Path;

use tracing::debug;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Size of a regular file, or `None` if it does not exist or is not a file.
pub async fn file_len(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Move a file, falling back to copy + remove when `rename` cannot cross
/// filesystems.
///
/// The source is only removed after the copy is verified by size.
pub async fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        ensure_dir_all_with_op("creating destination directory", parent).await?;
    }

    match tokio::fs::rename(source, dest).await {
        Ok(()) => return Ok(()),
        Err(e) => {
            debug!(
                source = %source.display(),
                error = %e,
                "rename failed, falling back to copy"
            );
        }
    }

    let source_len = tokio::fs::metadata(source)
        .await
        .map_err(|e| io_error("reading metadata of", source, e))?
        .len();
    let copied = tokio::fs::copy(source, dest)
        .await
        .map_err(|e| io_error("copying", source, e))?;

    if copied != source_len {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(Error::Other(format!(
            "integrity check failed moving {}: copied {} of {} bytes",
            source.display(),
            copied,
            source_len
        )));
    }

    tokio::fs::remove_file(source)
        .await
        .map_err(|e| io_error("removing", source, e))
}
