//! Promotion of staged encoder output to its final location.
//!
//! A final output file is either absent or complete: same-volume moves use a
//! rename, cross-volume moves copy to a hidden sibling first and rename that.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Errors that can occur while promoting an output.
#[derive(Debug, Error)]
pub enum PromoteError {
    /// The encoder reported success but left no output behind.
    #[error("Encoder produced no output at {}", .0.display())]
    MissingOutput(PathBuf),

    /// Copying across volumes failed.
    #[error("Failed to copy {} to {}: {source}", from.display(), to.display())]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Renaming into place failed.
    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Move `temp` to `final_path`, returning the size of the final file.
///
/// An existing file at `final_path` is replaced.
pub async fn promote_output(temp: &Path, final_path: &Path) -> Result<u64, PromoteError> {
    let size = match fs::metadata(temp).await {
        Ok(meta) => meta.len(),
        Err(_) => return Err(PromoteError::MissingOutput(temp.to_path_buf())),
    };

    if let Some(parent) = final_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| PromoteError::RenameFailed {
                    from: temp.to_path_buf(),
                    to: final_path.to_path_buf(),
                    source,
                })?;
        }
    }

    match fs::rename(temp, final_path).await {
        Ok(()) => {
            debug!(from = %temp.display(), to = %final_path.display(), "Promoted output");
            Ok(size)
        }
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                from = %temp.display(),
                to = %final_path.display(),
                "Rename crosses volumes, copying"
            );
            copy_then_rename(temp, final_path).await?;
            Ok(size)
        }
        Err(source) => Err(PromoteError::RenameFailed {
            from: temp.to_path_buf(),
            to: final_path.to_path_buf(),
            source,
        }),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

/// Hidden sibling of `final_path` used while copying
fn staging_sibling(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{}.partial", name))
}

async fn copy_then_rename(src: &Path, dst: &Path) -> Result<(), PromoteError> {
    let staging = staging_sibling(dst);

    if let Err(source) = fs::copy(src, &staging).await {
        remove_if_exists(&staging).await;
        return Err(PromoteError::CopyFailed {
            from: src.to_path_buf(),
            to: staging,
            source,
        });
    }

    if let Err(source) = fs::rename(&staging, dst).await {
        remove_if_exists(&staging).await;
        return Err(PromoteError::RenameFailed {
            from: staging,
            to: dst.to_path_buf(),
            source,
        });
    }

    remove_if_exists(src).await;
    Ok(())
}

/// Delete a file, treating "already gone" as success.
///
/// Failures are logged, never returned: leftover staging files do not affect
/// job outcomes.
pub async fn remove_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}
