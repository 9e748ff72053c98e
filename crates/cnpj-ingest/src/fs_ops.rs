//! Filesystem helpers shared by the download and extraction stages
//!
//! Source archives are large and other processes (antivirus, indexers, a
//! previous run still shutting down) may hold them briefly, so moves,
//! hashes and deletes are retried with a short linear delay.

use crate::error::Result;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const FILE_OP_ATTEMPTS: u32 = 3;
const FILE_OP_DELAY: Duration = Duration::from_millis(500);

/// SHA-256 of a file, computed on the blocking pool
pub async fn hash_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    let hash = tokio::task::spawn_blocking(move || cnpj_common::checksum::sha256_file(&path)).await??;
    Ok(hash)
}

/// Size of a file in bytes
pub async fn file_size(path: &Path) -> Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}

/// Best-effort delete; a missing file counts as deleted and the last failure
/// is only logged.
pub async fn delete_with_retry(path: &Path) -> bool {
    for attempt in 1..=FILE_OP_ATTEMPTS {
        if attempt == FILE_OP_ATTEMPTS {
            // let other tasks drop handles they still hold on the file
            tokio::task::yield_now().await;
        }

        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(file = %path.display(), "Deleted");
                return true;
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
            Err(e) if attempt < FILE_OP_ATTEMPTS => {
                debug!(file = %path.display(), attempt, "Delete failed, retrying: {}", e);
                tokio::time::sleep(FILE_OP_DELAY * attempt).await;
            },
            Err(e) => {
                warn!(file = %path.display(), "Could not delete file: {}", e);
            },
        }
    }
    false
}

/// Rename `from` over `to`, replacing an existing destination
pub async fn move_with_retry(from: &Path, to: &Path) -> Result<()> {
    let mut attempt = 1;
    loop {
        match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < FILE_OP_ATTEMPTS => {
                warn!(
                    from = %from.display(),
                    to = %to.display(),
                    attempt,
                    "Move failed, retrying: {}",
                    e
                );
                tokio::time::sleep(FILE_OP_DELAY * attempt).await;
                attempt += 1;
            },
            Err(e) => return Err(e.into()),
        }
    }
}

pub async fn hash_with_retry(path: &Path) -> Result<String> {
    let mut attempt = 1;
    loop {
        match hash_file(path).await {
            Ok(hash) => return Ok(hash),
            Err(e) if attempt < FILE_OP_ATTEMPTS => {
                warn!(file = %path.display(), attempt, "Hashing failed, retrying: {}", e);
                tokio::time::sleep(FILE_OP_DELAY * attempt).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}
