//! Free-space guard for the work volume

use crate::error::{IngestError, Result};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Reports the bytes available to unprivileged writers on the volume holding `path`
pub trait DiskSpaceProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Free space of the volume holding the nearest existing ancestor of the path
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDiskSpace;

impl DiskSpaceProbe for SystemDiskSpace {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        fs4::available_space(nearest_existing(path)?)
    }
}

fn nearest_existing(path: &Path) -> io::Result<PathBuf> {
    path.ancestors()
        .find(|candidate| candidate.exists())
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no existing ancestor for {}", path.display()),
            )
        })
}

/// Fail with [`IngestError::DiskSpace`] when fewer than `min_free_gb` GB are
/// available. A probe that cannot answer lets the caller proceed.
pub fn ensure_free_space(probe: &dyn DiskSpaceProbe, path: &Path, min_free_gb: u64) -> Result<()> {
    match probe.available_bytes(path) {
        Ok(bytes) => {
            let available_gb = bytes / BYTES_PER_GB;
            debug!(path = %path.display(), available_gb, required_gb = min_free_gb, "Disk space check");

            if available_gb < min_free_gb {
                return Err(IngestError::DiskSpace {
                    path: path.to_path_buf(),
                    available_gb,
                    required_gb: min_free_gb,
                });
            }
            Ok(())
        },
        Err(e) => {
            warn!(path = %path.display(), "Could not determine free disk space, continuing: {}", e);
            Ok(())
        },
    }
}
