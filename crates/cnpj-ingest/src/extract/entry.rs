//! Archive entry handling
//!
//! Entries are flattened to their base file name before anything touches the
//! disk, so `../../etc/passwd` and `dir\sub\file` both land inside the
//! staging directory.

use crate::error::{IngestError, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '/', '\\'];

/// Base file name of an archive entry with unsafe characters replaced by `_`.
///
/// Returns `None` when nothing usable is left (`""`, `"."`, `".."`, `"dir/"`).
pub fn sanitize_entry_name(raw: &str) -> Option<String> {
    let base = raw
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        return None;
    }

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    Some(cleaned)
}

#[derive(Debug, Default)]
pub struct UnpackedEntries {
    /// Files written to the staging directory, in archive order
    pub files: Vec<PathBuf>,
    /// Entries dropped because their name sanitized to nothing
    pub skipped: usize,
}

/// Stream every file entry of `archive` into `staging`.
///
/// Blocking; run it on the blocking pool. Cancellation is checked between
/// entries.
pub fn unpack_archive(
    archive: &Path,
    staging: &Path,
    cancel: &CancellationToken,
) -> Result<UnpackedEntries> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))?;
    let mut unpacked = UnpackedEntries::default();

    for index in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let mut entry = zip.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let raw_name = entry.name().to_string();
        let Some(name) = sanitize_entry_name(&raw_name) else {
            warn!(archive = %archive.display(), entry = %raw_name, "Entry has no usable file name, skipping");
            unpacked.skipped += 1;
            continue;
        };

        let mut target = staging.join(&name);
        if target.exists() {
            // two entries flattened onto the same base name
            target = staging.join(format!("{}_{}", index, name));
        }

        let mut writer = BufWriter::new(File::create(&target)?);
        let bytes = io::copy(&mut entry, &mut writer)?;
        writer.flush()?;
        debug!(entry = %raw_name, file = %target.display(), bytes, "Entry extracted");

        unpacked.files.push(target);
    }

    Ok(unpacked)
}
