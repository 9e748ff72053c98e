//! Archive extractor
//!
//! Unpacks every downloaded archive into a private staging directory,
//! recognizes the CSVs among its entries and moves them into the shared
//! extraction directory as `<archive base name>_<entry name>`.
//!
//! Archives are handled one at a time. A failing archive is recorded as
//! `Error` in the file-state store and the stage moves on.

pub mod entry;
pub mod inference;
pub mod validation;

pub use entry::{sanitize_entry_name, unpack_archive, UnpackedEntries};
pub use inference::{infer_csv_path, looks_like_csv};
pub use validation::{validate_structure, DEFAULT_VALIDATION_LINES};

use crate::download::{ensure_free_space, DiskSpaceProbe};
use crate::error::{IngestError, Result};
use crate::fs_ops::{delete_with_retry, file_size, hash_file, hash_with_retry, move_with_retry};
use crate::reader::TextEncoding;
use crate::state::{DownloadStatus, FileRecord, FileStateStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SUMMARY_ERROR_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub downloads_dir: PathBuf,
    pub extracted_dir: PathBuf,
    /// Parent of the per-archive staging directories
    pub staging_dir: PathBuf,
    pub delete_archive_after_extraction: bool,
    pub validate_csv_integrity: bool,
    pub verify_archive_checksum: bool,
    /// Log every CSV of a multi-CSV archive with its size and hash
    pub register_all_csv_files: bool,
    pub min_free_space_gb: u64,
    pub encoding: TextEncoding,
}

impl ExtractorConfig {
    /// Standard layout under one work directory
    pub fn new(work_dir: &Path) -> Self {
        Self {
            downloads_dir: work_dir.join("downloads"),
            extracted_dir: work_dir.join("extracted"),
            staging_dir: work_dir.join("staging"),
            delete_archive_after_extraction: false,
            validate_csv_integrity: true,
            verify_archive_checksum: true,
            register_all_csv_files: false,
            min_free_space_gb: crate::download::manager::DEFAULT_MIN_FREE_SPACE_GB,
            encoding: TextEncoding::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Extracted {
        archive: String,
        /// Name of the primary CSV in the extraction directory
        primary: String,
        csv_files: usize,
    },
    Skipped {
        archive: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub csv_files: usize,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

#[derive(Debug)]
struct StagedCsv {
    file_name: String,
    size: u64,
    hash: String,
    validation_error: Option<String>,
}

#[derive(Debug)]
struct StagedArchive {
    csvs: Vec<StagedCsv>,
    skipped_entries: usize,
}

pub struct ArchiveExtractor {
    config: ExtractorConfig,
    store: Arc<dyn FileStateStore>,
    disk: Arc<dyn DiskSpaceProbe>,
}

impl ArchiveExtractor {
    pub fn new(
        config: ExtractorConfig,
        store: Arc<dyn FileStateStore>,
        disk: Arc<dyn DiskSpaceProbe>,
    ) -> Self {
        Self {
            config,
            store,
            disk,
        }
    }

    /// `downloads/*.zip` in name order
    async fn list_archives(&self) -> Result<Vec<PathBuf>> {
        let mut archives = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.config.downloads_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(archives),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_zip = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("zip"))
                .unwrap_or(false);
            if is_zip && entry.file_type().await?.is_file() {
                archives.push(path);
            }
        }

        archives.sort();
        Ok(archives)
    }

    /// Extract every archive of `period` waiting in the downloads directory
    pub async fn extract_all(
        &self,
        period: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractionReport> {
        tokio::fs::create_dir_all(&self.config.extracted_dir).await?;
        tokio::fs::create_dir_all(&self.config.staging_dir).await?;

        let archives = self.list_archives().await?;
        let mut report = ExtractionReport {
            total: archives.len(),
            ..Default::default()
        };

        info!(period = %period, archives = archives.len(), "Starting extraction");

        for archive in &archives {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.extract_archive(archive, period, cancel).await {
                Ok(ArchiveOutcome::Extracted { csv_files, .. }) => {
                    report.processed += 1;
                    report.csv_files += csv_files;
                },
                Ok(ArchiveOutcome::Skipped { archive, reason }) => {
                    debug!(archive = %archive, reason = %reason, "Archive skipped");
                    report.skipped += 1;
                },
                Err(e) if e.is_cancelled() => {
                    report.cancelled = true;
                    break;
                },
                Err(e) => {
                    error!("{}", e);
                    report.errors.push(e.to_string());
                },
            }
        }

        info!(
            total = report.total,
            processed = report.processed,
            skipped = report.skipped,
            csv_files = report.csv_files,
            errors = report.errors.len(),
            cancelled = report.cancelled,
            "Extraction stage finished"
        );
        for message in report.errors.iter().take(SUMMARY_ERROR_LIMIT) {
            warn!("Extraction error: {}", message);
        }
        if report.errors.len() > SUMMARY_ERROR_LIMIT {
            warn!("... and {} more extraction errors", report.errors.len() - SUMMARY_ERROR_LIMIT);
        }

        Ok(report)
    }

    /// Extract one archive and record the outcome.
    pub async fn extract_archive(
        &self,
        archive: &Path,
        period: &str,
        cancel: &CancellationToken,
    ) -> Result<ArchiveOutcome> {
        let archive_name = file_name(archive);
        let skipped = |reason: &str| -> Result<ArchiveOutcome> {
            Ok(ArchiveOutcome::Skipped {
                archive: archive_name.clone(),
                reason: reason.to_string(),
            })
        };

        let mut record = match self.store.get_by_name_and_period(&archive_name, period).await? {
            Some(record) => record,
            None => self.register_orphan(archive, &archive_name, period).await?,
        };

        if record.download_status != DownloadStatus::Finished {
            return skipped("download not finished");
        }
        if record.csv_status.is_extracted() {
            return skipped("already extracted");
        }

        if let Err(e) = ensure_free_space(
            self.disk.as_ref(),
            &self.config.extracted_dir,
            self.config.min_free_space_gb,
        ) {
            warn!(archive = %archive_name, "{}", e);
            return skipped("insufficient disk space");
        }

        if self.config.verify_archive_checksum {
            if let Some(expected) = record.hash_zip.clone() {
                let actual = match hash_file(archive).await {
                    Ok(actual) => actual,
                    Err(e) => {
                        let message = format!("checksum verification failed: {}", e);
                        record.fail_csv(message.clone());
                        self.store.update(&record).await?;
                        return Err(IngestError::extraction(archive_name, message));
                    },
                };
                if !actual.eq_ignore_ascii_case(&expected) {
                    let message = format!("checksum mismatch: expected {}, got {}", expected, actual);
                    record.fail_csv(message.clone());
                    self.store.update(&record).await?;
                    return Err(IngestError::extraction(archive_name, message));
                }
            }
        }

        let staging = self.config.staging_dir.join(archive_base_name(&archive_name));
        if tokio::fs::try_exists(&staging).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        tokio::fs::create_dir_all(&staging).await?;
        tokio::fs::create_dir_all(&self.config.extracted_dir).await?;

        record.begin_extraction();
        self.store.update(&record).await?;
        info!(archive = %archive_name, "Extracting");

        let staged = self.stage_archive(archive, &archive_name, &staging, cancel).await;

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            warn!(dir = %staging.display(), "Could not remove staging directory: {}", e);
        }

        let staged = match staged {
            Ok(staged) => staged,
            Err(e) => {
                let reason = if e.is_cancelled() {
                    "cancelled".to_string()
                } else {
                    e.to_string()
                };
                record.fail_csv(reason.clone());
                self.store.update(&record).await?;
                return Err(if e.is_cancelled() {
                    e
                } else {
                    IngestError::extraction(archive_name, reason)
                });
            },
        };

        self.record_result(record, archive, staged).await
    }

    async fn record_result(
        &self,
        mut record: FileRecord,
        archive: &Path,
        staged: StagedArchive,
    ) -> Result<ArchiveOutcome> {
        let archive_name = record.archive_name.clone();

        let Some(primary) = staged.csvs.first() else {
            record.fail_csv("no CSV found in archive");
            self.store.update(&record).await?;
            return Err(IngestError::extraction(archive_name, "no CSV found in archive"));
        };

        if staged.csvs.len() > 1 {
            info!(
                archive = %archive_name,
                primary = %primary.file_name,
                additional = staged.csvs.len() - 1,
                "Archive produced several CSVs"
            );
            if self.config.register_all_csv_files {
                for csv in &staged.csvs[1..] {
                    info!(
                        archive = %archive_name,
                        file = %csv.file_name,
                        size = csv.size,
                        hash = %csv.hash,
                        "Additional CSV"
                    );
                }
            }
        }

        record.finish_extraction(primary.file_name.clone(), primary.size, primary.hash.clone());

        let validation_errors: Vec<&str> = staged
            .csvs
            .iter()
            .filter_map(|csv| csv.validation_error.as_deref())
            .collect();

        if !validation_errors.is_empty() {
            let message = format!("validation failed: {}", validation_errors.join("; "));
            record.fail_csv(message.clone());
            self.store.update(&record).await?;
            return Err(IngestError::extraction(archive_name, message));
        }

        self.store.update(&record).await?;
        info!(
            archive = %archive_name,
            csv = %primary.file_name,
            size = primary.size,
            "Archive extracted"
        );

        if self.config.delete_archive_after_extraction && staged.skipped_entries == 0 {
            delete_with_retry(archive).await;
        }

        Ok(ArchiveOutcome::Extracted {
            archive: archive_name,
            primary: primary.file_name.clone(),
            csv_files: staged.csvs.len(),
        })
    }

    /// An archive on disk without a file-state row was left by an earlier
    /// process; register it as downloaded.
    async fn register_orphan(&self, archive: &Path, name: &str, period: &str) -> Result<FileRecord> {
        info!(archive = %name, "Registering archive found on disk");
        let size = file_size(archive).await?;
        let hash = hash_with_retry(archive).await?;

        let mut record = FileRecord::new(name, period);
        record.finish_download(size, hash)?;
        self.store.create(&record).await
    }

    async fn stage_archive(
        &self,
        archive: &Path,
        archive_name: &str,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<StagedArchive> {
        let unpacked = {
            let archive = archive.to_path_buf();
            let staging = staging.to_path_buf();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || unpack_archive(&archive, &staging, &cancel)).await??
        };

        let prefix = archive_base_name(archive_name);
        let mut csvs = Vec::new();

        for file in &unpacked.files {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let Some(csv_path) = infer_csv_path(file, self.config.encoding).await? else {
                continue;
            };

            let final_name = format!("{}_{}", prefix, file_name(&csv_path));
            let destination = self.config.extracted_dir.join(&final_name);
            move_with_retry(&csv_path, &destination).await?;

            let validation_error = if self.config.validate_csv_integrity {
                match validate_structure(&destination, self.config.encoding, DEFAULT_VALIDATION_LINES)
                    .await
                {
                    Ok(_) => None,
                    Err(e) => {
                        warn!(file = %final_name, "{}", e);
                        Some(e.to_string())
                    },
                }
            } else {
                None
            };

            let hash = hash_with_retry(&destination).await?;
            let size = file_size(&destination).await?;
            debug!(file = %final_name, size, "CSV ready");

            csvs.push(StagedCsv {
                file_name: final_name,
                size,
                hash,
                validation_error,
            });
        }

        Ok(StagedArchive {
            csvs,
            skipped_entries: unpacked.skipped,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `Empresas0.zip` -> `Empresas0`
fn archive_base_name(archive_name: &str) -> String {
    Path::new(archive_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| archive_name.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_base_name() {
        assert_eq!(archive_base_name("Empresas0.zip"), "Empresas0");
        assert_eq!(archive_base_name("Cnaes.ZIP"), "Cnaes");
        assert_eq!(archive_base_name("noext"), "noext");
    }
}
