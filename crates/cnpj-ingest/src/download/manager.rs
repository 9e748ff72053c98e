//! Concurrent, retrying archive downloader
//!
//! Each URL is handled independently under a bounded number of concurrent
//! downloads. A file's retries and backoff never hold up its siblings, and a
//! file that exhausts its attempts is recorded as `Error` without failing the
//! run.

use super::discovery::archive_name;
use super::disk::{ensure_free_space, DiskSpaceProbe};
use super::progress::ProgressTracker;
use crate::error::{IngestError, Result};
use crate::fs_ops::{delete_with_retry, file_size, hash_with_retry, move_with_retry};
use crate::state::{self, CsvStatus, DownloadStatus, FileRecord, FileStateStore};
use futures::stream::{self, StreamExt};
use rand::Rng;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 1;
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 7;
pub const DEFAULT_MIN_FREE_SPACE_GB: u64 = 10;

const WRITE_BUFFER: usize = 64 * 1024;

/// Exponential backoff with uniform jitter: `base * 2^attempt + U(jitter_min, jitter_max)`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            jitter_min: Duration::from_secs(1),
            jitter_max: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately; for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));

        let min = self.jitter_min.as_millis() as u64;
        let max = self.jitter_max.as_millis() as u64;
        let jitter = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };

        backoff.saturating_add(Duration::from_millis(jitter))
    }
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Destination of finished archives and their `.tmp` partials
    pub downloads_dir: PathBuf,
    pub max_parallel: usize,
    pub min_free_space_gb: u64,
    pub retry: RetryPolicy,
}

impl DownloadConfig {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
            max_parallel: DEFAULT_MAX_PARALLEL_DOWNLOADS,
            min_free_space_gb: DEFAULT_MIN_FREE_SPACE_GB,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { archive: String, bytes: u64 },
    /// Already `Finished` and extracted or loaded
    AlreadyComplete(String),
    /// Destination file present from an earlier run
    AlreadyOnDisk(String),
    Failed { archive: String, error: String },
    Cancelled(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
    pub cancelled: bool,
    pub outcomes: Vec<DownloadOutcome>,
}

impl DownloadReport {
    fn from_outcomes(outcomes: Vec<DownloadOutcome>) -> Self {
        let mut report = Self {
            total: outcomes.len(),
            ..Default::default()
        };

        for outcome in &outcomes {
            match outcome {
                DownloadOutcome::Downloaded { bytes, .. } => {
                    report.downloaded += 1;
                    report.bytes += bytes;
                },
                DownloadOutcome::AlreadyComplete(_) | DownloadOutcome::AlreadyOnDisk(_) => {
                    report.skipped += 1
                },
                DownloadOutcome::Failed { .. } => report.failed += 1,
                DownloadOutcome::Cancelled(_) => report.cancelled = true,
            }
        }

        report.outcomes = outcomes;
        report
    }
}

pub struct DownloadManager {
    client: Client,
    config: DownloadConfig,
    store: Arc<dyn FileStateStore>,
    disk: Arc<dyn DiskSpaceProbe>,
    progress: Arc<ProgressTracker>,
}

impl DownloadManager {
    pub fn new(
        client: Client,
        config: DownloadConfig,
        store: Arc<dyn FileStateStore>,
        disk: Arc<dyn DiskSpaceProbe>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            client,
            config,
            store,
            disk,
            progress,
        }
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    /// Download every archive of `period` that is not already complete.
    ///
    /// Fails only on the free-space precondition or an unusable download
    /// directory; per-file failures are reported in the returned summary.
    pub async fn download_all(
        &self,
        urls: &[Url],
        period: &str,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        ensure_free_space(
            self.disk.as_ref(),
            &self.config.downloads_dir,
            self.config.min_free_space_gb,
        )?;
        tokio::fs::create_dir_all(&self.config.downloads_dir).await?;

        let concurrency = self.config.max_parallel.max(1);
        info!(
            period = %period,
            archives = urls.len(),
            concurrency,
            "Starting downloads"
        );

        // Each future owns its inputs so the stream stays Send inside tokio::spawn
        let outcomes: Vec<DownloadOutcome> = stream::iter(urls.iter().cloned())
            .map(|url| {
                let period = period.to_string();
                let cancel = cancel.clone();
                async move { self.download_one(&url, &period, &cancel).await }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let report = DownloadReport::from_outcomes(outcomes);
        info!(
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed,
            bytes = report.bytes,
            cancelled = report.cancelled,
            "Download stage finished"
        );

        Ok(report)
    }

    async fn download_one(
        &self,
        url: &Url,
        period: &str,
        cancel: &CancellationToken,
    ) -> DownloadOutcome {
        let Some(name) = archive_name(url) else {
            return DownloadOutcome::Failed {
                archive: url.to_string(),
                error: "URL has no file name".to_string(),
            };
        };

        if cancel.is_cancelled() {
            return DownloadOutcome::Cancelled(name);
        }

        match self.download_with_retry(url, &name, period, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(archive = %name, "Download failed: {}", e);
                DownloadOutcome::Failed {
                    archive: name,
                    error: e.to_string(),
                }
            },
        }
    }

    async fn download_with_retry(
        &self,
        url: &Url,
        name: &str,
        period: &str,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let existing = self.store.get_by_name_and_period(name, period).await?;
        if let Some(record) = &existing {
            if record.is_complete()
                || (record.download_status == DownloadStatus::Finished
                    && matches!(record.csv_status, CsvStatus::Extracted | CsvStatus::Processing))
            {
                debug!(archive = %name, "Already downloaded and processed, skipping");
                return Ok(DownloadOutcome::AlreadyComplete(name.to_string()));
            }
        }

        let destination = self.config.downloads_dir.join(name);
        if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            self.adopt_existing(existing, name, period, &destination).await?;
            info!(archive = %name, "Archive already on disk, skipping download");
            return Ok(DownloadOutcome::AlreadyOnDisk(name.to_string()));
        }

        let mut record = state::begin_download(self.store.as_ref(), name, period).await?;
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();

        self.progress.start(name);
        for attempt in 1..=max_attempts {
            debug!(archive = %name, attempt, max_attempts, "Downloading");

            match self.attempt(url, name, &destination, &mut record, cancel).await {
                Ok(bytes) => {
                    self.progress.complete(name);
                    info!(archive = %name, bytes, attempt, "Download finished");
                    return Ok(DownloadOutcome::Downloaded {
                        archive: name.to_string(),
                        bytes,
                    });
                },
                Err(e) if e.is_cancelled() => {
                    self.progress.complete(name);
                    self.cleanup(&destination).await;
                    return self.record_cancelled(&mut record).await;
                },
                Err(e) => {
                    warn!(archive = %name, attempt, max_attempts, "Download attempt failed: {}", e);
                    self.cleanup(&destination).await;
                    last_error = e.to_string();

                    if attempt < max_attempts {
                        let delay = self.config.retry.delay_for(attempt);
                        debug!(archive = %name, delay_ms = delay.as_millis() as u64, "Backing off");
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                self.progress.complete(name);
                                return self.record_cancelled(&mut record).await;
                            },
                            _ = tokio::time::sleep(delay) => {},
                        }
                    }
                },
            }
        }

        self.progress.complete(name);
        record.fail_download(last_error.clone());
        self.store.update(&record).await?;

        Err(IngestError::download(
            name,
            format!("giving up after {} attempts: {}", max_attempts, last_error),
        ))
    }

    /// Record a destination left by an earlier run as `Finished`
    async fn adopt_existing(
        &self,
        existing: Option<FileRecord>,
        name: &str,
        period: &str,
        destination: &Path,
    ) -> Result<()> {
        if matches!(&existing, Some(record) if record.download_status == DownloadStatus::Finished) {
            return Ok(());
        }

        let size = file_size(destination).await?;
        let hash = hash_with_retry(destination).await?;

        match existing {
            Some(mut record) => {
                record.finish_download(size, hash)?;
                self.store.update(&record).await
            },
            None => {
                let mut record = FileRecord::new(name, period);
                record.finish_download(size, hash)?;
                self.store.create(&record).await.map(|_| ())
            },
        }
    }

    async fn record_cancelled(&self, record: &mut FileRecord) -> Result<DownloadOutcome> {
        warn!(archive = %record.archive_name, "Download cancelled");
        record.fail_download("cancelled");
        self.store.update(record).await?;
        Ok(DownloadOutcome::Cancelled(record.archive_name.clone()))
    }

    async fn cleanup(&self, destination: &Path) {
        delete_with_retry(&temp_path(destination)).await;
        delete_with_retry(destination).await;
    }

    /// One GET streamed to `<name>.tmp`, renamed over the destination and hashed
    async fn attempt(
        &self,
        url: &Url,
        name: &str,
        destination: &Path,
        record: &mut FileRecord,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            response = self.client.get(url.clone()).send() => response?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::download(name, format!("HTTP {}", status)));
        }

        let expected = response.content_length();
        if let Some(total) = expected {
            record.size_zip = i64::try_from(total).unwrap_or(i64::MAX);
            self.store.update(record).await?;
        }
        self.progress.set_total(name, expected);

        let temp = temp_path(destination);
        let file = tokio::fs::File::create(&temp).await?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            writer.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            self.progress.update(name, downloaded);
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        if downloaded == 0 {
            return Err(IngestError::download(name, "empty response body"));
        }
        if let Some(total) = expected {
            if downloaded != total {
                return Err(IngestError::download(
                    name,
                    format!("truncated body: {} of {} bytes", downloaded, total),
                ));
            }
        }

        move_with_retry(&temp, destination).await?;

        let hash = hash_with_retry(destination).await?;
        let size = file_size(destination).await?;
        record.finish_download(size, hash)?;
        self.store.update(record).await?;

        Ok(size)
    }
}

fn temp_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    destination.with_file_name(name)
}
