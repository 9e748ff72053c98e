//! Pipeline orchestrator
//!
//! One run is: disk check, discover the latest period, download its
//! archives, extract them, load the CSVs. Runs are started immediately and
//! then on a fixed interval, each bounded by a deadline that cancels
//! in-flight work cooperatively.
//!
//! Every stage resumes from the file-state store, so a run that fails or is
//! cancelled only delays work; the next run picks it up.

use crate::config::IngestConfig;
use crate::download::{
    ensure_free_space, DiskSpaceProbe, DownloadManager, DownloadReport, ProgressTracker,
    SourceDiscovery,
};
use crate::error::Result;
use crate::extract::{ArchiveExtractor, ExtractionReport};
use crate::loader::{BatchLoader, LoadReport, RecordSink};
use crate::state::FileStateStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub period: Option<String>,
    pub archives_listed: usize,
    pub downloads: DownloadReport,
    pub extraction: ExtractionReport,
    pub load: LoadReport,
    pub cancelled: bool,
    pub deadline_exceeded: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn records_loaded(&self) -> u64 {
        self.load.records_stored
    }

    pub fn log(&self) {
        info!(
            period = self.period.as_deref().unwrap_or("-"),
            archives = self.archives_listed,
            downloaded = self.downloads.downloaded,
            download_skipped = self.downloads.skipped,
            download_failed = self.downloads.failed,
            extracted = self.extraction.processed,
            extraction_skipped = self.extraction.skipped,
            extraction_errors = self.extraction.errors.len(),
            files_loaded = self.load.files_loaded,
            load_failed = self.load.files_failed,
            records = self.records_loaded(),
            cancelled = self.cancelled,
            elapsed_secs = self.elapsed.as_secs(),
            "Pipeline run finished"
        );
        if self.deadline_exceeded {
            warn!("Run was cancelled by its deadline; remaining work resumes on the next run");
        }
    }
}

pub struct PipelineOrchestrator {
    discovery: SourceDiscovery,
    downloader: DownloadManager,
    extractor: ArchiveExtractor,
    loader: BatchLoader,
    disk: Arc<dyn DiskSpaceProbe>,
    work_dir: PathBuf,
    min_free_space_gb: u64,
    schedule_interval: Duration,
    run_deadline: Duration,
    progress_interval: Duration,
}

impl PipelineOrchestrator {
    pub fn from_config(
        config: &IngestConfig,
        store: Arc<dyn FileStateStore>,
        sink: Arc<dyn RecordSink>,
        disk: Arc<dyn DiskSpaceProbe>,
    ) -> Result<Self> {
        let client = config.http_client()?;

        Ok(Self {
            discovery: SourceDiscovery::new(client.clone(), &config.base_url)?,
            downloader: DownloadManager::new(
                client,
                config.download_config(),
                store.clone(),
                disk.clone(),
                Arc::new(ProgressTracker::new()),
            ),
            extractor: ArchiveExtractor::new(config.extractor_config(), store.clone(), disk.clone()),
            loader: BatchLoader::new(config.loader_config(), store, sink),
            disk,
            work_dir: config.work_dir.clone(),
            min_free_space_gb: config.min_free_space_gb,
            schedule_interval: config.schedule_interval(),
            run_deadline: config.run_deadline(),
            progress_interval: config.progress_interval(),
        })
    }

    pub fn discovery(&self) -> &SourceDiscovery {
        &self.discovery
    }

    /// Replace the download manager, e.g. to use a different retry policy
    pub fn with_downloader(mut self, downloader: DownloadManager) -> Self {
        self.downloader = downloader;
        self
    }

    /// Override the configured run deadline
    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = deadline;
        self
    }

    /// Run the whole pipeline once under the run deadline.
    ///
    /// Cancellation and the deadline end the run with `cancelled` set rather
    /// than an error. Errors are the fatal preconditions: free space and
    /// discovery.
    pub async fn run_once(&self, shutdown: &CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        let run_cancel = shutdown.child_token();

        let deadline = self.run_deadline;
        let deadline_guard = {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(deadline_secs = deadline.as_secs(), "Run deadline reached, cancelling");
                token.cancel();
            })
        };

        let result = self.run_stages(&run_cancel).await;
        deadline_guard.abort();

        match result {
            Ok(mut summary) => {
                summary.cancelled |= run_cancel.is_cancelled();
                summary.deadline_exceeded = run_cancel.is_cancelled() && !shutdown.is_cancelled();
                summary.elapsed = started.elapsed();
                summary.log();
                Ok(summary)
            },
            Err(e) => {
                error!(elapsed_secs = started.elapsed().as_secs(), "Pipeline run aborted: {}", e);
                Err(e)
            },
        }
    }

    async fn run_stages(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        ensure_free_space(self.disk.as_ref(), &self.work_dir, self.min_free_space_gb)?;
        tokio::fs::create_dir_all(&self.work_dir).await?;

        info!("Starting pipeline run");
        let period = self.discovery.discover_latest_period().await?;
        let urls = self.discovery.list_archives_for_period(&period).await?;
        summary.period = Some(period.clone());
        summary.archives_listed = urls.len();

        let reporter_cancel = cancel.child_token();
        let reporter = self
            .downloader
            .progress()
            .spawn_reporter(self.progress_interval, reporter_cancel.clone());
        let downloads = self.downloader.download_all(&urls, &period, cancel).await;
        reporter_cancel.cancel();
        if let Err(e) = reporter.await {
            warn!("Progress reporter ended abnormally: {}", e);
        }
        summary.downloads = downloads?;

        if cancel.is_cancelled() {
            summary.cancelled = true;
            return Ok(summary);
        }

        summary.extraction = self.extractor.extract_all(&period, cancel).await?;
        if cancel.is_cancelled() {
            summary.cancelled = true;
            return Ok(summary);
        }

        summary.load = self.loader.load_pending(cancel).await?;
        summary.cancelled = summary.downloads.cancelled
            || summary.extraction.cancelled
            || summary.load.cancelled;

        Ok(summary)
    }

    /// Spawn the scheduler: one run immediately, then one per interval,
    /// until `shutdown` is cancelled. Cancelling also stops a run in
    /// progress at its next checkpoint.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_hours = self.schedule_interval.as_secs() / 3600,
                deadline_hours = self.run_deadline.as_secs() / 3600,
                "Pipeline scheduler started"
            );

            let mut ticker = tokio::time::interval(self.schedule_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once(&shutdown).await {
                            error!("Scheduled run failed: {}", e);
                        }
                    },
                }
            }

            info!("Pipeline scheduler stopped");
        })
    }
}
