//! Live download progress
//!
//! Progress is informational only: it drives the periodic log line with
//! speed and ETA and never influences retry or completion decisions.

use cnpj_common::format::{format_bytes, progress_bar};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

const BAR_WIDTH: usize = 20;

#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub file_name: String,
    /// From `Content-Length`, when the server sends one
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,
    pub started_at: Instant,
}

impl DownloadProgress {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            total_bytes: None,
            downloaded_bytes: 0,
            started_at: Instant::now(),
        }
    }

    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.downloaded_bytes as f64 / total as f64 * 100.0).min(100.0))
            },
            _ => None,
        }
    }

    /// Average bytes per second since the download started
    pub fn bytes_per_second(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.downloaded_bytes as f64 / elapsed
    }

    pub fn eta(&self) -> Option<Duration> {
        let total = self.total_bytes?;
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.downloaded_bytes) as f64;
        Some(Duration::from_secs_f64(remaining / speed))
    }

    /// One log line: bar, percentage, bytes, speed, ETA
    pub fn render(&self) -> String {
        let speed = format!("{}/s", format_bytes(self.bytes_per_second() as u64));
        match (self.percent(), self.total_bytes) {
            (Some(percent), Some(total)) => {
                let eta = self
                    .eta()
                    .map(|eta| format!("{}s", eta.as_secs()))
                    .unwrap_or_else(|| "?".to_string());
                format!(
                    "{} {} {:.1}% {} / {} @ {} ETA {}",
                    self.file_name,
                    progress_bar(percent, BAR_WIDTH),
                    percent,
                    format_bytes(self.downloaded_bytes),
                    format_bytes(total),
                    speed,
                    eta
                )
            },
            _ => format!(
                "{} {} @ {}",
                self.file_name,
                format_bytes(self.downloaded_bytes),
                speed
            ),
        }
    }
}

/// Shared registry of in-flight downloads
#[derive(Debug, Default)]
pub struct ProgressTracker {
    active: Mutex<HashMap<String, DownloadProgress>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DownloadProgress>> {
        // a panic while holding the lock only leaves stale progress behind
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn start(&self, file_name: &str) {
        self.lock()
            .insert(file_name.to_string(), DownloadProgress::new(file_name));
    }

    pub fn set_total(&self, file_name: &str, total_bytes: Option<u64>) {
        if let Some(progress) = self.lock().get_mut(file_name) {
            progress.total_bytes = total_bytes;
        }
    }

    pub fn update(&self, file_name: &str, downloaded_bytes: u64) {
        if let Some(progress) = self.lock().get_mut(file_name) {
            progress.downloaded_bytes = downloaded_bytes;
        }
    }

    pub fn complete(&self, file_name: &str) {
        self.lock().remove(file_name);
    }

    /// Active downloads ordered by file name
    pub fn snapshot(&self) -> Vec<DownloadProgress> {
        let mut entries: Vec<_> = self.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        entries
    }

    /// Combined percentage over the active downloads that report a size
    pub fn overall_percent(&self) -> Option<f64> {
        let (done, total) = self
            .lock()
            .values()
            .filter_map(|p| p.total_bytes.map(|total| (p.downloaded_bytes, total)))
            .fold((0u64, 0u64), |(d, t), (done, total)| (d + done.min(total), t + total));

        if total == 0 {
            return None;
        }
        Some(done as f64 / total as f64 * 100.0)
    }

    /// Log every active download each `every` until `cancel` fires
    pub fn spawn_reporter(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick fires immediately and there is nothing to report yet
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.report(),
                }
            }
        })
    }

    fn report(&self) {
        let active = self.snapshot();
        if active.is_empty() {
            return;
        }

        for progress in &active {
            info!("{}", progress.render());
        }

        if let Some(overall) = self.overall_percent() {
            info!(
                active = active.len(),
                "Overall download progress {} {:.1}%",
                progress_bar(overall, BAR_WIDTH),
                overall
            );
        }
    }
}
