//! File lifecycle model persisted by the file-state store

use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Download stage of one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    NotStarted,
    InProgress,
    Finished,
    Error,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::NotStarted => "not_started",
            DownloadStatus::InProgress => "in_progress",
            DownloadStatus::Finished => "finished",
            DownloadStatus::Error => "error",
        }
    }
}

impl FromStr for DownloadStatus {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_started" => Ok(DownloadStatus::NotStarted),
            "in_progress" => Ok(DownloadStatus::InProgress),
            "finished" => Ok(DownloadStatus::Finished),
            "error" => Ok(DownloadStatus::Error),
            other => Err(IngestError::State(format!("Unknown download status: {}", other))),
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extraction and load stage of one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsvStatus {
    NotProcessed,
    Extracting,
    Extracted,
    Processing,
    Processed,
    Error,
}

impl CsvStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CsvStatus::NotProcessed => "not_processed",
            CsvStatus::Extracting => "extracting",
            CsvStatus::Extracted => "extracted",
            CsvStatus::Processing => "processing",
            CsvStatus::Processed => "processed",
            CsvStatus::Error => "error",
        }
    }

    /// Extraction produced a CSV that needs no second pass.
    ///
    /// `Processing` is excluded: outside a running load it marks a load that
    /// was killed midway, and the archive is extracted again.
    pub fn is_extracted(&self) -> bool {
        matches!(self, CsvStatus::Extracted | CsvStatus::Processed)
    }
}

impl FromStr for CsvStatus {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_processed" => Ok(CsvStatus::NotProcessed),
            "extracting" => Ok(CsvStatus::Extracting),
            "extracted" => Ok(CsvStatus::Extracted),
            "processing" => Ok(CsvStatus::Processing),
            "processed" => Ok(CsvStatus::Processed),
            "error" => Ok(CsvStatus::Error),
            other => Err(IngestError::State(format!("Unknown csv status: {}", other))),
        }
    }
}

impl fmt::Display for CsvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source archive of one release period, keyed by `(archive_name, period)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub archive_name: String,
    /// Release period, `YYYY-MM`
    pub period: String,
    /// Name of the primary CSV inside the extraction directory
    pub extracted_file_name: Option<String>,
    pub hash_zip: Option<String>,
    pub hash_csv: Option<String>,
    pub size_zip: i64,
    pub size_csv: Option<i64>,
    pub download_status: DownloadStatus,
    pub csv_status: CsvStatus,
    /// Rows stored by the loader
    pub record_count: Option<i64>,
    /// Reason of the most recent `Error` transition
    pub last_error: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub last_checked_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(archive_name: impl Into<String>, period: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            archive_name: archive_name.into(),
            period: period.into(),
            extracted_file_name: None,
            hash_zip: None,
            hash_csv: None,
            size_zip: 0,
            size_csv: None,
            download_status: DownloadStatus::NotStarted,
            csv_status: CsvStatus::NotProcessed,
            record_count: None,
            last_error: None,
            downloaded_at: None,
            last_checked_at: now,
            created_at: now,
        }
    }

    /// Downloaded and loaded; nothing left to do for this archive
    pub fn is_complete(&self) -> bool {
        self.download_status == DownloadStatus::Finished && self.csv_status == CsvStatus::Processed
    }

    fn touch(&mut self) {
        self.last_checked_at = Utc::now();
    }

    pub fn begin_download(&mut self) {
        self.download_status = DownloadStatus::InProgress;
        self.size_zip = 0;
        self.hash_zip = None;
        self.last_error = None;
        self.downloaded_at = Some(Utc::now());
        self.touch();
    }

    pub fn finish_download(&mut self, size: u64, hash: impl Into<String>) -> Result<()> {
        let hash = hash.into();
        if hash.is_empty() {
            return Err(IngestError::State(format!(
                "{} cannot be finished without a checksum",
                self.archive_name
            )));
        }
        self.download_status = DownloadStatus::Finished;
        self.size_zip = i64::try_from(size).unwrap_or(i64::MAX);
        self.hash_zip = Some(hash);
        self.last_error = None;
        self.touch();
        Ok(())
    }

    pub fn fail_download(&mut self, reason: impl Into<String>) {
        self.download_status = DownloadStatus::Error;
        self.hash_zip = None;
        self.last_error = Some(reason.into());
        self.touch();
    }

    pub fn begin_extraction(&mut self) {
        self.csv_status = CsvStatus::Extracting;
        self.last_error = None;
        self.touch();
    }

    pub fn finish_extraction(&mut self, csv_name: impl Into<String>, size: u64, hash: impl Into<String>) {
        self.csv_status = CsvStatus::Extracted;
        self.extracted_file_name = Some(csv_name.into());
        self.size_csv = Some(i64::try_from(size).unwrap_or(i64::MAX));
        self.hash_csv = Some(hash.into());
        self.record_count = None;
        self.touch();
    }

    pub fn begin_processing(&mut self) {
        self.csv_status = CsvStatus::Processing;
        self.touch();
    }

    pub fn finish_processing(&mut self, records: u64) -> Result<()> {
        if self.extracted_file_name.is_none() {
            return Err(IngestError::State(format!(
                "{} cannot be processed before a CSV was extracted",
                self.archive_name
            )));
        }
        self.csv_status = CsvStatus::Processed;
        self.record_count = Some(i64::try_from(records).unwrap_or(i64::MAX));
        self.last_error = None;
        self.touch();
        Ok(())
    }

    pub fn fail_csv(&mut self, reason: impl Into<String>) {
        self.csv_status = CsvStatus::Error;
        self.last_error = Some(reason.into());
        self.touch();
    }
}
