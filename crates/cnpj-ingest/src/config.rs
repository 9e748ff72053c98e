//! Ingestion configuration
//!
//! Loaded from environment variables (after `.env` is applied by the
//! binary). Every key has a default except `DATABASE_URL`, which is only
//! needed when running against Postgres.

use crate::download::{DownloadConfig, RetryPolicy};
use crate::error::{IngestError, Result};
use crate::extract::ExtractorConfig;
use crate::loader::LoaderConfig;
use crate::reader::TextEncoding;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str =
    "https://arquivos.receitafederal.gov.br/dados/cnpj/dados_abertos_cnpj/";
pub const USER_AGENT: &str = "ReceitaFederalSync/2.0";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Root listing with the `YYYY-MM/` period directories
    pub base_url: String,
    /// Holds `downloads/`, `extracted/` and the staging directories
    pub work_dir: PathBuf,
    pub delete_zip_after_extraction: bool,
    pub min_free_space_gb: u64,
    pub validate_csv_integrity: bool,
    pub verify_archive_checksum: bool,
    pub register_all_csv_files: bool,
    pub max_parallel_downloads: usize,
    pub max_retry_attempts: u32,
    pub request_timeout_minutes: u64,
    pub batch_size: usize,
    pub reclaim_interval_rows: u64,
    pub source_encoding: TextEncoding,
    pub schedule_interval_hours: u64,
    pub run_deadline_hours: u64,
    pub progress_report_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            base_url: DEFAULT_BASE_URL.to_string(),
            work_dir: std::env::temp_dir().join("receita_federal_dados"),
            delete_zip_after_extraction: false,
            min_free_space_gb: 10,
            validate_csv_integrity: true,
            verify_archive_checksum: true,
            register_all_csv_files: false,
            max_parallel_downloads: 1,
            max_retry_attempts: 7,
            request_timeout_minutes: 60,
            batch_size: 1000,
            reclaim_interval_rows: 10_000,
            source_encoding: TextEncoding::Latin1,
            schedule_interval_hours: 24,
            run_deadline_hours: 6,
            progress_report_secs: 10,
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| IngestError::Config(format!("{} has an invalid value: {}", key, raw))),
        _ => Ok(default),
    }
}

impl IngestConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let source_encoding = match lookup("RF_SOURCE_ENCODING") {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => defaults.source_encoding,
        };

        let config = Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: parse_var(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            base_url: lookup("RF_BASE_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.base_url),
            work_dir: lookup("RF_WORK_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            delete_zip_after_extraction: parse_var(
                &lookup,
                "RF_DELETE_ZIP_AFTER_EXTRACTION",
                defaults.delete_zip_after_extraction,
            )?,
            min_free_space_gb: parse_var(&lookup, "RF_MIN_FREE_SPACE_GB", defaults.min_free_space_gb)?,
            validate_csv_integrity: parse_var(
                &lookup,
                "RF_VALIDATE_CSV_INTEGRITY",
                defaults.validate_csv_integrity,
            )?,
            verify_archive_checksum: parse_var(
                &lookup,
                "RF_VERIFY_ARCHIVE_CHECKSUM",
                defaults.verify_archive_checksum,
            )?,
            register_all_csv_files: parse_var(
                &lookup,
                "RF_REGISTER_ALL_CSV_FILES",
                defaults.register_all_csv_files,
            )?,
            max_parallel_downloads: parse_var(
                &lookup,
                "RF_MAX_PARALLEL_DOWNLOADS",
                defaults.max_parallel_downloads,
            )?,
            max_retry_attempts: parse_var(&lookup, "RF_MAX_RETRY_ATTEMPTS", defaults.max_retry_attempts)?,
            request_timeout_minutes: parse_var(
                &lookup,
                "RF_REQUEST_TIMEOUT_MINUTES",
                defaults.request_timeout_minutes,
            )?,
            batch_size: parse_var(&lookup, "RF_BATCH_SIZE", defaults.batch_size)?,
            reclaim_interval_rows: parse_var(
                &lookup,
                "RF_RECLAIM_INTERVAL_ROWS",
                defaults.reclaim_interval_rows,
            )?,
            source_encoding,
            schedule_interval_hours: parse_var(
                &lookup,
                "RF_SCHEDULE_INTERVAL_HOURS",
                defaults.schedule_interval_hours,
            )?,
            run_deadline_hours: parse_var(&lookup, "RF_RUN_DEADLINE_HOURS", defaults.run_deadline_hours)?,
            progress_report_secs: parse_var(
                &lookup,
                "RF_PROGRESS_REPORT_SECS",
                defaults.progress_report_secs,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("DATABASE_MAX_CONNECTIONS", self.database_max_connections as u64),
            ("RF_MAX_PARALLEL_DOWNLOADS", self.max_parallel_downloads as u64),
            ("RF_MAX_RETRY_ATTEMPTS", self.max_retry_attempts as u64),
            ("RF_REQUEST_TIMEOUT_MINUTES", self.request_timeout_minutes),
            ("RF_BATCH_SIZE", self.batch_size as u64),
            ("RF_RECLAIM_INTERVAL_ROWS", self.reclaim_interval_rows),
            ("RF_SCHEDULE_INTERVAL_HOURS", self.schedule_interval_hours),
            ("RF_RUN_DEADLINE_HOURS", self.run_deadline_hours),
            ("RF_PROGRESS_REPORT_SECS", self.progress_report_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(IngestError::Config(format!("{} must be greater than 0", key)));
            }
        }

        let base = url::Url::parse(&self.base_url)
            .map_err(|e| IngestError::Config(format!("RF_BASE_URL is not a valid URL: {}", e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(IngestError::Config(format!(
                "RF_BASE_URL must be http or https, got: {}",
                base.scheme()
            )));
        }

        Ok(())
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.work_dir.join("downloads")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.work_dir.join("extracted")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_minutes * 60)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_hours * 3600)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_hours * 3600)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_report_secs)
    }

    /// HTTP client with the per-request timeout and user agent
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.request_timeout())
            .build()?)
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            downloads_dir: self.downloads_dir(),
            max_parallel: self.max_parallel_downloads,
            min_free_space_gb: self.min_free_space_gb,
            retry: RetryPolicy {
                max_attempts: self.max_retry_attempts,
                ..RetryPolicy::default()
            },
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            delete_archive_after_extraction: self.delete_zip_after_extraction,
            validate_csv_integrity: self.validate_csv_integrity,
            verify_archive_checksum: self.verify_archive_checksum,
            register_all_csv_files: self.register_all_csv_files,
            min_free_space_gb: self.min_free_space_gb,
            encoding: self.source_encoding,
            ..ExtractorConfig::new(&self.work_dir)
        }
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            extracted_dir: self.extracted_dir(),
            batch_size: self.batch_size,
            reclaim_interval: self.reclaim_interval_rows,
            encoding: self.source_encoding,
        }
    }
}
