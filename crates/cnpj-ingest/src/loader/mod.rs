//! Batch loader
//!
//! Streams every extracted CSV into the record sink in bounded batches.
//!
//! # Flow
//!
//! ```text
//! list_by_csv_status(Extracted)
//!     └─> per file: classify shape -> Processing
//!             └─> RecordReader -> FromFields -> Vec<R> (batch_size) -> RecordSink::add_batch
//!         -> Processed (record_count) | Error (last_error)
//! ```
//!
//! Short lines and rows with an empty key are skipped and counted; a sink
//! failure ends the file with `Error` and is reported to the caller, which
//! moves on to the next file.

pub mod memory;
pub mod postgres;
pub mod records;
pub mod shape;
pub mod sink;

pub use memory::MemoryRecordSink;
pub use postgres::PgRecordSink;
pub use records::{CodeEntry, Company, Establishment, FromFields, MissingField, Partner, SimplesOption};
pub use shape::RecordShape;
pub use sink::{RecordBatch, RecordSink};

use crate::error::{IngestError, Result};
use crate::reader::{RecordReader, TextEncoding};
use crate::state::{CsvStatus, FileRecord, FileStateStore};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_RECLAIM_INTERVAL: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Directory holding the extracted CSVs
    pub extracted_dir: PathBuf,
    /// Rows per sink call
    pub batch_size: usize,
    /// Rows between memory reclamation and progress logging
    pub reclaim_interval: u64,
    pub encoding: TextEncoding,
}

impl LoaderConfig {
    pub fn new(extracted_dir: impl Into<PathBuf>) -> Self {
        Self {
            extracted_dir: extracted_dir.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
            encoding: TextEncoding::default(),
        }
    }
}

/// Per-file counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileLoadStats {
    pub lines_read: u64,
    pub records_stored: u64,
    /// Lines with fewer fields than the shape needs
    pub short_lines: u64,
    /// Lines rejected while building the typed row
    pub rejected_rows: u64,
    pub batches: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoExtractedFile,
    FileMissing,
    UnknownShape,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NoExtractedFile => "no extracted file recorded",
            SkipReason::FileMissing => "extracted file not found on disk",
            SkipReason::UnknownShape => "unknown record shape",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLoadOutcome {
    Loaded(FileLoadStats),
    Skipped(SkipReason),
}

/// Stage summary for [`BatchLoader::load_pending`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files_pending: usize,
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub records_stored: u64,
    pub rows_rejected: u64,
    pub cancelled: bool,
}

pub struct BatchLoader {
    config: LoaderConfig,
    store: Arc<dyn FileStateStore>,
    sink: Arc<dyn RecordSink>,
}

impl BatchLoader {
    pub fn new(
        config: LoaderConfig,
        store: Arc<dyn FileStateStore>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            config,
            store,
            sink,
        }
    }

    /// Load every file in `Extracted` state, one at a time.
    ///
    /// Files left in `Processing` by an interrupted load are loaded again.
    /// A failing file is logged and counted; only cancellation stops the loop.
    pub async fn load_pending(&self, cancel: &CancellationToken) -> Result<LoadReport> {
        let mut pending = self.store.list_by_csv_status(CsvStatus::Extracted).await?;
        let stale = self.store.list_by_csv_status(CsvStatus::Processing).await?;
        if !stale.is_empty() {
            warn!(files = stale.len(), "Resuming files left in processing by an interrupted load");
            pending.extend(stale);
        }
        let mut report = LoadReport {
            files_pending: pending.len(),
            ..Default::default()
        };

        info!("Loading {} extracted files", pending.len());

        for record in &pending {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.load_file(record, cancel).await {
                Ok(FileLoadOutcome::Loaded(stats)) => {
                    report.files_loaded += 1;
                    report.records_stored += stats.records_stored;
                    report.rows_rejected += stats.rejected_rows;
                },
                Ok(FileLoadOutcome::Skipped(_)) => report.files_skipped += 1,
                Err(e) if e.is_cancelled() => {
                    warn!(archive = %record.archive_name, "Load interrupted by cancellation");
                    report.cancelled = true;
                    break;
                },
                Err(e) => {
                    error!(archive = %record.archive_name, "{}", e);
                    report.files_failed += 1;
                },
            }
        }

        info!(
            loaded = report.files_loaded,
            skipped = report.files_skipped,
            failed = report.files_failed,
            records = report.records_stored,
            rejected = report.rows_rejected,
            cancelled = report.cancelled,
            "Load stage finished"
        );

        Ok(report)
    }

    /// Load one extracted file and record the outcome in the file-state store
    pub async fn load_file(
        &self,
        record: &FileRecord,
        cancel: &CancellationToken,
    ) -> Result<FileLoadOutcome> {
        let Some(file_name) = record.extracted_file_name.clone() else {
            warn!(archive = %record.archive_name, "No extracted file recorded, skipping");
            return Ok(FileLoadOutcome::Skipped(SkipReason::NoExtractedFile));
        };

        let Some(shape) = RecordShape::from_file_name(&file_name) else {
            warn!(file = %file_name, "Unknown record shape, skipping");
            return Ok(FileLoadOutcome::Skipped(SkipReason::UnknownShape));
        };

        let mut current = self
            .store
            .get_by_extracted_name_and_period(&file_name, &record.period)
            .await?
            .unwrap_or_else(|| record.clone());

        let path = self.config.extracted_dir.join(&file_name);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(file = %path.display(), "Extracted file is missing, it will be extracted again");
            current.fail_csv(SkipReason::FileMissing.to_string());
            self.store.update(&current).await?;
            return Ok(FileLoadOutcome::Skipped(SkipReason::FileMissing));
        }

        current.begin_processing();
        self.store.update(&current).await?;

        info!(file = %file_name, shape = %shape, "Loading file");
        let started = Instant::now();

        match self.load_shape(shape, &path, cancel).await {
            Ok(stats) if stats.cancelled => {
                current.fail_csv("cancelled");
                self.store.update(&current).await?;
                Err(IngestError::load(file_name, IngestError::Cancelled))
            },
            Ok(stats) => {
                current.finish_processing(stats.records_stored)?;
                self.store.update(&current).await?;

                if stats.short_lines > 0 || stats.rejected_rows > 0 {
                    warn!(
                        file = %file_name,
                        short_lines = stats.short_lines,
                        rejected = stats.rejected_rows,
                        "Some lines were skipped"
                    );
                }
                info!(
                    file = %file_name,
                    records = stats.records_stored,
                    batches = stats.batches,
                    elapsed_secs = started.elapsed().as_secs(),
                    "File loaded"
                );
                Ok(FileLoadOutcome::Loaded(stats))
            },
            Err(e) => {
                current.fail_csv(e.to_string());
                if let Err(update_err) = self.store.update(&current).await {
                    error!(file = %file_name, "Failed to record load error: {}", update_err);
                }
                Err(IngestError::load(file_name, e))
            },
        }
    }

    async fn load_shape(
        &self,
        shape: RecordShape,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileLoadStats> {
        match shape {
            RecordShape::Companies => {
                self.load_rows::<Company, _>(path, cancel, RecordBatch::Companies).await
            },
            RecordShape::Establishments => {
                self.load_rows::<Establishment, _>(path, cancel, RecordBatch::Establishments)
                    .await
            },
            RecordShape::Partners => {
                self.load_rows::<Partner, _>(path, cancel, RecordBatch::Partners).await
            },
            RecordShape::Simples => {
                self.load_rows::<SimplesOption, _>(path, cancel, RecordBatch::Simples).await
            },
            RecordShape::Cnaes
            | RecordShape::LegalNatures
            | RecordShape::Qualifications
            | RecordShape::Countries
            | RecordShape::Municipalities
            | RecordShape::Reasons => {
                self.load_rows::<CodeEntry, _>(path, cancel, move |entries| RecordBatch::Codes {
                    shape,
                    entries,
                })
                .await
            },
        }
    }

    async fn load_rows<R, W>(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        wrap: W,
    ) -> Result<FileLoadStats>
    where
        R: FromFields,
        W: Fn(Vec<R>) -> RecordBatch + Send + Sync,
    {
        let batch_size = self.config.batch_size.max(1);
        let reclaim_every = self.config.reclaim_interval.max(1);

        let mut reader = RecordReader::open(path, self.config.encoding).await?;
        let mut stats = FileLoadStats::default();
        let mut batch: Vec<R> = Vec::with_capacity(batch_size);

        while let Some(fields) = reader.next_record(cancel).await? {
            stats.lines_read += 1;

            if fields.len() < R::MIN_FIELDS {
                stats.short_lines += 1;
            } else {
                match R::from_fields(&fields) {
                    Ok(row) => batch.push(row),
                    Err(missing) => {
                        let err = IngestError::RowParse {
                            line: reader.line_number(),
                            message: missing.to_string(),
                        };
                        debug!(file = %path.display(), "{}", err);
                        stats.rejected_rows += 1;
                    },
                }
            }

            if batch.len() >= batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                stats.records_stored += self.sink.add_batch(wrap(full)).await?;
                stats.batches += 1;
            }

            if stats.lines_read % reclaim_every == 0 {
                reader.reclaim();
                batch.shrink_to(batch_size);
                debug!(
                    file = %path.display(),
                    lines = stats.lines_read,
                    stored = stats.records_stored,
                    "Load progress"
                );
            }
        }

        if cancel.is_cancelled() {
            stats.cancelled = true;
            return Ok(stats);
        }

        if !batch.is_empty() {
            stats.records_stored += self.sink.add_batch(wrap(batch)).await?;
            stats.batches += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::state::{DownloadStatus, InMemoryFileStateStore};
    use async_trait::async_trait;
    use tempfile::TempDir;

    const COMPANY_LINE: &str = "\"41273593\";\"ACME LTDA\";\"2062\";\"49\";\"1000,00\";\"01\";\"\"";

    struct Fixture {
        dir: TempDir,
        store: Arc<InMemoryFileStateStore>,
        sink: Arc<MemoryRecordSink>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                store: Arc::new(InMemoryFileStateStore::new()),
                sink: Arc::new(MemoryRecordSink::new()),
            }
        }

        fn loader(&self, batch_size: usize) -> BatchLoader {
            let mut config = LoaderConfig::new(self.dir.path());
            config.batch_size = batch_size;
            config.reclaim_interval = 4;
            BatchLoader::new(config, self.store.clone(), self.sink.clone())
        }

        async fn extracted(&self, archive: &str, csv_name: &str, body: &str) -> FileRecord {
            std::fs::write(self.dir.path().join(csv_name), body).unwrap();
            let mut record = FileRecord::new(archive, "2024-08");
            record.finish_download(10, "abc").unwrap();
            record.finish_extraction(csv_name, body.len() as u64, "def");
            self.store.create(&record).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_load_file_batches_and_marks_processed() {
        let fx = Fixture::new();
        let body = vec![COMPANY_LINE; 25].join("\n");
        let record = fx.extracted("Empresas0.zip", "Empresas0_EMPRECSV.csv", &body).await;

        let outcome = fx.loader(10).load_file(&record, &CancellationToken::new()).await.unwrap();
        let FileLoadOutcome::Loaded(stats) = outcome else {
            panic!("expected a loaded file, got {:?}", outcome);
        };

        assert_eq!(stats.records_stored, 25);
        assert_eq!(stats.batches, 3);
        assert_eq!(fx.sink.count(RecordShape::Companies).await.unwrap(), 25);

        let stored = fx.store.get_by_name_and_period("Empresas0.zip", "2024-08").await.unwrap().unwrap();
        assert_eq!(stored.csv_status, CsvStatus::Processed);
        assert_eq!(stored.download_status, DownloadStatus::Finished);
        assert_eq!(stored.record_count, Some(25));
    }

    #[tokio::test]
    async fn test_rows_without_key_are_rejected() {
        let fx = Fixture::new();
        let body = format!("{}\n\"\";\"NO KEY\";\"1\";\"2\";\"0\";\"3\";\"\"\n{}", COMPANY_LINE, COMPANY_LINE);
        let record = fx.extracted("Empresas1.zip", "Empresas1_EMPRECSV.csv", &body).await;

        let outcome = fx.loader(100).load_file(&record, &CancellationToken::new()).await.unwrap();
        let FileLoadOutcome::Loaded(stats) = outcome else {
            panic!("expected a loaded file");
        };
        assert_eq!(stats.records_stored, 2);
        assert_eq!(stats.rejected_rows, 1);
        assert_eq!(stats.short_lines, 0);
    }

    #[tokio::test]
    async fn test_code_tables_use_their_own_shape() {
        let fx = Fixture::new();
        let record = fx
            .extracted("Paises.zip", "Paises_F.K03200$Z.D40810.PAISCSV.csv", "\"105\";\"BRASIL\"\n\"249\";\"ESTADOS UNIDOS\"\n")
            .await;

        fx.loader(100).load_file(&record, &CancellationToken::new()).await.unwrap();

        let batches = fx.sink.batches().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].shape(), RecordShape::Countries);
        assert_eq!(fx.sink.count(RecordShape::Cnaes).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_shape_is_skipped_without_state_change() {
        let fx = Fixture::new();
        let record = fx.extracted("Layout.zip", "Layout_README.csv", "a;b;c\n").await;

        let outcome = fx.loader(100).load_file(&record, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, FileLoadOutcome::Skipped(SkipReason::UnknownShape));

        let stored = fx.store.get_by_name_and_period("Layout.zip", "2024-08").await.unwrap().unwrap();
        assert_eq!(stored.csv_status, CsvStatus::Extracted);
    }

    #[tokio::test]
    async fn test_missing_file_is_sent_back_for_extraction() {
        let fx = Fixture::new();
        let record = fx.extracted("Socios0.zip", "Socios0_SOCIOCSV.csv", "x").await;
        std::fs::remove_file(fx.dir.path().join("Socios0_SOCIOCSV.csv")).unwrap();

        let outcome = fx.loader(100).load_file(&record, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, FileLoadOutcome::Skipped(SkipReason::FileMissing));

        let stored = fx.store.get_by_name_and_period("Socios0.zip", "2024-08").await.unwrap().unwrap();
        assert_eq!(stored.csv_status, CsvStatus::Error);
    }

    #[tokio::test]
    async fn test_cancelled_load_is_recorded_as_error() {
        let fx = Fixture::new();
        let record = fx.extracted("Empresas2.zip", "Empresas2_EMPRECSV.csv", COMPANY_LINE).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx.loader(100).load_file(&record, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(fx.sink.batches().unwrap().is_empty());

        let stored = fx.store.get_by_name_and_period("Empresas2.zip", "2024-08").await.unwrap().unwrap();
        assert_eq!(stored.csv_status, CsvStatus::Error);
        assert_eq!(stored.last_error.as_deref(), Some("cancelled"));
    }

    struct FailingSink;

    #[async_trait]
    impl RecordSink for FailingSink {
        async fn add_batch(&self, _batch: RecordBatch) -> Result<u64> {
            Err(IngestError::State("storage unavailable".to_string()))
        }

        async fn count(&self, _shape: RecordShape) -> Result<i64> {
            Ok(0)
        }

        async fn clear_table(&self, _shape: RecordShape) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_failure_marks_error_and_pending_continues() {
        let fx = Fixture::new();
        fx.extracted("Empresas3.zip", "Empresas3_EMPRECSV.csv", COMPANY_LINE).await;
        fx.extracted("Simples.zip", "Simples_SIMPLES.csv", "\"1\";\"S\";\"20200101\";\"0\";\"N\";\"0\";\"0\"").await;

        let loader = BatchLoader::new(
            LoaderConfig::new(fx.dir.path()),
            fx.store.clone(),
            Arc::new(FailingSink),
        );
        let report = loader.load_pending(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.files_pending, 2);
        assert_eq!(report.files_failed, 2);
        assert_eq!(report.files_loaded, 0);
        assert!(!report.cancelled);

        for record in fx.store.list_by_period("2024-08").await.unwrap() {
            assert_eq!(record.csv_status, CsvStatus::Error);
            assert!(record.last_error.unwrap().contains("storage unavailable"));
        }
    }
}
