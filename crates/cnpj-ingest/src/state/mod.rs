//! File-state store
//!
//! The persisted ledger of every archive's lifecycle. Every stage consults it
//! before touching the network or the disk, which is what makes a re-run
//! resume instead of repeat.
//!
//! # Architecture
//!
//! ```text
//! DownloadManager ──┐
//! ArchiveExtractor ─┼──> dyn FileStateStore ──> PgFileStateStore (rf_file_state)
//! BatchLoader ──────┘                       └─> InMemoryFileStateStore
//! ```
//!
//! Each call is a single read or write; no lock is held across I/O and
//! `update` is last-writer-wins on the row.

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::InMemoryFileStateStore;
pub use models::{CsvStatus, DownloadStatus, FileRecord};
pub use postgres::PgFileStateStore;

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait FileStateStore: Send + Sync {
    async fn get_by_name_and_period(
        &self,
        archive_name: &str,
        period: &str,
    ) -> Result<Option<FileRecord>>;

    /// Insert a new record; fails if `(archive_name, period)` already exists
    async fn create(&self, record: &FileRecord) -> Result<FileRecord>;

    /// Overwrite the stored row with the same id
    async fn update(&self, record: &FileRecord) -> Result<()>;

    /// All records of a period ordered by archive name
    async fn list_by_period(&self, period: &str) -> Result<Vec<FileRecord>>;

    async fn exists_by_name_and_period(&self, archive_name: &str, period: &str) -> Result<bool>;

    /// Records in `status`, oldest first
    async fn list_by_csv_status(&self, status: CsvStatus) -> Result<Vec<FileRecord>>;

    async fn get_by_extracted_name_and_period(
        &self,
        extracted_name: &str,
        period: &str,
    ) -> Result<Option<FileRecord>>;
}

/// Mark an archive `InProgress`, creating its record on the first attempt
pub async fn begin_download(
    store: &dyn FileStateStore,
    archive_name: &str,
    period: &str,
) -> Result<FileRecord> {
    match store.get_by_name_and_period(archive_name, period).await? {
        Some(mut record) => {
            record.begin_download();
            store.update(&record).await?;
            Ok(record)
        },
        None => {
            let mut record = FileRecord::new(archive_name, period);
            record.begin_download();
            store.create(&record).await
        },
    }
}
