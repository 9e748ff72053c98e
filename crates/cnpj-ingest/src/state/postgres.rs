//! Postgres-backed file-state store (`rf_file_state`)

use super::{CsvStatus, DownloadStatus, FileRecord, FileStateStore};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT id, archive_name, period, extracted_file_name, hash_zip, hash_csv,
           size_zip, size_csv, download_status, csv_status, record_count,
           last_error, downloaded_at, last_checked_at, created_at
    FROM rf_file_state
"#;

#[derive(Debug, sqlx::FromRow)]
struct FileRecordRow {
    id: Uuid,
    archive_name: String,
    period: String,
    extracted_file_name: Option<String>,
    hash_zip: Option<String>,
    hash_csv: Option<String>,
    size_zip: i64,
    size_csv: Option<i64>,
    download_status: String,
    csv_status: String,
    record_count: Option<i64>,
    last_error: Option<String>,
    downloaded_at: Option<DateTime<Utc>>,
    last_checked_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<FileRecordRow> for FileRecord {
    type Error = IngestError;

    fn try_from(row: FileRecordRow) -> Result<Self> {
        Ok(FileRecord {
            id: row.id,
            archive_name: row.archive_name,
            period: row.period,
            extracted_file_name: row.extracted_file_name,
            hash_zip: row.hash_zip,
            hash_csv: row.hash_csv,
            size_zip: row.size_zip,
            size_csv: row.size_csv,
            download_status: row.download_status.parse::<DownloadStatus>()?,
            csv_status: row.csv_status.parse::<CsvStatus>()?,
            record_count: row.record_count,
            last_error: row.last_error,
            downloaded_at: row.downloaded_at,
            last_checked_at: row.last_checked_at,
            created_at: row.created_at,
        })
    }
}

fn into_records(rows: Vec<FileRecordRow>) -> Result<Vec<FileRecord>> {
    rows.into_iter().map(FileRecord::try_from).collect()
}

#[derive(Clone)]
pub struct PgFileStateStore {
    pool: PgPool,
}

impl PgFileStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileStateStore for PgFileStateStore {
    async fn get_by_name_and_period(
        &self,
        archive_name: &str,
        period: &str,
    ) -> Result<Option<FileRecord>> {
        let sql = format!("{} WHERE archive_name = $1 AND period = $2", SELECT_COLUMNS);
        let row = sqlx::query_as::<_, FileRecordRow>(&sql)
            .bind(archive_name)
            .bind(period)
            .fetch_optional(&self.pool)
            .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn create(&self, record: &FileRecord) -> Result<FileRecord> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO rf_file_state (
                id, archive_name, period, extracted_file_name, hash_zip, hash_csv,
                size_zip, size_csv, download_status, csv_status, record_count,
                last_error, downloaded_at, last_checked_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (archive_name, period) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.archive_name)
        .bind(&record.period)
        .bind(&record.extracted_file_name)
        .bind(&record.hash_zip)
        .bind(&record.hash_csv)
        .bind(record.size_zip)
        .bind(record.size_csv)
        .bind(record.download_status.as_str())
        .bind(record.csv_status.as_str())
        .bind(record.record_count)
        .bind(&record.last_error)
        .bind(record.downloaded_at)
        .bind(record.last_checked_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(IngestError::State(format!(
                "{} already registered for period {}",
                record.archive_name, record.period
            )));
        }

        Ok(record.clone())
    }

    async fn update(&self, record: &FileRecord) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE rf_file_state SET
                extracted_file_name = $2,
                hash_zip = $3,
                hash_csv = $4,
                size_zip = $5,
                size_csv = $6,
                download_status = $7,
                csv_status = $8,
                record_count = $9,
                last_error = $10,
                downloaded_at = $11,
                last_checked_at = $12,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.extracted_file_name)
        .bind(&record.hash_zip)
        .bind(&record.hash_csv)
        .bind(record.size_zip)
        .bind(record.size_csv)
        .bind(record.download_status.as_str())
        .bind(record.csv_status.as_str())
        .bind(record.record_count)
        .bind(&record.last_error)
        .bind(record.downloaded_at)
        .bind(record.last_checked_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(IngestError::State(format!(
                "No file record with id {}",
                record.id
            )));
        }

        Ok(())
    }

    async fn list_by_period(&self, period: &str) -> Result<Vec<FileRecord>> {
        let sql = format!("{} WHERE period = $1 ORDER BY archive_name", SELECT_COLUMNS);
        let rows = sqlx::query_as::<_, FileRecordRow>(&sql)
            .bind(period)
            .fetch_all(&self.pool)
            .await?;

        into_records(rows)
    }

    async fn exists_by_name_and_period(&self, archive_name: &str, period: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM rf_file_state WHERE archive_name = $1 AND period = $2)",
        )
        .bind(archive_name)
        .bind(period)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn list_by_csv_status(&self, status: CsvStatus) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "{} WHERE csv_status = $1 ORDER BY created_at, archive_name",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, FileRecordRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        into_records(rows)
    }

    async fn get_by_extracted_name_and_period(
        &self,
        extracted_name: &str,
        period: &str,
    ) -> Result<Option<FileRecord>> {
        let sql = format!(
            "{} WHERE extracted_file_name = $1 AND period = $2",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, FileRecordRow>(&sql)
            .bind(extracted_name)
            .bind(period)
            .fetch_optional(&self.pool)
            .await?;

        row.map(FileRecord::try_from).transpose()
    }
}
