//! Process-local file-state store
//!
//! Backs the `--no-database` trial mode and the test suite. State is lost
//! when the process exits.

use super::{CsvStatus, FileRecord, FileStateStore};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

type Key = (String, String);

#[derive(Debug, Default)]
pub struct InMemoryFileStateStore {
    records: Mutex<HashMap<Key, FileRecord>>,
}

impl InMemoryFileStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Key, FileRecord>>> {
        self.records
            .lock()
            .map_err(|_| IngestError::State("file state lock poisoned".to_string()))
    }

    /// Snapshot of every record, ordered by period then archive name
    pub fn all(&self) -> Result<Vec<FileRecord>> {
        let mut records: Vec<_> = self.lock()?.values().cloned().collect();
        records.sort_by(|a, b| {
            a.period
                .cmp(&b.period)
                .then_with(|| a.archive_name.cmp(&b.archive_name))
        });
        Ok(records)
    }
}

#[async_trait]
impl FileStateStore for InMemoryFileStateStore {
    async fn get_by_name_and_period(
        &self,
        archive_name: &str,
        period: &str,
    ) -> Result<Option<FileRecord>> {
        let key = (archive_name.to_string(), period.to_string());
        Ok(self.lock()?.get(&key).cloned())
    }

    async fn create(&self, record: &FileRecord) -> Result<FileRecord> {
        let key = (record.archive_name.clone(), record.period.clone());
        let mut records = self.lock()?;
        if records.contains_key(&key) {
            return Err(IngestError::State(format!(
                "{} already registered for period {}",
                record.archive_name, record.period
            )));
        }
        records.insert(key, record.clone());
        Ok(record.clone())
    }

    async fn update(&self, record: &FileRecord) -> Result<()> {
        let mut records = self.lock()?;
        let key = records
            .iter()
            .find(|(_, stored)| stored.id == record.id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| IngestError::State(format!("No file record with id {}", record.id)))?;

        records.remove(&key);
        records.insert(
            (record.archive_name.clone(), record.period.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn list_by_period(&self, period: &str) -> Result<Vec<FileRecord>> {
        let mut records: Vec<_> = self
            .lock()?
            .values()
            .filter(|r| r.period == period)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.archive_name.cmp(&b.archive_name));
        Ok(records)
    }

    async fn exists_by_name_and_period(&self, archive_name: &str, period: &str) -> Result<bool> {
        let key = (archive_name.to_string(), period.to_string());
        Ok(self.lock()?.contains_key(&key))
    }

    async fn list_by_csv_status(&self, status: CsvStatus) -> Result<Vec<FileRecord>> {
        let mut records: Vec<_> = self
            .lock()?
            .values()
            .filter(|r| r.csv_status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.archive_name.cmp(&b.archive_name))
        });
        Ok(records)
    }

    async fn get_by_extracted_name_and_period(
        &self,
        extracted_name: &str,
        period: &str,
    ) -> Result<Option<FileRecord>> {
        Ok(self
            .lock()?
            .values()
            .find(|r| r.period == period && r.extracted_file_name.as_deref() == Some(extracted_name))
            .cloned())
    }
}
