//! Record sink that keeps batches in memory

use super::shape::RecordShape;
use super::sink::{RecordBatch, RecordSink};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    batches: Mutex<Vec<RecordBatch>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<RecordBatch>>> {
        self.batches
            .lock()
            .map_err(|_| IngestError::State("record sink lock poisoned".to_string()))
    }

    /// Every batch received so far, in arrival order
    pub fn batches(&self) -> Result<Vec<RecordBatch>> {
        Ok(self.lock()?.clone())
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn add_batch(&self, batch: RecordBatch) -> Result<u64> {
        let written = batch.len() as u64;
        if written > 0 {
            self.lock()?.push(batch);
        }
        Ok(written)
    }

    async fn count(&self, shape: RecordShape) -> Result<i64> {
        let total: usize = self
            .lock()?
            .iter()
            .filter(|batch| batch.shape() == shape)
            .map(RecordBatch::len)
            .sum();
        Ok(total as i64)
    }

    async fn clear_table(&self, shape: RecordShape) -> Result<()> {
        self.lock()?.retain(|batch| batch.shape() != shape);
        Ok(())
    }
}
