//! Storage interface consumed by the batch loader

use super::records::{CodeEntry, Company, Establishment, Partner, SimplesOption};
use super::shape::RecordShape;
use crate::error::Result;
use async_trait::async_trait;

/// A bounded group of parsed rows of one shape, written as one unit
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBatch {
    Companies(Vec<Company>),
    Establishments(Vec<Establishment>),
    Partners(Vec<Partner>),
    Simples(Vec<SimplesOption>),
    /// One of the six code/description tables
    Codes {
        shape: RecordShape,
        entries: Vec<CodeEntry>,
    },
}

impl RecordBatch {
    pub fn shape(&self) -> RecordShape {
        match self {
            RecordBatch::Companies(_) => RecordShape::Companies,
            RecordBatch::Establishments(_) => RecordShape::Establishments,
            RecordBatch::Partners(_) => RecordShape::Partners,
            RecordBatch::Simples(_) => RecordShape::Simples,
            RecordBatch::Codes { shape, .. } => *shape,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordBatch::Companies(rows) => rows.len(),
            RecordBatch::Establishments(rows) => rows.len(),
            RecordBatch::Partners(rows) => rows.len(),
            RecordBatch::Simples(rows) => rows.len(),
            RecordBatch::Codes { entries, .. } => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Batch-oriented destination for parsed rows, one table per shape
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist the whole batch; returns the number of rows written
    async fn add_batch(&self, batch: RecordBatch) -> Result<u64>;

    async fn count(&self, shape: RecordShape) -> Result<i64>;

    async fn clear_table(&self, shape: RecordShape) -> Result<()>;
}
