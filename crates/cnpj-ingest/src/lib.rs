//! Receita Federal CNPJ ingestion
//!
//! Periodically fetches the open CNPJ registry extracts, unpacks them and
//! loads their records into Postgres, resuming from a persisted per-archive
//! state after any interruption.
//!
//! # Stages
//!
//! - **Download**: [`download`] discovers the latest period and fetches its
//!   archives concurrently with retry and SHA-256 recording
//! - **Extract**: [`extract`] unpacks archives safely and recognizes the CSVs
//! - **Load**: [`loader`] streams CSVs into the record sink in batches
//! - **State**: [`state`] is the ledger every stage consults before working
//! - **Orchestration**: [`orchestrator`] runs the stages on a schedule
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cnpj_ingest::config::IngestConfig;
//! use cnpj_ingest::download::SystemDiskSpace;
//! use cnpj_ingest::loader::MemoryRecordSink;
//! use cnpj_ingest::orchestrator::PipelineOrchestrator;
//! use cnpj_ingest::state::InMemoryFileStateStore;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let orchestrator = PipelineOrchestrator::from_config(
//!         &config,
//!         Arc::new(InMemoryFileStateStore::new()),
//!         Arc::new(MemoryRecordSink::new()),
//!         Arc::new(SystemDiskSpace),
//!     )?;
//!     let summary = orchestrator.run_once(&CancellationToken::new()).await?;
//!     println!("{} records loaded", summary.records_loaded());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod codec;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod fs_ops;
pub mod loader;
pub mod orchestrator;
pub mod reader;
pub mod state;

pub use error::{IngestError, Result};
