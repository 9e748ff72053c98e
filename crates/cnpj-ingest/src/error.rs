//! Error taxonomy for the ingestion pipeline
//!
//! Each stage contains its own failures: row errors stay inside a file,
//! file errors stay inside a stage. Only [`IngestError::DiskSpace`],
//! [`IngestError::Discovery`] and cancellation end a run early.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// No period or archive could be found on the remote listing
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// One archive failed to download (retryable up to the attempt cap)
    #[error("Download of {file} failed: {message}")]
    Download { file: String, message: String },

    /// Not enough free space on the work volume; fatal for the run
    #[error(
        "Insufficient disk space at {}: {available_gb} GB available, {required_gb} GB required",
        path.display()
    )]
    DiskSpace {
        path: PathBuf,
        available_gb: u64,
        required_gb: u64,
    },

    #[error("Extraction of {archive} failed: {message}")]
    Extraction { archive: String, message: String },

    /// Structural CSV mismatch
    #[error("Validation of {file} failed: {message}")]
    Validation { file: String, message: String },

    #[error("Row {line} rejected: {message}")]
    RowParse { line: u64, message: String },

    #[error("Load of {file} failed: {source}")]
    Load {
        file: String,
        #[source]
        source: Box<IngestError>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Common(#[from] cnpj_common::CommonError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File state error: {0}")]
    State(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn download(file: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Download {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn extraction(archive: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Extraction {
            archive: archive.into(),
            message: message.into(),
        }
    }

    pub fn load(file: impl Into<String>, source: IngestError) -> Self {
        IngestError::Load {
            file: file.into(),
            source: Box::new(source),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            IngestError::Cancelled => true,
            IngestError::Load { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Io(std::io::Error::other(err))
    }
}
