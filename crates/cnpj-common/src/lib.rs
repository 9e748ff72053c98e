//! Shared building blocks for the CNPJ ingestion workspace
//!
//! - **Errors**: [`CommonError`] and its [`Result`] alias
//! - **Checksums**: streaming SHA-256 of files and readers
//! - **Formatting**: human-readable byte counts for progress logs
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//!
//! # Example
//!
//! ```no_run
//! use cnpj_common::checksum::sha256_file;
//!
//! fn main() -> cnpj_common::Result<()> {
//!     let digest = sha256_file("/tmp/Empresas0.zip")?;
//!     println!("{}", digest);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod format;
pub mod logging;

pub use error::{CommonError, Result};
