//! Streaming record reader
//!
//! Turns a delimited text file into one `Vec<String>` per non-blank line.
//! Lines are read one at a time into a reused byte buffer, so memory is
//! bounded by the longest line rather than the file size.
//!
//! The Receita Federal publishes its CSVs in ISO-8859-1, where every byte maps
//! directly to the Unicode code point of the same value.
//!
//! # Example
//!
//! ```no_run
//! use cnpj_ingest::reader::{RecordReader, TextEncoding};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> cnpj_ingest::Result<()> {
//! let cancel = CancellationToken::new();
//! let mut reader = RecordReader::open("/tmp/Empresas0.csv", TextEncoding::Latin1).await?;
//! while let Some(fields) = reader.next_record(&cancel).await? {
//!     println!("{} columns", fields.len());
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{IngestError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub const FIELD_DELIMITER: char = ';';

const READ_BUFFER: usize = 64 * 1024;
const LINE_CAPACITY: usize = 4 * 1024;

/// Single-byte or UTF-8 source encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Latin1,
    /// Invalid sequences are replaced with U+FFFD
    Utf8,
}

impl TextEncoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => Ok(TextEncoding::Latin1),
            "utf8" | "utf-8" => Ok(TextEncoding::Utf8),
            other => Err(IngestError::Config(format!("Unsupported encoding: {}", other))),
        }
    }
}

/// Split a decoded line on `;` without any quote awareness; quotes are left
/// for the field codec.
pub fn split_fields(line: &str) -> Vec<String> {
    line.split(FIELD_DELIMITER).map(str::to_string).collect()
}

pub struct RecordReader {
    path: PathBuf,
    reader: BufReader<File>,
    encoding: TextEncoding,
    buffer: Vec<u8>,
    line_number: u64,
}

impl RecordReader {
    pub async fn open(path: impl AsRef<Path>, encoding: TextEncoding) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;

        Ok(Self {
            path,
            reader: BufReader::with_capacity(READ_BUFFER, file),
            encoding,
            buffer: Vec::with_capacity(LINE_CAPACITY),
            line_number: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Physical line number of the last line returned (1-based)
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    /// Next non-blank line, decoded, without its line terminator.
    ///
    /// Returns `Ok(None)` at end of file or as soon as `cancel` fires.
    pub async fn next_line(&mut self, cancel: &CancellationToken) -> Result<Option<String>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            self.buffer.clear();
            let read = self.reader.read_until(b'\n', &mut self.buffer).await?;
            if read == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            let mut end = self.buffer.len();
            while end > 0 && matches!(self.buffer[end - 1], b'\n' | b'\r') {
                end -= 1;
            }

            let line = self.encoding.decode(&self.buffer[..end]);
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(line));
        }
    }

    /// Next non-blank line split into raw fields
    pub async fn next_record(&mut self, cancel: &CancellationToken) -> Result<Option<Vec<String>>> {
        Ok(self.next_line(cancel).await?.map(|line| split_fields(&line)))
    }

    /// Give back memory held by an unusually long line
    pub fn reclaim(&mut self) {
        self.buffer.clear();
        self.buffer.shrink_to(LINE_CAPACITY);
    }
}
