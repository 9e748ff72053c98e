//! Structural CSV check
//!
//! Only the shape of the first lines is checked: every line must split into
//! the same number of fields. Column meaning is the loader's concern.

use crate::error::{IngestError, Result};
use crate::reader::{RecordReader, TextEncoding};
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_VALIDATION_LINES: usize = 100;

/// Check up to `max_lines` non-blank lines; returns the common field count.
pub async fn validate_structure(
    path: &Path,
    encoding: TextEncoding,
    max_lines: usize,
) -> Result<usize> {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cancel = CancellationToken::new();
    let mut reader = RecordReader::open(path, encoding).await?;

    let mut expected: Option<usize> = None;
    let mut checked = 0;

    while checked < max_lines {
        let Some(fields) = reader.next_record(&cancel).await? else {
            break;
        };
        checked += 1;

        match expected {
            None => expected = Some(fields.len()),
            Some(count) if count != fields.len() => {
                return Err(IngestError::Validation {
                    file,
                    message: format!(
                        "line {} has {} fields, expected {}",
                        reader.line_number(),
                        fields.len(),
                        count
                    ),
                });
            },
            Some(_) => {},
        }
    }

    expected.ok_or_else(|| IngestError::Validation {
        file,
        message: "no data lines".to_string(),
    })
}
