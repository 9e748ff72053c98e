//! CSV type inference for extracted entries
//!
//! Receita Federal entries carry no extension (`K3241.K03200Y0.D40810.EMPRECSV`),
//! so a file is recognized as CSV from its name and first line.

use crate::error::Result;
use crate::fs_ops::move_with_retry;
use crate::loader::RecordShape;
use crate::reader::{split_fields, RecordReader, TextEncoding, FIELD_DELIMITER};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MIN_INFERRED_FIELDS: usize = 3;

pub fn has_csv_extension(name: &str) -> bool {
    name.to_lowercase().ends_with(".csv")
}

/// Decide whether a file is delimited data.
///
/// A `.csv` name is accepted as is. Otherwise the first non-blank line must
/// contain the delimiter and either the name carries a known record token or
/// the line splits into at least three fields.
pub fn looks_like_csv(name: &str, first_line: Option<&str>) -> bool {
    if has_csv_extension(name) {
        return true;
    }

    let Some(line) = first_line else {
        return false;
    };
    if !line.contains(FIELD_DELIMITER) {
        return false;
    }

    RecordShape::from_file_name(name).is_some() || split_fields(line).len() >= MIN_INFERRED_FIELDS
}

async fn first_line(path: &Path, encoding: TextEncoding) -> Result<Option<String>> {
    let mut reader = RecordReader::open(path, encoding).await?;
    reader.next_line(&CancellationToken::new()).await
}

/// Path of `path` as a CSV, renaming it with a `.csv` suffix when the
/// content qualifies; `None` when the file is not CSV.
///
/// If the first line cannot be read the file is assumed to be CSV.
pub async fn infer_csv_path(path: &Path, encoding: TextEncoding) -> Result<Option<PathBuf>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if has_csv_extension(&name) {
        return Ok(Some(path.to_path_buf()));
    }

    let is_csv = match first_line(path, encoding).await {
        Ok(line) => looks_like_csv(&name, line.as_deref()),
        Err(e) => {
            warn!(file = %path.display(), "Could not inspect file, treating it as CSV: {}", e);
            true
        },
    };

    if !is_csv {
        debug!(file = %path.display(), "Not a CSV, leaving untouched");
        return Ok(None);
    }

    let renamed = path.with_file_name(format!("{}.csv", name));
    move_with_retry(path, &renamed).await?;
    debug!(from = %name, to = %renamed.display(), "Renamed extracted entry as CSV");

    Ok(Some(renamed))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_csv_extension_is_case_insensitive() {
        assert!(looks_like_csv("Empresas.CSV", None));
        assert!(looks_like_csv("x.csv", Some("no delimiter")));
    }

    #[test]
    fn test_known_token_needs_only_a_delimiter() {
        assert!(looks_like_csv("K3241.K03200Y0.D40810.EMPRECSV", Some("\"1\";\"2\"")));
        assert!(!looks_like_csv("K3241.K03200Y0.D40810.EMPRECSV", Some("no delimiter")));
        assert!(!looks_like_csv("K3241.K03200Y0.D40810.EMPRECSV", None));
    }

    #[test]
    fn test_unknown_name_needs_three_fields() {
        assert!(looks_like_csv("DATA.BIN", Some("a;b;c")));
        assert!(!looks_like_csv("DATA.BIN", Some("a;b")));
        assert!(!looks_like_csv("LEIAME.txt", Some("Layout dos dados abertos")));
    }

    #[tokio::test]
    async fn test_infer_renames_extensionless_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("K3241.K032007DEMPRECSV");
        std::fs::write(&path, "\n\"1\";\"A\";\"2\";\"3\";\"0,00\";\"1\";\"\"\n").unwrap();

        let csv = infer_csv_path(&path, TextEncoding::Latin1).await.unwrap().unwrap();
        assert_eq!(csv, dir.path().join("K3241.K032007DEMPRECSV.csv"));
        assert!(csv.exists());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_infer_leaves_other_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("README");
        std::fs::write(&path, "plain text\n").unwrap();

        assert_eq!(infer_csv_path(&path, TextEncoding::Latin1).await.unwrap(), None);
        assert!(path.exists());
    }
}
