//! Batch loader over extracted CSVs with malformed lines

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{company_line, PERIOD};
use cnpj_ingest::loader::{
    BatchLoader, LoaderConfig, MemoryRecordSink, RecordBatch, RecordShape, RecordSink,
};
use cnpj_ingest::state::{CsvStatus, FileRecord, FileStateStore, InMemoryFileStateStore};
use sqlx::types::BigDecimal;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    dir: TempDir,
    store: Arc<InMemoryFileStateStore>,
    sink: Arc<MemoryRecordSink>,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            store: Arc::new(InMemoryFileStateStore::new()),
            sink: Arc::new(MemoryRecordSink::new()),
        }
    }

    fn loader(&self, batch_size: usize) -> BatchLoader {
        let config = LoaderConfig {
            batch_size,
            ..LoaderConfig::new(self.dir.path())
        };
        BatchLoader::new(config, self.store.clone(), self.sink.clone())
    }

    async fn extracted(&self, archive: &str, csv_name: &str, body: &[u8]) {
        std::fs::write(self.dir.path().join(csv_name), body).unwrap();
        let mut record = FileRecord::new(archive, PERIOD);
        record.finish_download(100, "zip-hash").unwrap();
        record.begin_extraction();
        record.finish_extraction(csv_name, body.len() as u64, "csv-hash");
        self.store.create(&record).await.unwrap();
    }

    async fn record(&self, archive: &str) -> FileRecord {
        self.store.get_by_name_and_period(archive, PERIOD).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_short_line_is_skipped_without_failing_the_file() {
    let h = Harness::new();

    let mut lines: Vec<String> = (1..=10).map(|i| company_line(&format!("{:08}", i))).collect();
    lines.insert(5, "\"99999999\";\"TRUNCATED\";\"2062\"".to_string());
    let body = lines.join("\n") + "\n";
    h.extracted("Empresas0.zip", "Empresas0_K3241.K03200Y0.D40810.EMPRECSV.csv", body.as_bytes())
        .await;

    let report = h.loader(4).load_pending(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.files_pending, 1);
    assert_eq!(report.files_loaded, 1);
    assert_eq!(report.files_failed, 0);
    assert_eq!(report.records_stored, 10);
    assert_eq!(h.sink.count(RecordShape::Companies).await.unwrap(), 10);

    let record = h.record("Empresas0.zip").await;
    assert_eq!(record.csv_status, CsvStatus::Processed);
    assert_eq!(record.record_count, Some(10));
    assert_eq!(record.last_error, None);
}

#[tokio::test]
async fn test_latin1_fields_are_decoded_and_cleaned() {
    let h = Harness::new();

    // "JOÃO" in ISO-8859-1, padded inside the quotes, followed by a blank line
    let body = b"\"00000001\";\"  JO\xC3O PADARIA  \";\"2062\";\"49\";\"1500,50\";\"01\";\"\"\n\n".to_vec();
    h.extracted("Empresas1.zip", "Empresas1_EMPRECSV.csv", &body).await;

    h.loader(100).load_pending(&CancellationToken::new()).await.unwrap();

    let batches = h.sink.batches().unwrap();
    let RecordBatch::Companies(rows) = &batches[0] else {
        panic!("expected a companies batch, got {:?}", batches[0].shape());
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cnpj_basico, "00000001");
    assert_eq!(rows[0].razao_social.as_deref(), Some("JOÃO PADARIA"));
    assert_eq!(rows[0].capital_social, Some(BigDecimal::from_str("1500.50").unwrap()));
    assert_eq!(rows[0].ente_federativo, None);
}

#[tokio::test]
async fn test_every_file_is_attempted_and_missing_files_go_back_to_extraction() {
    let h = Harness::new();

    h.extracted("Cnaes.zip", "Cnaes_F.K03200$Z.D40810.CNAECSV.csv", b"\"0111301\";\"Cultivo de arroz\"\n")
        .await;
    h.extracted("Motivos.zip", "Motivos_F.K03200$Z.D40810.MOTICSV.csv", b"\"01\";\"EXTINCAO\"\n")
        .await;
    std::fs::remove_file(h.dir.path().join("Motivos_F.K03200$Z.D40810.MOTICSV.csv")).unwrap();

    let report = h.loader(100).load_pending(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.files_pending, 2);
    assert_eq!(report.files_loaded, 1);
    assert_eq!(report.files_skipped, 1);

    assert_eq!(h.record("Cnaes.zip").await.csv_status, CsvStatus::Processed);
    assert_eq!(h.sink.count(RecordShape::Cnaes).await.unwrap(), 1);

    let missing = h.record("Motivos.zip").await;
    assert_eq!(missing.csv_status, CsvStatus::Error);
    assert_eq!(missing.last_error.as_deref(), Some("extracted file not found on disk"));

    // nothing is left pending once every file was handled
    let again = h.loader(100).load_pending(&CancellationToken::new()).await.unwrap();
    assert_eq!(again.files_pending, 0);
}

#[tokio::test]
async fn test_cancelled_load_leaves_file_for_the_next_run() {
    let h = Harness::new();
    let body = (1..=50).map(|i| company_line(&format!("{:08}", i))).collect::<Vec<_>>().join("\n");
    h.extracted("Empresas2.zip", "Empresas2_EMPRECSV.csv", body.as_bytes()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let record = h.record("Empresas2.zip").await;
    let result = h.loader(10).load_file(&record, &cancel).await;
    assert!(result.unwrap_err().is_cancelled());

    let stored = h.record("Empresas2.zip").await;
    assert_eq!(stored.csv_status, CsvStatus::Error);
    assert_eq!(stored.last_error.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn test_file_left_in_processing_is_loaded_on_the_next_run() {
    let h = Harness::new();
    let body = (1..=6).map(|i| company_line(&format!("{:08}", i))).collect::<Vec<_>>().join("\n");
    h.extracted("Empresas3.zip", "Empresas3_EMPRECSV.csv", body.as_bytes()).await;

    // the archive is gone and the previous load never finished
    let mut record = h.record("Empresas3.zip").await;
    record.begin_processing();
    h.store.update(&record).await.unwrap();

    let report = h.loader(4).load_pending(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.files_pending, 1);
    assert_eq!(report.files_loaded, 1);
    assert_eq!(report.records_stored, 6);

    let stored = h.record("Empresas3.zip").await;
    assert_eq!(stored.csv_status, CsvStatus::Processed);
    assert_eq!(stored.record_count, Some(6));
}
