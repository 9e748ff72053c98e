//! Archive extractor over synthetic Receita Federal archives

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{companies_csv, company_line, plenty_of_space, zip_bytes, FixedSpace, GB, PERIOD};
use cnpj_ingest::extract::{ArchiveExtractor, ArchiveOutcome, ExtractorConfig};
use cnpj_ingest::loader::{BatchLoader, LoaderConfig, MemoryRecordSink, RecordShape, RecordSink};
use cnpj_ingest::state::{CsvStatus, DownloadStatus, FileRecord, FileStateStore, InMemoryFileStateStore};
use cnpj_ingest::IngestError;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    dir: TempDir,
    store: Arc<InMemoryFileStateStore>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("downloads")).unwrap();
        Self {
            dir,
            store: Arc::new(InMemoryFileStateStore::new()),
        }
    }

    fn config(&self) -> ExtractorConfig {
        ExtractorConfig::new(self.dir.path())
    }

    fn extractor(&self, config: ExtractorConfig) -> ArchiveExtractor {
        ArchiveExtractor::new(config, self.store.clone(), Arc::new(plenty_of_space()))
    }

    fn extractor_with_space(&self, free_bytes: u64) -> ArchiveExtractor {
        ArchiveExtractor::new(self.config(), self.store.clone(), Arc::new(FixedSpace(free_bytes)))
    }

    fn loader(&self, sink: Arc<MemoryRecordSink>) -> BatchLoader {
        BatchLoader::new(LoaderConfig::new(self.dir.path().join("extracted")), self.store.clone(), sink)
    }

    fn place_archive(&self, name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = self.dir.path().join("downloads").join(name);
        std::fs::write(&path, zip_bytes(entries)).unwrap();
        path
    }

    fn extracted(&self, name: &str) -> PathBuf {
        self.dir.path().join("extracted").join(name)
    }
}

#[tokio::test]
async fn test_extensionless_entry_becomes_a_companies_csv() {
    let h = Harness::new();
    h.place_archive("Empresas0.zip", &[("K3241.K032007DEMPRECSV", &companies_csv(4))]);

    let report = h.extractor(h.config()).extract_all(PERIOD, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(report.csv_files, 1);
    assert!(report.errors.is_empty());

    let record = h.store.get_by_name_and_period("Empresas0.zip", PERIOD).await.unwrap().unwrap();
    assert_eq!(record.download_status, DownloadStatus::Finished);
    assert_eq!(record.csv_status, CsvStatus::Extracted);

    let csv_name = record.extracted_file_name.clone().unwrap();
    assert_eq!(csv_name, "Empresas0_K3241.K032007DEMPRECSV.csv");
    assert!(h.extracted(&csv_name).exists());
    assert_eq!(RecordShape::from_file_name(&csv_name), Some(RecordShape::Companies));
    assert!(record.hash_csv.is_some());

    // staging is always cleaned up
    assert_eq!(std::fs::read_dir(h.dir.path().join("staging")).unwrap().count(), 0);

    let sink = Arc::new(MemoryRecordSink::new());
    let loader = BatchLoader::new(
        LoaderConfig::new(h.dir.path().join("extracted")),
        h.store.clone(),
        sink.clone(),
    );
    let load = loader.load_pending(&CancellationToken::new()).await.unwrap();
    assert_eq!(load.files_loaded, 1);
    assert_eq!(sink.count(RecordShape::Companies).await.unwrap(), 4);
}

#[tokio::test]
async fn test_entry_paths_are_flattened_into_the_extraction_directory() {
    let h = Harness::new();
    h.place_archive(
        "Socios0.zip",
        &[("../../outside/K3241.K03200Y0.D40810.SOCIOCSV", "\"1\";\"2\";\"3\"\n")],
    );

    h.extractor(h.config()).extract_all(PERIOD, &CancellationToken::new()).await.unwrap();

    let record = h.store.get_by_name_and_period("Socios0.zip", PERIOD).await.unwrap().unwrap();
    let csv_name = record.extracted_file_name.unwrap();
    assert_eq!(csv_name, "Socios0_K3241.K03200Y0.D40810.SOCIOCSV.csv");
    assert!(h.extracted(&csv_name).exists());
    assert!(!h.dir.path().join("outside").exists());
    assert!(!h.dir.path().parent().unwrap().join("outside").exists());
}

#[tokio::test]
async fn test_validation_mismatch_marks_error() {
    let h = Harness::new();
    let body = format!("{}\n\"00000002\";\"SHORT\"\n", company_line("00000001"));
    let archive = h.place_archive("Empresas1.zip", &[("K3241.K03200Y1.D40810.EMPRECSV", &body)]);

    let err = h
        .extractor(h.config())
        .extract_archive(&archive, PERIOD, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Extraction { .. }));

    let record = h.store.get_by_name_and_period("Empresas1.zip", PERIOD).await.unwrap().unwrap();
    assert_eq!(record.csv_status, CsvStatus::Error);
    assert!(record.last_error.unwrap().starts_with("validation failed"));
    assert!(archive.exists());
}

#[tokio::test]
async fn test_archive_without_csv_marks_error() {
    let h = Harness::new();
    let archive = h.place_archive("Motivos.zip", &[("LEIAME.txt", "Layout dos dados abertos do CNPJ\n")]);

    let err = h
        .extractor(h.config())
        .extract_archive(&archive, PERIOD, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no CSV found in archive"));

    let record = h.store.get_by_name_and_period("Motivos.zip", PERIOD).await.unwrap().unwrap();
    assert_eq!(record.csv_status, CsvStatus::Error);
    assert_eq!(record.last_error.as_deref(), Some("no CSV found in archive"));
}

#[tokio::test]
async fn test_checksum_mismatch_skips_archive() {
    let h = Harness::new();
    let archive = h.place_archive("Cnaes.zip", &[("F.K03200$Z.D40810.CNAECSV", "\"0111301\";\"Cultivo de arroz\"\n")]);

    let mut record = FileRecord::new("Cnaes.zip", PERIOD);
    record.finish_download(10, "0000").unwrap();
    h.store.create(&record).await.unwrap();

    let result = h
        .extractor(h.config())
        .extract_archive(&archive, PERIOD, &CancellationToken::new())
        .await;
    assert!(result.unwrap_err().to_string().contains("checksum mismatch"));

    let stored = h.store.get_by_name_and_period("Cnaes.zip", PERIOD).await.unwrap().unwrap();
    assert_eq!(stored.csv_status, CsvStatus::Error);
    assert_eq!(stored.extracted_file_name, None);
}

#[tokio::test]
async fn test_already_extracted_archive_is_skipped_and_deleted_when_configured() {
    let h = Harness::new();
    let archive = h.place_archive("Paises.zip", &[("F.K03200$Z.D40810.PAISCSV", "\"105\";\"BRASIL\"\n")]);

    let mut config = h.config();
    config.delete_archive_after_extraction = true;
    let extractor = h.extractor(config);
    let cancel = CancellationToken::new();

    let first = extractor.extract_archive(&archive, PERIOD, &cancel).await.unwrap();
    assert!(matches!(first, ArchiveOutcome::Extracted { .. }));
    assert!(!archive.exists());

    // a fresh copy of the same archive is not extracted twice
    h.place_archive("Paises.zip", &[("F.K03200$Z.D40810.PAISCSV", "\"105\";\"BRASIL\"\n")]);
    let second = extractor.extract_archive(&archive, PERIOD, &cancel).await.unwrap();
    assert!(matches!(second, ArchiveOutcome::Skipped { .. }));
}

#[tokio::test]
async fn test_unreadable_archive_during_checksum_marks_error() {
    let h = Harness::new();
    let archive = h.dir.path().join("downloads").join("Municipios.zip");

    let mut record = FileRecord::new("Municipios.zip", PERIOD);
    record.finish_download(10, "abcd").unwrap();
    h.store.create(&record).await.unwrap();

    let err = h
        .extractor(h.config())
        .extract_archive(&archive, PERIOD, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Extraction { .. }));

    let stored = h.store.get_by_name_and_period("Municipios.zip", PERIOD).await.unwrap().unwrap();
    assert_eq!(stored.csv_status, CsvStatus::Error);
    assert!(stored.last_error.unwrap().starts_with("checksum verification failed"));
}

#[tokio::test]
async fn test_low_space_skips_archives_without_failing_the_stage() {
    let h = Harness::new();
    h.place_archive("Cnaes.zip", &[("F.K03200$Z.D40810.CNAECSV", "\"0111301\";\"Cultivo de arroz\"\n")]);
    h.place_archive("Paises.zip", &[("F.K03200$Z.D40810.PAISCSV", "\"105\";\"BRASIL\"\n")]);
    let cancel = CancellationToken::new();

    let report = h.extractor_with_space(2 * GB).extract_all(PERIOD, &cancel).await.unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.processed, 0);
    assert!(report.errors.is_empty());
    assert!(!report.cancelled);

    for name in ["Cnaes.zip", "Paises.zip"] {
        let record = h.store.get_by_name_and_period(name, PERIOD).await.unwrap().unwrap();
        assert_eq!(record.download_status, DownloadStatus::Finished);
        assert_eq!(record.csv_status, CsvStatus::NotProcessed);
        assert!(h.dir.path().join("downloads").join(name).exists());
    }

    // once space is back the same archives are extracted
    let report = h.extractor(h.config()).extract_all(PERIOD, &cancel).await.unwrap();
    assert_eq!(report.processed, 2);
}

#[tokio::test]
async fn test_archive_left_in_processing_is_extracted_and_loaded_again() {
    let h = Harness::new();
    h.place_archive("Empresas0.zip", &[("K3241.K03200Y0.D40810.EMPRECSV", &companies_csv(3))]);
    let cancel = CancellationToken::new();
    let extractor = h.extractor(h.config());

    extractor.extract_all(PERIOD, &cancel).await.unwrap();

    // the worker died while loading this file
    let mut record = h.store.get_by_name_and_period("Empresas0.zip", PERIOD).await.unwrap().unwrap();
    record.begin_processing();
    h.store.update(&record).await.unwrap();

    let report = extractor.extract_all(PERIOD, &cancel).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped, 0);

    let sink = Arc::new(MemoryRecordSink::new());
    let load = h.loader(sink.clone()).load_pending(&cancel).await.unwrap();
    assert_eq!(load.files_pending, 1);
    assert_eq!(load.files_loaded, 1);
    assert_eq!(sink.count(RecordShape::Companies).await.unwrap(), 3);

    let stored = h.store.get_by_name_and_period("Empresas0.zip", PERIOD).await.unwrap().unwrap();
    assert_eq!(stored.csv_status, CsvStatus::Processed);
    assert_eq!(stored.record_count, Some(3));

    let again = extractor.extract_all(PERIOD, &cancel).await.unwrap();
    assert_eq!(again.skipped, 1);
}
