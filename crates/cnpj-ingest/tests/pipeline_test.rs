//! End-to-end runs of the orchestrator against a mocked Receita Federal site

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{archive_path, companies_csv, mount_listings, plenty_of_space, zip_bytes, FixedSpace, GB, PERIOD};
use cnpj_ingest::config::IngestConfig;
use cnpj_ingest::download::DiskSpaceProbe;
use cnpj_ingest::loader::{MemoryRecordSink, RecordShape, RecordSink};
use cnpj_ingest::orchestrator::PipelineOrchestrator;
use cnpj_ingest::state::{CsvStatus, DownloadStatus, FileStateStore, InMemoryFileStateStore};
use cnpj_ingest::IngestError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARCHIVES: &[&str] = &["Empresas0.zip", "Cnaes.zip"];

struct Harness {
    server: MockServer,
    dir: TempDir,
    store: Arc<InMemoryFileStateStore>,
    sink: Arc<MemoryRecordSink>,
}

impl Harness {
    async fn new() -> Self {
        Self {
            server: MockServer::start().await,
            dir: TempDir::new().unwrap(),
            store: Arc::new(InMemoryFileStateStore::new()),
            sink: Arc::new(MemoryRecordSink::new()),
        }
    }

    fn config(&self) -> IngestConfig {
        let vars: HashMap<&str, String> = HashMap::from([
            ("RF_BASE_URL", format!("{}/", self.server.uri())),
            ("RF_WORK_DIR", self.dir.path().display().to_string()),
            ("RF_PROGRESS_REPORT_SECS", "1".to_string()),
        ]);
        IngestConfig::from_lookup(move |key| vars.get(key).cloned()).unwrap()
    }

    fn orchestrator_with(&self, disk: impl DiskSpaceProbe + 'static) -> PipelineOrchestrator {
        PipelineOrchestrator::from_config(
            &self.config(),
            self.store.clone(),
            self.sink.clone(),
            Arc::new(disk),
        )
        .unwrap()
    }

    fn orchestrator(&self) -> PipelineOrchestrator {
        self.orchestrator_with(plenty_of_space())
    }

    /// Listings plus one archive mock per file, each expected `archive_hits` times
    async fn mount_site(&self, archive_hits: u64) {
        mount_listings(&self.server, ARCHIVES).await;

        let archives = [
            ("Empresas0.zip", zip_bytes(&[("K3241.K03200Y0.D40810.EMPRECSV", &companies_csv(3))])),
            (
                "Cnaes.zip",
                zip_bytes(&[(
                    "F.K03200$Z.D40810.CNAECSV",
                    "\"0111301\";\"Cultivo de arroz\"\n\"0111302\";\"Cultivo de milho\"\n",
                )]),
            ),
        ];
        for (name, body) in archives {
            Mock::given(method("GET"))
                .and(path(archive_path(name)))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
                .expect(archive_hits)
                .mount(&self.server)
                .await;
        }
    }
}

#[tokio::test]
async fn test_full_run_then_idempotent_rerun() {
    let h = Harness::new().await;
    h.mount_site(1).await;

    let orchestrator = h.orchestrator();
    let shutdown = CancellationToken::new();

    let first = orchestrator.run_once(&shutdown).await.unwrap();
    assert_eq!(first.period.as_deref(), Some(PERIOD));
    assert_eq!(first.archives_listed, 2);
    assert_eq!(first.downloads.downloaded, 2);
    assert_eq!(first.extraction.processed, 2);
    assert_eq!(first.load.files_loaded, 2);
    assert_eq!(first.records_loaded(), 5);
    assert!(!first.cancelled);

    assert_eq!(h.sink.count(RecordShape::Companies).await.unwrap(), 3);
    assert_eq!(h.sink.count(RecordShape::Cnaes).await.unwrap(), 2);

    for record in h.store.list_by_period(PERIOD).await.unwrap() {
        assert_eq!(record.download_status, DownloadStatus::Finished);
        assert_eq!(record.csv_status, CsvStatus::Processed);
        assert!(record.is_complete());
    }

    // every archive is complete: no downloads, no extraction, no writes
    let batches_before = h.sink.batches().unwrap().len();
    let second = orchestrator.run_once(&shutdown).await.unwrap();
    assert_eq!(second.downloads.downloaded, 0);
    assert_eq!(second.downloads.skipped, 2);
    assert_eq!(second.extraction.processed, 0);
    assert_eq!(second.load.files_pending, 0);
    assert_eq!(second.records_loaded(), 0);
    assert_eq!(h.sink.batches().unwrap().len(), batches_before);
}

#[tokio::test]
async fn test_low_disk_space_aborts_before_discovery() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let err = h
        .orchestrator_with(FixedSpace(GB))
        .run_once(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::DiskSpace { .. }));
    assert!(h.store.all().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_period_is_a_discovery_error() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&h.server)
        .await;

    let err = h.orchestrator().run_once(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, IngestError::Discovery(_)));
}

#[tokio::test]
async fn test_shutdown_before_downloads_cancels_the_run() {
    let h = Harness::new().await;
    h.mount_site(0).await;

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let summary = h.orchestrator().run_once(&shutdown).await.unwrap();
    assert!(summary.cancelled);
    assert!(!summary.deadline_exceeded);
    assert_eq!(summary.downloads.downloaded, 0);
    assert_eq!(summary.records_loaded(), 0);
}

#[tokio::test]
async fn test_run_deadline_cancels_a_stalled_download() {
    let h = Harness::new().await;
    mount_listings(&h.server, &["Empresas0.zip"]).await;

    // headers never arrive before the deadline
    Mock::given(method("GET"))
        .and(path(archive_path("Empresas0.zip")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(zip_bytes(&[("K3241.EMPRECSV", &companies_csv(1))]))
                .set_delay(Duration::from_secs(60)),
        )
        .mount(&h.server)
        .await;

    let shutdown = CancellationToken::new();
    let summary = tokio::time::timeout(
        Duration::from_secs(20),
        h.orchestrator()
            .with_run_deadline(Duration::from_millis(500))
            .run_once(&shutdown),
    )
    .await
    .expect("deadline did not stop the run")
    .unwrap();

    assert!(summary.cancelled);
    assert!(summary.deadline_exceeded);
    assert!(!shutdown.is_cancelled());
    assert_eq!(summary.downloads.downloaded, 0);
    assert_eq!(summary.records_loaded(), 0);

    let record = h
        .store
        .get_by_name_and_period("Empresas0.zip", PERIOD)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.download_status, DownloadStatus::Error);
    assert_eq!(record.last_error.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn test_scheduler_runs_immediately_and_stops_on_shutdown() {
    let h = Harness::new().await;
    h.mount_site(1).await;

    let orchestrator = Arc::new(h.orchestrator());
    let shutdown = CancellationToken::new();
    let handle = orchestrator.start(shutdown.clone());

    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let records = h.store.list_by_period(PERIOD).await.unwrap();
            if records.len() == 2 && records.iter().all(|r| r.is_complete()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
    assert_eq!(h.sink.count(RecordShape::Companies).await.unwrap(), 3);
}
