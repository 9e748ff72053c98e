//! Shared fixtures for the ingestion integration tests
//!
//! Everything runs against the in-memory store and sink; remote listings and
//! archives are served by a wiremock server.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use cnpj_ingest::download::DiskSpaceProbe;
use std::io::{self, Cursor, Write};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

pub const PERIOD: &str = "2024-08";
pub const GB: u64 = 1024 * 1024 * 1024;

/// Disk probe reporting a fixed amount of free space
pub struct FixedSpace(pub u64);

impl DiskSpaceProbe for FixedSpace {
    fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

pub fn plenty_of_space() -> FixedSpace {
    FixedSpace(500 * GB)
}

/// One well-formed companies row with the given basic CNPJ
pub fn company_line(cnpj_basico: &str) -> String {
    format!(
        "\"{}\";\"EMPRESA {} LTDA\";\"2062\";\"49\";\"1000,00\";\"01\";\"\"",
        cnpj_basico, cnpj_basico
    )
}

pub fn companies_csv(rows: usize) -> String {
    (0..rows)
        .map(|i| company_line(&format!("{:08}", i + 1)))
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

/// Build a zip archive in memory from `(entry name, content)` pairs
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    for (name, body) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

pub fn root_listing(periods: &[&str]) -> String {
    let anchors: String = periods
        .iter()
        .map(|p| format!("<a href=\"{}/\">{}/</a>\n", p, p))
        .collect();
    format!("<html><body><pre>\n<a href=\"../\">Parent Directory</a>\n{}</pre></body></html>", anchors)
}

pub fn period_listing(archives: &[&str]) -> String {
    let anchors: String = archives
        .iter()
        .map(|a| format!("<a href=\"{}\">{}</a>\n", a, a))
        .collect();
    format!("<html><body><pre>\n{}</pre></body></html>", anchors)
}

/// Serve the root listing with one period and that period's archive listing
pub async fn mount_listings(server: &MockServer, archives: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(root_listing(&["2024-07", PERIOD])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/{}/", PERIOD)))
        .respond_with(ResponseTemplate::new(200).set_body_string(period_listing(archives)))
        .mount(server)
        .await;
}

pub fn archive_path(name: &str) -> String {
    format!("/{}/{}", PERIOD, name)
}
