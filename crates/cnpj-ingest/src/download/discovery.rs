//! Remote listing discovery
//!
//! The source is a plain directory index: the root lists `YYYY-MM/` period
//! directories and each period lists its `.zip` archives. Listings are
//! scanned with regular expressions so a change in page markup around the
//! anchors does not break discovery.

use crate::error::{IngestError, Result};
use regex::Regex;
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

const PERIOD_PATTERN: &str = r#"href="(\d{4}-\d{2})/""#;
const ARCHIVE_PATTERN: &str = r#"(?i)href="([^"]+\.zip)""#;

/// Every `YYYY-MM` directory referenced by a listing, newest first
pub fn parse_periods(html: &str) -> Result<Vec<String>> {
    let pattern = Regex::new(PERIOD_PATTERN)?;

    let mut periods: Vec<String> = pattern
        .captures_iter(html)
        .map(|captures| captures[1].to_string())
        .collect();

    periods.sort_unstable_by(|a, b| b.cmp(a));
    periods.dedup();

    Ok(periods)
}

/// Absolute URLs of every `.zip` anchor, in page order, without duplicates
pub fn parse_archive_links(html: &str, page_url: &Url) -> Result<Vec<Url>> {
    let pattern = Regex::new(ARCHIVE_PATTERN)?;

    let mut archives: Vec<Url> = Vec::new();
    for captures in pattern.captures_iter(html) {
        let url = page_url.join(&captures[1])?;
        if !archives.contains(&url) {
            archives.push(url);
        }
    }

    Ok(archives)
}

/// Archive file name from its URL (`.../2024-08/Empresas0.zip` -> `Empresas0.zip`)
pub fn archive_name(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
}

#[derive(Debug, Clone)]
pub struct SourceDiscovery {
    client: Client,
    base_url: Url,
}

impl SourceDiscovery {
    pub fn new(client: Client, base_url: &str) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            client,
            base_url: Url::parse(&base)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn period_url(&self, period: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("{}/", period))?)
    }

    async fn fetch_listing(&self, url: &Url) -> Result<String> {
        debug!("Fetching directory listing from: {}", url);

        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(IngestError::Discovery(format!(
                "Listing {} returned HTTP {}",
                url,
                response.status()
            )));
        }

        Ok(response.text().await?)
    }

    /// All published periods, newest first
    pub async fn list_periods(&self) -> Result<Vec<String>> {
        let html = self.fetch_listing(&self.base_url).await?;
        parse_periods(&html)
    }

    pub async fn discover_latest_period(&self) -> Result<String> {
        let periods = self.list_periods().await?;
        let latest = periods.into_iter().next().ok_or_else(|| {
            IngestError::Discovery(format!("No period directories found at {}", self.base_url))
        })?;

        info!(period = %latest, "Discovered latest period");
        Ok(latest)
    }

    pub async fn list_archives_for_period(&self, period: &str) -> Result<Vec<Url>> {
        let page_url = self.period_url(period)?;
        let html = self.fetch_listing(&page_url).await?;
        let archives = parse_archive_links(&html, &page_url)?;

        if archives.is_empty() {
            return Err(IngestError::Discovery(format!(
                "No archives listed for period {}",
                period
            )));
        }

        info!(period = %period, count = archives.len(), "Discovered {} archives", archives.len());
        Ok(archives)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ROOT_LISTING: &str = r#"
        <html><body><pre>
        <a href="../">Parent Directory</a>
        <a href="2024-06/">2024-06/</a>   2024-06-15 10:00
        <a href="2024-08/">2024-08/</a>   2024-08-12 10:00
        <a href="2024-07/">2024-07/</a>   2024-07-14 10:00
        <a href="2024-08/">2024-08/</a>
        <a href="temp/">temp/</a>
        <a href="2024-8/">bad</a>
        </pre></body></html>
    "#;

    #[test]
    fn test_parse_periods_newest_first() {
        assert_eq!(
            parse_periods(ROOT_LISTING).unwrap(),
            vec!["2024-08", "2024-07", "2024-06"]
        );
        assert!(parse_periods("<html>nothing here</html>").unwrap().is_empty());
    }

    #[test]
    fn test_parse_archive_links_resolves_and_dedups() {
        let page = Url::parse("https://example.org/dados/2024-08/").unwrap();
        let html = r#"
            <a href="Empresas0.zip">Empresas0.zip</a>
            <a href="Empresas0.zip">again</a>
            <a href="https://mirror.example.org/Socios1.ZIP">mirror</a>
            <a href="/dados/2024-08/Cnaes.zip">abs path</a>
            <a href="LEIAME.pdf">pdf</a>
        "#;

        let urls: Vec<String> = parse_archive_links(html, &page)
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(
            urls,
            vec![
                "https://example.org/dados/2024-08/Empresas0.zip",
                "https://mirror.example.org/Socios1.ZIP",
                "https://example.org/dados/2024-08/Cnaes.zip",
            ]
        );
    }

    #[test]
    fn test_archive_name() {
        let url = Url::parse("https://example.org/dados/2024-08/Estabelecimentos3.zip").unwrap();
        assert_eq!(archive_name(&url).as_deref(), Some("Estabelecimentos3.zip"));
        assert_eq!(archive_name(&Url::parse("https://example.org/").unwrap()), None);
    }

    #[test]
    fn test_period_url_adds_trailing_slash() {
        let discovery = SourceDiscovery::new(Client::new(), "https://example.org/dados").unwrap();
        assert_eq!(
            discovery.period_url("2024-08").unwrap().as_str(),
            "https://example.org/dados/2024-08/"
        );
    }
}
