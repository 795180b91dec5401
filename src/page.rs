//! Snapshots of the hosting page.
//!
//! The material-detail page renders its viewer frame from script, so the
//! frame only shows up in a dump of the live DOM. A [`PageSource`] is either
//! such a dump on disk (refreshed by whatever drives the browser) or a URL
//! fetched as-is.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use url::Url;

use crate::error::{Error, Result};

/// Pages the extractor is meant for
static SUPPORTED_PAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://basic\.smartedu\.cn/(?:.*/)?tchMaterial/detail").expect("valid regex")
});

pub fn is_supported_page(url: &Url) -> bool {
    SUPPORTED_PAGE.is_match(url.as_str())
}

pub fn ensure_supported(url: &Url) -> Result<()> {
    if is_supported_page(url) {
        Ok(())
    } else {
        Err(Error::UnsupportedPage(url.to_string()))
    }
}

/// The page's markup at one point in time, with the address it was loaded from.
#[derive(Debug, Clone)]
pub struct Page {
    pub html: String,
    pub url: Url,
}

impl Page {
    pub fn new(html: impl Into<String>, url: Url) -> Self {
        Self {
            html: html.into(),
            url,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PageSource {
    /// An HTML dump of the live DOM
    Snapshot(PathBuf),
    /// A page fetched over HTTP
    Remote(Url),
}

impl PageSource {
    /// Interpret a command-line argument as a URL when it parses as http(s),
    /// otherwise as a path.
    pub fn from_arg(arg: &str) -> Self {
        match Url::parse(arg) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Remote(url),
            _ => Self::Snapshot(PathBuf::from(arg)),
        }
    }

    /// Load the current page. `page_url` is the address snapshots are
    /// attributed to; remote pages use their own.
    #[tracing::instrument(level = "debug", skip(self, client))]
    pub async fn load(&self, client: &Client, page_url: &Url) -> Result<Page> {
        match self {
            PageSource::Snapshot(path) => {
                let html = tokio::fs::read_to_string(path).await?;
                tracing::trace!(path = ?path, bytes = html.len(), "Read page snapshot");
                Ok(Page::new(html, page_url.clone()))
            }
            PageSource::Remote(url) => {
                let response = client.get(url.clone()).send().await?;
                if !response.status().is_success() {
                    return Err(Error::HttpStatus {
                        status: response.status().as_u16(),
                        reason: response
                            .status()
                            .canonical_reason()
                            .unwrap_or_default()
                            .to_string(),
                    });
                }
                let final_url = response.url().clone();
                let html = response.text().await?;
                Ok(Page::new(html, final_url))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_detail_pages() {
        let ok = [
            "https://basic.smartedu.cn/tchMaterial/detail?contentType=assets_document&contentId=1",
            "https://basic.smartedu.cn/syncClassroom/tchMaterial/detail",
        ];
        for url in ok {
            assert!(is_supported_page(&Url::parse(url).unwrap()), "{url}");
        }

        let rejected = [
            "https://basic.smartedu.cn/",
            "https://example.com/tchMaterial/detail",
            "http://basic.smartedu.cn/tchMaterial/detail",
        ];
        for url in rejected {
            assert!(!is_supported_page(&Url::parse(url).unwrap()), "{url}");
        }
    }

    #[test]
    fn ensure_supported_reports_url() {
        let url = Url::parse("https://example.com/").unwrap();
        let err = ensure_supported(&url).unwrap_err();
        assert!(matches!(err, Error::UnsupportedPage(ref u) if u == "https://example.com/"));
    }

    #[test]
    fn from_arg_distinguishes_urls_and_paths() {
        assert!(matches!(
            PageSource::from_arg("https://basic.smartedu.cn/tchMaterial/detail"),
            PageSource::Remote(_)
        ));
        assert!(matches!(
            PageSource::from_arg("./dump.html"),
            PageSource::Snapshot(_)
        ));
    }

    #[tokio::test]
    async fn loads_snapshot_with_given_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "<html><body></body></html>").unwrap();

        let page_url = Url::parse("https://basic.smartedu.cn/tchMaterial/detail").unwrap();
        let page = PageSource::Snapshot(path)
            .load(&Client::new(), &page_url)
            .await
            .unwrap();
        assert_eq!(page.url, page_url);
        assert!(page.html.contains("<body>"));
    }
}
