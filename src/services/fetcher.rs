//! Single-page fetch and link extraction.

use std::sync::Arc;

use regex::Regex;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::utils::http::PageSource;

/// Matches document references on a collection listing page.
pub const DOCUMENT_LINK_PATTERN: &str =
    r#"field-content"><a href="/readingroom/document/([^"]*)">"#;

/// Fetches one listing page and pushes its document links onto the page's
/// channel.
pub struct PageFetcher {
    source: Arc<dyn PageSource>,
    document_base: String,
    pattern: Regex,
}

impl PageFetcher {
    pub fn new(source: Arc<dyn PageSource>, document_base: impl Into<String>) -> Result<Self> {
        Ok(Self {
            source,
            document_base: document_base.into(),
            pattern: Regex::new(DOCUMENT_LINK_PATTERN)?,
        })
    }

    /// Fetch `url` and forward every matched link, in page order.
    ///
    /// The sender is consumed, so the page channel closes when this returns,
    /// whether or not the fetch succeeded.
    pub async fn fetch(&self, index: usize, url: &str, tx: mpsc::Sender<String>) -> Result<usize> {
        log::debug!("[fetch] getting page {}", index);
        let (status, body) = self.source.fetch_text(url).await?;
        let links = self.parse_links(status, &body, url)?;

        let mut sent = 0;
        for link in links {
            if tx.send(link).await.is_err() {
                log::debug!("[fetch] page {} reader went away", index);
                break;
            }
            sent += 1;
        }
        log::info!("[fetch] page {}: {} links", index, sent);
        Ok(sent)
    }

    /// Classify a listing response and extract its document links.
    pub fn parse_links(&self, status: u16, body: &str, url: &str) -> Result<Vec<String>> {
        match status {
            200 => {}
            404 => return Err(AppError::PageNotFound(url.to_string())),
            other => return Err(AppError::BadStatusCode(other)),
        }
        if body.is_empty() {
            return Err(AppError::EmptyBody(url.to_string()));
        }

        let links: Vec<String> = self
            .pattern
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|slug| format!("{}{}", self.document_base, slug.as_str()))
            .collect();

        if links.is_empty() {
            return Err(AppError::NoDocuments(url.to_string()));
        }
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSource, listing_html};

    const BASE: &str = "https://example.com/readingroom/document/";
    const PAGE: &str = "https://example.com/readingroom/collection/stargate";

    fn fetcher(source: MockSource) -> PageFetcher {
        PageFetcher::new(Arc::new(source), BASE).unwrap()
    }

    #[test]
    fn test_parse_links_in_page_order() {
        let f = fetcher(MockSource::new());
        let links = f
            .parse_links(200, &listing_html(&["cia-rdp96-1", "cia-rdp96-2"]), PAGE)
            .unwrap();
        assert_eq!(
            links,
            vec![
                "https://example.com/readingroom/document/cia-rdp96-1",
                "https://example.com/readingroom/document/cia-rdp96-2",
            ]
        );
    }

    #[test]
    fn test_parse_links_error_kinds() {
        let f = fetcher(MockSource::new());
        assert!(matches!(
            f.parse_links(404, "", PAGE),
            Err(AppError::PageNotFound(_))
        ));
        assert!(matches!(
            f.parse_links(503, "busy", PAGE),
            Err(AppError::BadStatusCode(503))
        ));
        assert!(matches!(
            f.parse_links(200, "", PAGE),
            Err(AppError::EmptyBody(_))
        ));
        assert!(matches!(
            f.parse_links(200, "<html>nothing here</html>", PAGE),
            Err(AppError::NoDocuments(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_sends_links_and_closes_channel() {
        let source = MockSource::new().with_page(PAGE, 200, listing_html(&["a", "b"]));
        let f = fetcher(source);
        let (tx, mut rx) = mpsc::channel(25);

        assert_eq!(f.fetch(0, PAGE, tx).await.unwrap(), 2);
        assert_eq!(rx.recv().await.unwrap(), format!("{BASE}a"));
        assert_eq!(rx.recv().await.unwrap(), format!("{BASE}b"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_failed_fetch_still_closes_channel() {
        let f = fetcher(MockSource::new());
        let (tx, mut rx) = mpsc::channel(25);

        assert!(f.fetch(0, PAGE, tx).await.is_err());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_transport_error_still_closes_channel() {
        let f = fetcher(MockSource::new().with_error(PAGE));
        let (tx, mut rx) = mpsc::channel(25);

        assert!(matches!(f.fetch(0, PAGE, tx).await, Err(AppError::Io(_))));
        assert_eq!(rx.recv().await, None);
    }
}
