//! Page discovery.
//!
//! Probes page indices in order with HEAD requests. Every page that exists
//! gets a link channel registered on the [`Collection`] and a background
//! [`PageFetcher`] task; the first 404 ends the collection.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::error::{AppError, Result};
use crate::models::{Collection, CrawlerConfig};
use crate::services::fetcher::PageFetcher;
use crate::utils::http::PageSource;

/// Pause after scheduling a page, growing with the distance from the start
/// page. The slope drops to the tail rate past the threshold.
pub fn probe_delay(distance: usize, config: &CrawlerConfig) -> Duration {
    let threshold = config.probe_delay_threshold;
    let ms = if distance <= threshold {
        distance as u64 * config.probe_delay_ms
    } else {
        threshold as u64 * config.probe_delay_ms
            + (distance - threshold) as u64 * config.probe_tail_delay_ms
    };
    Duration::from_millis(ms)
}

pub struct PageDiscovery {
    collection: Arc<Collection>,
    source: Arc<dyn PageSource>,
    fetcher: Arc<PageFetcher>,
    config: CrawlerConfig,
}

impl PageDiscovery {
    pub fn new(
        collection: Arc<Collection>,
        source: Arc<dyn PageSource>,
        config: &CrawlerConfig,
    ) -> Result<Self> {
        let fetcher = PageFetcher::new(Arc::clone(&source), collection.document_base())?;
        Ok(Self {
            collection,
            source,
            fetcher: Arc::new(fetcher),
            config: config.clone(),
        })
    }

    /// Discover every page, wait for their fetches, and mark the collection
    /// complete. Returns the number of pages registered.
    ///
    /// The collection is marked complete on every exit path, so a drain
    /// waiting on it always terminates.
    pub async fn run(&self) -> Result<usize> {
        let mut fetches = JoinSet::new();
        let result = self.discover(&mut fetches).await;

        if result.is_ok() {
            while let Some(joined) = fetches.join_next().await {
                if let Err(e) = joined {
                    log::error!("[discovery] page task panicked: {}", e);
                }
            }
        } else {
            // Pages already scheduled keep fetching; nothing waits on them.
            fetches.detach_all();
        }

        self.collection.mark_complete();
        match &result {
            Ok(pages) => log::info!(
                "[discovery] '{}' complete: {} pages",
                self.collection.name,
                pages
            ),
            Err(e) => log::error!("[discovery] '{}' stopped: {}", self.collection.name, e),
        }
        result
    }

    async fn discover(&self, fetches: &mut JoinSet<()>) -> Result<usize> {
        let start = self.collection.start_offset();
        let budget = self.collection.max_documents();
        let per_page = self.collection.per_page_capacity();

        let mut index = start;
        loop {
            let url = self.collection.page_url(index);
            let status = self.source.probe(&url).await?;

            match status {
                200 => {
                    log::debug!("[discovery] found page {}", index);
                    let (tx, count) = self.collection.register_page(index).await;

                    let fetcher = Arc::clone(&self.fetcher);
                    fetches.spawn(async move {
                        if let Err(e) = fetcher.fetch(index, &url, tx).await {
                            log::warn!("[discovery] page {} dropped: {}", index, e);
                        }
                    });

                    if count * per_page >= budget {
                        log::info!("[discovery] document budget reached at page {}", index);
                        return Ok(count);
                    }

                    tokio::time::sleep(probe_delay(index - start + 1, &self.config)).await;
                    index += 1;
                }
                404 if index == start => return Err(AppError::NoPages),
                404 => return Ok(self.collection.page_count().await),
                other => return Err(AppError::BadStatusCode(other)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSource, listing_html};

    fn config() -> CrawlerConfig {
        CrawlerConfig {
            endpoint_base: "https://example.com/".into(),
            probe_delay_ms: 0,
            probe_tail_delay_ms: 0,
            ..CrawlerConfig::default()
        }
    }

    fn discovery(source: MockSource, collection: Arc<Collection>) -> (PageDiscovery, Arc<MockSource>) {
        let source = Arc::new(source);
        let d = PageDiscovery::new(collection, source.clone(), &config()).unwrap();
        (d, source)
    }

    #[test]
    fn test_probe_delay_tiers() {
        let cfg = CrawlerConfig::default();
        assert_eq!(probe_delay(0, &cfg), Duration::ZERO);
        assert_eq!(probe_delay(1, &cfg), Duration::from_millis(35));
        assert_eq!(probe_delay(200, &cfg), Duration::from_millis(7000));
        assert_eq!(probe_delay(201, &cfg), Duration::from_millis(7005));

        let mut last = Duration::ZERO;
        for d in 0..1000 {
            let delay = probe_delay(d, &cfg);
            assert!(delay >= last);
            last = delay;
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_missing_page() {
        let collection = Arc::new(Collection::new("stargate", &config()));
        let source = MockSource::new()
            .with_page(&collection.page_url(0), 200, listing_html(&["a"]))
            .with_page(&collection.page_url(1), 200, listing_html(&["b"]));
        let (d, _) = discovery(source, Arc::clone(&collection));

        assert_eq!(d.run().await.unwrap(), 2);
        assert!(collection.is_complete());
        assert_eq!(collection.page_count().await, 2);
    }

    #[tokio::test]
    async fn test_first_page_missing_is_no_pages() {
        let collection = Arc::new(Collection::new("stargate", &config()));
        let (d, _) = discovery(MockSource::new(), Arc::clone(&collection));

        assert!(matches!(d.run().await, Err(AppError::NoPages)));
        assert!(collection.is_complete());
    }

    #[tokio::test]
    async fn test_bad_status_is_fatal() {
        let collection = Arc::new(Collection::new("stargate", &config()));
        let source = MockSource::new()
            .with_page(&collection.page_url(0), 200, listing_html(&["a"]))
            .with_page(&collection.page_url(1), 503, "");
        let (d, _) = discovery(source, Arc::clone(&collection));

        assert!(matches!(d.run().await, Err(AppError::BadStatusCode(503))));
        assert!(collection.is_complete());
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let collection = Arc::new(Collection::new("stargate", &config()));
        let source = MockSource::new()
            .with_page(&collection.page_url(0), 200, listing_html(&["a"]))
            .with_error(&collection.page_url(1));
        let (d, source) = discovery(source, Arc::clone(&collection));

        assert!(matches!(d.run().await, Err(AppError::Io(_))));
        assert!(collection.is_complete());
        assert_eq!(collection.page_count().await, 1);
        assert_eq!(source.probes().len(), 2);
    }

    #[tokio::test]
    async fn test_budget_bounds_registered_pages() {
        let collection = Arc::new(Collection::new("stargate", &config()).with_max_pages(2));
        let source = MockSource::new().with_fallback(200, listing_html(&["a"]));
        let (d, source) = discovery(source, Arc::clone(&collection));

        assert_eq!(d.run().await.unwrap(), 2);
        assert_eq!(collection.page_count().await, collection.page_limit());
        assert_eq!(source.probes().len(), 2);
        assert!(collection.is_complete());
    }

    #[tokio::test]
    async fn test_starts_at_offset() {
        let collection = Arc::new(Collection::new("stargate", &config()).with_start_page(3));
        let source =
            MockSource::new().with_page(&collection.page_url(2), 200, listing_html(&["a"]));
        let (d, source) = discovery(source, Arc::clone(&collection));

        assert_eq!(d.run().await.unwrap(), 1);
        assert_eq!(
            source.probes(),
            vec![collection.page_url(2), collection.page_url(3)]
        );
        assert!(collection.page(2).await.is_some());
    }
}
