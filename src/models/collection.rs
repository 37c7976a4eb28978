//! The paginated collection being crawled.
//!
//! A `Collection` is shared between discovery (which registers one link
//! channel per existing page and finally marks the collection complete) and
//! the drain (which reads those channels). It only lives for one run: once a
//! page channel is drained it is gone.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock, mpsc, watch};

use crate::models::CrawlerConfig;

/// Pages scanned when no limit is given.
pub const DEFAULT_MAX_PAGES: usize = 1000;

/// Receiving half of one page's link channel.
pub type PageReceiver = Arc<Mutex<mpsc::Receiver<String>>>;

/// A reading-room collection and its per-page link channels.
#[derive(Debug)]
pub struct Collection {
    pub name: String,
    endpoint_base: String,
    start_offset: usize,
    max_documents: usize,
    per_page_capacity: usize,
    page_channel_capacity: usize,
    pages: RwLock<HashMap<usize, PageReceiver>>,
    done: AtomicBool,
    changes: watch::Sender<u64>,
}

impl Collection {
    /// Create a collection with the default page limit, starting at page 1.
    pub fn new(name: impl Into<String>, config: &CrawlerConfig) -> Self {
        let per_page_capacity = config.per_page_capacity.max(1);
        let (changes, _) = watch::channel(0);
        Self {
            name: name.into(),
            endpoint_base: with_trailing_slash(&config.endpoint_base),
            start_offset: 0,
            max_documents: DEFAULT_MAX_PAGES * per_page_capacity,
            per_page_capacity,
            page_channel_capacity: config.page_channel_capacity.max(1),
            pages: RwLock::new(HashMap::new()),
            done: AtomicBool::new(false),
            changes,
        }
    }

    /// Limit the crawl to `max_pages` pages (at least one).
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_documents = max_pages.max(1) * self.per_page_capacity;
        self
    }

    /// Start at a one-based page number.
    pub fn with_start_page(mut self, start_page: usize) -> Self {
        self.start_offset = start_page.max(1) - 1;
        self
    }

    pub fn start_offset(&self) -> usize {
        self.start_offset
    }

    pub fn max_documents(&self) -> usize {
        self.max_documents
    }

    pub fn per_page_capacity(&self) -> usize {
        self.per_page_capacity
    }

    /// Most pages discovery may register under the document budget.
    pub fn page_limit(&self) -> usize {
        self.max_documents.div_ceil(self.per_page_capacity)
    }

    /// URL of the collection landing page.
    pub fn endpoint_url(&self) -> String {
        format!("{}readingroom/collection/{}", self.endpoint_base, self.name)
    }

    /// URL of a zero-based page index.
    pub fn page_url(&self, index: usize) -> String {
        if index == 0 {
            self.endpoint_url()
        } else {
            format!("{}?page={}", self.endpoint_url(), index)
        }
    }

    /// Prefix of every document link found on listing pages.
    pub fn document_base(&self) -> String {
        format!("{}readingroom/document/", self.endpoint_base)
    }

    /// Register a new page channel and return its sender with the number
    /// of pages registered so far.
    pub async fn register_page(&self, index: usize) -> (mpsc::Sender<String>, usize) {
        let (tx, rx) = mpsc::channel(self.page_channel_capacity);
        let count = {
            let mut pages = self.pages.write().await;
            pages.insert(index, Arc::new(Mutex::new(rx)));
            pages.len()
        };
        self.changes.send_modify(|v| *v += 1);
        (tx, count)
    }

    /// The channel registered for a page, if any.
    pub async fn page(&self, index: usize) -> Option<PageReceiver> {
        self.pages.read().await.get(&index).cloned()
    }

    pub async fn page_count(&self) -> usize {
        self.pages.read().await.len()
    }

    /// Mark that no more pages will appear. Returns `true` only for the
    /// call that actually set the flag.
    pub fn mark_complete(&self) -> bool {
        let first = !self.done.swap(true, Ordering::SeqCst);
        if first {
            self.changes.send_modify(|v| *v += 1);
        }
        first
    }

    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Notifier bumped on every page registration and on completion.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

fn with_trailing_slash(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection() -> Collection {
        let config = CrawlerConfig {
            endpoint_base: "https://example.com".into(),
            ..CrawlerConfig::default()
        };
        Collection::new("stargate", &config)
    }

    #[test]
    fn test_urls() {
        let c = collection();
        assert_eq!(
            c.endpoint_url(),
            "https://example.com/readingroom/collection/stargate"
        );
        assert_eq!(c.page_url(0), c.endpoint_url());
        assert_eq!(
            c.page_url(3),
            "https://example.com/readingroom/collection/stargate?page=3"
        );
        assert_eq!(
            c.document_base(),
            "https://example.com/readingroom/document/"
        );
    }

    #[test]
    fn test_budget_and_offset() {
        let c = collection().with_max_pages(3).with_start_page(5);
        assert_eq!(c.max_documents(), 60);
        assert_eq!(c.page_limit(), 3);
        assert_eq!(c.start_offset(), 4);

        let c = collection().with_max_pages(0).with_start_page(0);
        assert_eq!(c.max_documents(), 20);
        assert_eq!(c.start_offset(), 0);
    }

    #[test]
    fn test_mark_complete_once() {
        let c = collection();
        assert!(!c.is_complete());
        assert!(c.mark_complete());
        assert!(!c.mark_complete());
        assert!(c.is_complete());
    }

    #[tokio::test]
    async fn test_register_page_notifies_subscribers() {
        let c = collection();
        let changes = c.subscribe();

        let (tx, count) = c.register_page(0).await;
        assert_eq!(count, 1);
        assert!(changes.has_changed().unwrap());

        tx.send("https://example.com/a".into()).await.unwrap();
        drop(tx);

        let page = c.page(0).await.unwrap();
        let mut rx = page.lock().await;
        assert_eq!(rx.recv().await.as_deref(), Some("https://example.com/a"));
        assert_eq!(rx.recv().await, None);
        assert!(c.page(1).await.is_none());
    }
}
