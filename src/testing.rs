//! In-memory doubles for the site and the ingestion API.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Document, DocumentsResponse, RawText, UploadResponse};
use crate::services::ingest_api::IngestApi;
use crate::services::pdf::KeywordExtractor;
use crate::utils::http::PageSource;

/// A site backed by a map of URL to (status, body).
#[derive(Debug, Default)]
pub struct MockSource {
    pages: HashMap<String, (u16, Vec<u8>)>,
    fallback: Option<(u16, Vec<u8>)>,
    broken: HashSet<String>,
    probes: Mutex<Vec<String>>,
    fetches: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.pages.insert(url.to_string(), (status, body.into()));
        self
    }

    /// Response for every URL without an explicit page. Unknown URLs are 404
    /// otherwise.
    pub fn with_fallback(mut self, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.fallback = Some((status, body.into()));
        self
    }

    /// Fail every request to `url` with a connection error.
    pub fn with_error(mut self, url: &str) -> Self {
        self.broken.insert(url.to_string());
        self
    }

    pub fn probes(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    fn lookup(&self, url: &str) -> Result<(u16, Vec<u8>)> {
        if self.broken.contains(url) {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                format!("connection reset by {url}"),
            )));
        }
        Ok(self
            .pages
            .get(url)
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or((404, Vec::new())))
    }
}

#[async_trait]
impl PageSource for MockSource {
    async fn probe(&self, url: &str) -> Result<u16> {
        self.probes.lock().unwrap().push(url.to_string());
        Ok(self.lookup(url)?.0)
    }

    async fn fetch_text(&self, url: &str) -> Result<(u16, String)> {
        self.fetches.lock().unwrap().push(url.to_string());
        let (status, body) = self.lookup(url)?;
        Ok((status, String::from_utf8_lossy(&body).into_owned()))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<(u16, Vec<u8>)> {
        self.fetches.lock().unwrap().push(url.to_string());
        self.lookup(url)
    }
}

/// Listing-page HTML containing the given document slugs.
pub fn listing_html(slugs: &[&str]) -> String {
    slugs
        .iter()
        .map(|slug| {
            format!(
                r#"<span class="field-content"><a href="/readingroom/document/{slug}">{slug}</a></span>"#
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A committed document for `link`.
pub fn document(link: &str, content: &str) -> Document {
    let slug = link.rsplit('/').next().unwrap_or(link);
    Document {
        id: format!("id-{slug}"),
        url: format!("link://{link}"),
        title: slug.to_string(),
        chunk_source: format!("link://{link}"),
        page_content: content.to_string(),
        location: format!("custom-documents/{slug}.json"),
        ..Document::default()
    }
}

pub fn success(doc: Document) -> UploadResponse {
    UploadResponse {
        success: true,
        error: None,
        documents: vec![doc],
    }
}

pub fn failure(message: &str) -> UploadResponse {
    UploadResponse {
        success: false,
        error: Some(serde_json::Value::String(message.to_string())),
        documents: Vec::new(),
    }
}

/// One recorded ingestion API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Auth,
    Link(String),
    Bytes(String, usize),
    RawText { url: String, text: String },
    Remove(String),
    Embed(Vec<String>),
    List,
}

/// Scripted ingestion API that records every call.
///
/// Link uploads pop from a per-link script; once a script is exhausted (or
/// absent) the upload succeeds with [`document`].
#[derive(Debug, Default)]
pub struct MockIngestApi {
    link_scripts: Mutex<HashMap<String, VecDeque<UploadResponse>>>,
    bytes_result: Mutex<Option<UploadResponse>>,
    raw_text_result: Mutex<Option<UploadResponse>>,
    listing: DocumentsResponse,
    fail_remove: bool,
    fail_embed: bool,
    authenticated: bool,
    calls: Mutex<Vec<ApiCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockIngestApi {
    pub fn new() -> Self {
        Self {
            authenticated: true,
            ..Self::default()
        }
    }

    pub fn script_link(self, link: &str, responses: Vec<UploadResponse>) -> Self {
        self.link_scripts
            .lock()
            .unwrap()
            .insert(link.to_string(), responses.into());
        self
    }

    pub fn with_bytes_result(self, response: UploadResponse) -> Self {
        *self.bytes_result.lock().unwrap() = Some(response);
        self
    }

    pub fn with_raw_text_result(self, response: UploadResponse) -> Self {
        *self.raw_text_result.lock().unwrap() = Some(response);
        self
    }

    pub fn with_listing(mut self, listing: DocumentsResponse) -> Self {
        self.listing = listing;
        self
    }

    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub fn failing_embed(mut self) -> Self {
        self.fail_embed = true;
        self
    }

    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// Most link uploads observed in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl IngestApi for MockIngestApi {
    async fn check_auth(&self) -> Result<()> {
        self.record(ApiCall::Auth);
        if self.authenticated {
            Ok(())
        } else {
            Err(AppError::Auth("invalid api key".into()))
        }
    }

    async fn upload_link(&self, link: &str) -> Result<UploadResponse> {
        self.record(ApiCall::Link(link.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .link_scripts
            .lock()
            .unwrap()
            .get_mut(link)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or_else(|| success(document(link, "ok"))))
    }

    async fn upload_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<UploadResponse> {
        self.record(ApiCall::Bytes(name.to_string(), bytes.len()));
        Ok(self
            .bytes_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| failure("unsupported file")))
    }

    async fn upload_raw_text(&self, text: RawText) -> Result<UploadResponse> {
        let url = text.metadata.url.clone();
        self.record(ApiCall::RawText {
            url: url.clone(),
            text: text.text_content,
        });
        Ok(self
            .raw_text_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| success(document(&url, "keywords"))))
    }

    async fn remove_document(&self, location: &str) -> Result<()> {
        self.record(ApiCall::Remove(location.to_string()));
        if self.fail_remove {
            Err(AppError::BadStatusCode(500))
        } else {
            Ok(())
        }
    }

    async fn update_embeddings(&self, adds: Vec<String>) -> Result<()> {
        self.record(ApiCall::Embed(adds));
        if self.fail_embed {
            Err(AppError::BadStatusCode(500))
        } else {
            Ok(())
        }
    }

    async fn list_documents(&self) -> Result<DocumentsResponse> {
        self.record(ApiCall::List);
        Ok(self.listing.clone())
    }
}

/// Extractor returning a fixed keyword list.
#[derive(Debug, Default)]
pub struct MockExtractor {
    pub keywords: Vec<String>,
}

#[async_trait]
impl KeywordExtractor for MockExtractor {
    async fn extract(&self, _bytes: Vec<u8>) -> Result<Vec<String>> {
        Ok(self.keywords.clone())
    }
}
