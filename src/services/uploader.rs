//! Link uploads guarded by the seen set.

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{Document, RawText, SeenStore, UploadResponse};
use crate::services::ingest_api::IngestApi;

const ACCESS_DENIED_PREFIX: &str = "Access Denied";
const MAINTENANCE_MARKER: &str =
    "the link you are trying to access is undergoing scheduled maintenance";

/// Whether scraped content is the source's block page rather than a document.
pub fn is_access_denied(content: &str) -> bool {
    content.trim_start().starts_with(ACCESS_DENIED_PREFIX) || content.contains(MAINTENANCE_MARKER)
}

pub struct Uploader {
    api: Arc<dyn IngestApi>,
    seen: Arc<dyn SeenStore>,
}

impl Uploader {
    pub fn new(api: Arc<dyn IngestApi>, seen: Arc<dyn SeenStore>) -> Self {
        Self { api, seen }
    }

    pub fn api(&self) -> &Arc<dyn IngestApi> {
        &self.api
    }

    /// Mark already-ingested links so they are never uploaded again.
    pub fn seed<I, S>(&self, links: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.seen.len();
        for link in links {
            self.seen.mark(link.as_ref());
        }
        self.seen.len() - before
    }

    /// Upload a link once.
    ///
    /// The link is claimed before any network call, so a second caller gets
    /// [`AppError::Duplicate`] while the first attempt is still in flight.
    /// An upload that landed on a block page comes back as
    /// [`AppError::AccessDenied`] carrying the stored document, which the
    /// caller must remove.
    pub async fn upload_link(&self, link: &str) -> Result<Document> {
        if !self.seen.claim(link) {
            return Err(AppError::Duplicate(link.to_string()));
        }
        let response = self.api.upload_link(link).await?;
        let doc = first_document(response, link)?;
        if is_access_denied(&doc.page_content) {
            return Err(AppError::AccessDenied(Box::new(doc)));
        }
        Ok(doc)
    }

    /// Upload raw bytes, bypassing the seen set.
    pub async fn upload_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<UploadResponse> {
        self.api.upload_bytes(name, bytes).await
    }

    /// Upload raw text, bypassing the seen set.
    pub async fn upload_raw_text(&self, text: RawText) -> Result<UploadResponse> {
        self.api.upload_raw_text(text).await
    }

    /// Forget a link so it can be claimed again.
    pub fn release(&self, link: &str) {
        self.seen.release(link);
    }
}

fn first_document(response: UploadResponse, context: &str) -> Result<Document> {
    if !response.success {
        return Err(AppError::upload(context, response.error_message()));
    }
    response
        .into_first()
        .ok_or_else(|| AppError::upload(context, "no documents uploaded"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemorySeenSet;
    use crate::testing::{ApiCall, MockIngestApi, document, failure, success};

    fn uploader(api: MockIngestApi) -> (Uploader, Arc<MockIngestApi>) {
        let api = Arc::new(api);
        (
            Uploader::new(api.clone(), Arc::new(MemorySeenSet::new())),
            api,
        )
    }

    #[test]
    fn test_access_denied_markers() {
        assert!(is_access_denied("Access Denied\nYou don't have permission"));
        assert!(is_access_denied(
            "Sorry, the link you are trying to access is undergoing scheduled maintenance."
        ));
        assert!(!is_access_denied("MEMORANDUM FOR THE RECORD"));
    }

    #[tokio::test]
    async fn test_second_upload_is_duplicate_without_network_call() {
        let (u, api) = uploader(MockIngestApi::new());
        assert!(u.upload_link("https://x/a").await.is_ok());
        assert!(matches!(
            u.upload_link("link://https://x/a").await,
            Err(AppError::Duplicate(_))
        ));
        assert_eq!(api.count(|c| matches!(c, ApiCall::Link(_))), 1);
    }

    #[tokio::test]
    async fn test_seeded_links_are_skipped() {
        let (u, api) = uploader(MockIngestApi::new());
        assert_eq!(u.seed(["link://https://x/a", "https://x/a", "https://x/b"]), 2);
        assert!(matches!(
            u.upload_link("https://x/a").await,
            Err(AppError::Duplicate(_))
        ));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_access_denied_carries_document() {
        let denied = document("https://x/a", "Access Denied");
        let (u, _) = uploader(
            MockIngestApi::new().script_link("https://x/a", vec![success(denied.clone())]),
        );
        match u.upload_link("https://x/a").await {
            Err(AppError::AccessDenied(doc)) => assert_eq!(doc.location, denied.location),
            other => panic!("expected access denied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsuccessful_envelope_is_upload_error() {
        let (u, _) =
            uploader(MockIngestApi::new().script_link("https://x/a", vec![failure("bad link")]));
        let err = u.upload_link("https://x/a").await.unwrap_err();
        assert_eq!(err.to_string(), "upload failed for https://x/a: bad link");
    }

    #[tokio::test]
    async fn test_concurrent_uploads_of_one_link_make_one_call() {
        let (u, api) = uploader(MockIngestApi::new());
        let u = Arc::new(u);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let u = Arc::clone(&u);
                tokio::spawn(async move { u.upload_link("https://x/same").await.is_ok() })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            if task.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(api.count(|c| matches!(c, ApiCall::Link(_))), 1);
    }
}
