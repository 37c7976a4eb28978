//! PDF fallback chain.
//!
//! Committed pages that mention a PDF are scanned for PDF anchors. Each PDF
//! then goes through up to three stages, stopping at the first that yields
//! something usable:
//!
//! 1. upload the PDF link like any other document
//! 2. download the bytes and upload them as a file
//! 3. extract keywords from the bytes and upload them as raw text
//!
//! Page scans share a bounded pool of permits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Semaphore;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AppError, Result};
use crate::models::{Document, PdfConfig, RawText, UploadResponse};
use crate::services::uploader::Uploader;
use crate::utils::http::PageSource;
use crate::utils::{file_name, resolve};

/// Matches the download anchor rendered next to an embedded PDF viewer.
pub const PDF_LINK_PATTERN: &str =
    r#""application/pdf" src="[^"]*" /> <a href="([^"]*\.pdf)" type="application/pdf"#;

/// Source of keyword text for a binary document.
#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    async fn extract(&self, bytes: Vec<u8>) -> Result<Vec<String>>;
}

/// Keywords from the PDF's extracted text.
#[cfg(feature = "pdf")]
#[derive(Debug, Clone)]
pub struct PdfKeywordExtractor {
    max_keywords: usize,
}

#[cfg(feature = "pdf")]
impl PdfKeywordExtractor {
    pub fn new(max_keywords: usize) -> Self {
        Self { max_keywords }
    }
}

#[cfg(feature = "pdf")]
#[async_trait]
impl KeywordExtractor for PdfKeywordExtractor {
    async fn extract(&self, bytes: Vec<u8>) -> Result<Vec<String>> {
        let max = self.max_keywords;
        tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes)
                .map(|text| keywords(&text, max))
                .map_err(|e| AppError::Extraction(e.to_string()))
        })
        .await
        .map_err(|e| AppError::Extraction(e.to_string()))?
    }
}

/// Distinct lowercase alphabetic words of three or more letters, in order
/// of first appearance.
pub fn keywords(text: &str, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    text.unicode_words()
        .filter(|w| w.chars().count() >= 3 && w.chars().all(char::is_alphabetic))
        .map(str::to_lowercase)
        .filter(|w| seen.insert(w.clone()))
        .take(max)
        .collect()
}

/// Normalize a PDF URL the way the reading room serves its files: the file
/// stem is upper-cased, doubled slashes collapse, and `readingroom/document`
/// becomes `readingroom/docs`.
pub fn clean_pdf_url(url: &str) -> String {
    let (dir, file) = match url.rfind('/') {
        Some(i) => url.split_at(i + 1),
        None => ("", url),
    };
    let stem = file
        .strip_suffix(".pdf")
        .or_else(|| file.strip_suffix(".PDF"))
        .unwrap_or(file);

    let joined = format!("{}{}.pdf", dir, stem.to_uppercase());
    joined
        .replace("//", "/")
        .replace("https:/", "https://")
        .replace("http:/", "http://")
        .replacen("readingroom/document", "readingroom/docs", 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfStage {
    Link,
    Bytes,
    Keywords,
}

/// What the first successful stage produced.
#[derive(Debug, Clone)]
pub enum PdfArtifact {
    Document(Document),
    Response(UploadResponse),
}

#[derive(Debug, Clone)]
pub struct PdfOutcome {
    pub url: String,
    pub stage: PdfStage,
    pub artifact: PdfArtifact,
}

impl PdfOutcome {
    /// The stored document, if the artifact carries one.
    pub fn document(&self) -> Option<&Document> {
        match &self.artifact {
            PdfArtifact::Document(doc) => Some(doc),
            PdfArtifact::Response(resp) => resp.documents.first(),
        }
    }
}

pub struct PdfFallbackChain {
    source: Arc<dyn PageSource>,
    uploader: Arc<Uploader>,
    extractor: Arc<dyn KeywordExtractor>,
    permits: Arc<Semaphore>,
    permit_timeout: Duration,
    pattern: Regex,
}

impl PdfFallbackChain {
    pub fn new(
        source: Arc<dyn PageSource>,
        uploader: Arc<Uploader>,
        extractor: Arc<dyn KeywordExtractor>,
        config: &PdfConfig,
    ) -> Result<Self> {
        Ok(Self {
            source,
            uploader,
            extractor,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            permit_timeout: Duration::from_secs(config.permit_timeout_secs),
            pattern: Regex::new(PDF_LINK_PATTERN)?,
        })
    }

    /// Scan a page for PDF anchors and run the chain on each, one permit
    /// held for the whole scan.
    pub async fn scan_page(&self, page_url: &str) -> Result<Vec<PdfOutcome>> {
        let _permit = tokio::time::timeout(
            self.permit_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| AppError::PermitTimeout(self.permit_timeout))?
        .map_err(|_| AppError::Cancelled)?;

        log::debug!("[pdf] scanning {}", page_url);
        let (status, body) = self.source.fetch_text(page_url).await?;
        if status != 200 {
            return Err(AppError::BadStatusCode(status));
        }
        if body.is_empty() {
            return Err(AppError::EmptyBody(page_url.to_string()));
        }

        let links = self.pdf_links(&body, page_url);
        if links.is_empty() {
            log::debug!("[pdf] no PDF anchors on {}", page_url);
            return Ok(Vec::new());
        }

        let runs = links.iter().map(|link| self.run(link));
        let outcomes: Vec<PdfOutcome> = futures::future::join_all(runs)
            .await
            .into_iter()
            .flatten()
            .collect();
        log::info!(
            "[pdf] {}: {}/{} PDFs stored",
            page_url,
            outcomes.len(),
            links.len()
        );
        Ok(outcomes)
    }

    /// PDF URLs on a page, resolved and cleaned.
    pub fn pdf_links(&self, body: &str, page_url: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.pattern
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|href| !href.is_empty())
            .map(|href| resolve(page_url, href).unwrap_or_else(|| href.to_string()))
            .map(|url| {
                if url.contains("document") {
                    clean_pdf_url(&url)
                } else {
                    url
                }
            })
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }

    /// Run the stages for one PDF. `None` when every stage failed.
    pub async fn run(&self, pdf_url: &str) -> Option<PdfOutcome> {
        match self.uploader.upload_link(pdf_url).await {
            Ok(doc) => {
                return Some(PdfOutcome {
                    url: pdf_url.to_string(),
                    stage: PdfStage::Link,
                    artifact: PdfArtifact::Document(doc),
                });
            }
            Err(AppError::Duplicate(_)) => return None,
            Err(AppError::AccessDenied(doc)) => {
                log::warn!("[pdf] link upload denied for {}, retrying as file", pdf_url);
                if let Err(e) = self.uploader.api().remove_document(&doc.location).await {
                    log::warn!("[pdf] could not remove {}: {}", doc.location, e);
                }
            }
            Err(e) => log::warn!("[pdf] link upload failed for {}: {}, retrying as file", pdf_url, e),
        }

        let (url, bytes) = self.fetch_pdf(pdf_url).await?;
        let name = file_name(&url).unwrap_or_else(|| "document.pdf".to_string());

        match self.uploader.upload_bytes(&name, bytes.clone()).await {
            Ok(resp) if resp.success && !resp.documents.is_empty() => {
                return Some(PdfOutcome {
                    url,
                    stage: PdfStage::Bytes,
                    artifact: PdfArtifact::Response(resp),
                });
            }
            Ok(resp) => log::warn!(
                "[pdf] file upload rejected for {}: {}",
                url,
                resp.error_message()
            ),
            Err(e) => log::warn!("[pdf] file upload failed for {}: {}", url, e),
        }

        let words = match self.extractor.extract(bytes).await {
            Ok(words) if !words.is_empty() => words,
            Ok(_) => {
                log::warn!("[pdf] no keywords extracted from {}", url);
                return None;
            }
            Err(e) => {
                log::warn!("[pdf] keyword extraction failed for {}: {}", url, e);
                return None;
            }
        };
        log::debug!("[pdf] {} keywords for {}", words.len(), url);

        let text = RawText::new(&url, &name, words.join(" "));
        match self.uploader.upload_raw_text(text).await {
            Ok(resp) if resp.success => Some(PdfOutcome {
                url,
                stage: PdfStage::Keywords,
                artifact: PdfArtifact::Response(resp),
            }),
            Ok(resp) => {
                log::error!("[pdf] keyword upload rejected for {}: {}", url, resp.error_message());
                None
            }
            Err(e) => {
                log::error!("[pdf] keyword upload failed for {}: {}", url, e);
                None
            }
        }
    }

    /// Download the PDF, trying the URL as given and then its cleaned form.
    async fn fetch_pdf(&self, pdf_url: &str) -> Option<(String, Vec<u8>)> {
        let url = if pdf_url.ends_with(".pdf") {
            pdf_url.to_string()
        } else {
            format!("{pdf_url}.pdf")
        };

        let mut candidates = vec![url.clone()];
        let cleaned = clean_pdf_url(&url);
        if cleaned != url {
            candidates.push(cleaned);
        }

        for candidate in candidates {
            match self.source.fetch_bytes(&candidate).await {
                Ok((200, bytes)) if !bytes.is_empty() => return Some((candidate, bytes)),
                Ok((status, _)) => log::debug!("[pdf] {} answered {}", candidate, status),
                Err(e) => log::debug!("[pdf] {} failed: {}", candidate, e),
            }
        }
        log::warn!("[pdf] could not download {}", pdf_url);
        None
    }
}
