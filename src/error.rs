// src/error.rs

//! Unified error handling for the crawl and upload pipeline.

use std::fmt;

use thiserror::Error;

use crate::models::Document;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// A link pattern failed to compile
    #[error("pattern error: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upstream answered with a status other than the expected ones
    #[error("bad status code: {0}")]
    BadStatusCode(u16),

    /// The collection endpoint itself does not exist
    #[error("reading room collection does not exist: {0}")]
    CollectionNotFound(String),

    /// The very first probed page was missing
    #[error("no pages found in collection")]
    NoPages,

    /// A page was fetched but matched no document links
    #[error("no documents found in page: {0}")]
    NoDocuments(String),

    /// A page returned 404 during fetch
    #[error("page not found in collection: {0}")]
    PageNotFound(String),

    /// A page returned an empty body
    #[error("http response body is empty: {0}")]
    EmptyBody(String),

    /// The link was already claimed by the seen set
    #[error("already seen link: {0}")]
    Duplicate(String),

    /// The upload landed, but the source blocked retrieval
    #[error("access denied for {}", .0.url)]
    AccessDenied(Box<Document>),

    /// Upload call returned no usable result
    #[error("upload failed for {context}: {message}")]
    Upload { context: String, message: String },

    /// The ingestion API rejected our credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Text extraction from a binary document failed
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Waiting for a PDF permit took too long
    #[error("timed out waiting for a PDF permit after {0:?}")]
    PermitTimeout(std::time::Duration),

    /// A background task panicked or was aborted
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The run was cancelled
    #[error("cancelled")]
    Cancelled,
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an upload error with context.
    pub fn upload(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Upload {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_message() {
        let err = AppError::upload("https://example.com/a", "no documents uploaded");
        assert_eq!(
            err.to_string(),
            "upload failed for https://example.com/a: no documents uploaded"
        );
    }
}
