// src/models/mod.rs

//! Domain models for the crawl and upload pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

pub mod collection;
mod config;
mod document;
pub mod link;
mod stats;

// Re-export all public types
pub use collection::{Collection, PageReceiver};
pub use config::{
    Config, CrawlerConfig, GateConfig, IngestConfig, LoggingConfig, PdfConfig, UploadConfig,
};
pub use document::{
    AuthResponse, Document, DocumentsResponse, Item, RawText, RemoveDocuments, TextMeta,
    UpdateEmbeddings, UploadLink, UploadResponse,
};
pub use link::{MemorySeenSet, SeenStore};
pub use stats::RunStats;
