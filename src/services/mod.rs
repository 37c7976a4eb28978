//! Service layer for the drain pipeline.
//!
//! This module contains the business logic for:
//! - Page discovery and listing fetches (`PageDiscovery`, `PageFetcher`)
//! - Merging page links into one stream (`DrainPipeline`)
//! - Link uploads and access-denied retries (`Uploader`, `UploadOrchestrator`)
//! - Batched embedding updates (`IngestionQueue`)
//! - PDF fallback uploads (`PdfFallbackChain`)
//! - Network pausing (`NetworkGate`, `NetworkPause`)

pub mod discovery;
pub mod drain;
pub mod fetcher;
pub mod gate;
pub mod ingest_api;
pub mod orchestrator;
pub mod pdf;
pub mod queue;
pub mod uploader;

pub use discovery::PageDiscovery;
pub use drain::{DrainHandle, DrainPipeline};
pub use fetcher::PageFetcher;
pub use gate::{GateRegistry, NetworkGate, NetworkPause};
pub use ingest_api::{AnythingLlmClient, IngestApi};
pub use orchestrator::{UploadOrchestrator, UploadSummary};
pub use pdf::{KeywordExtractor, PdfFallbackChain, PdfOutcome};
#[cfg(feature = "pdf")]
pub use pdf::PdfKeywordExtractor;
pub use queue::IngestionQueue;
pub use uploader::Uploader;
