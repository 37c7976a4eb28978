//! Pipeline entry points.
//!
//! - `run_scrape`: Drain one collection into the ingestion API
//! - `run_validate`: Check configuration, the collection, and the API key

pub mod scrape;
pub mod validate;

pub use scrape::{ScrapeContext, ScrapeOptions, run_scrape, run_with};
pub use validate::{run_validate, validate_with};
