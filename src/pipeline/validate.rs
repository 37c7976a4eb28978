// src/pipeline/validate.rs

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{Collection, Config};
use crate::services::gate::GateRegistry;
use crate::services::ingest_api::IngestApi;
use crate::utils::http::PageSource;

use super::scrape::connect;

/// Validate configuration, then check the collection exists and the API
/// key is accepted.
pub async fn run_validate(config: &Config, collection: Option<&str>) -> Result<()> {
    config.validate()?;
    let gate = GateRegistry::from_config(&config.gate).gate(&config.gate.name);
    let (source, api) = connect(config, gate)?;
    validate_with(config, collection, source, api).await
}

pub async fn validate_with(
    config: &Config,
    collection: Option<&str>,
    source: Arc<dyn PageSource>,
    api: Arc<dyn IngestApi>,
) -> Result<()> {
    log::info!("[validate] checking configuration");
    if let Err(e) = config.validate() {
        log::error!("[validate] config validation failed: {}", e);
        return Err(e);
    }
    log::info!("[validate] ✓ config OK");
    log::info!("  - user agent: {}", config.crawler.user_agent);
    log::info!("  - site: {}", config.crawler.endpoint_base);
    log::info!(
        "  - ingest: {} (workspace '{}')",
        config.ingest.endpoint,
        config.ingest.workspace
    );

    if let Some(name) = collection {
        let url = Collection::new(name, &config.crawler).endpoint_url();
        match source.probe(&url).await? {
            200 => log::info!("[validate] ✓ collection '{}' found", name),
            404 => {
                log::error!("[validate] collection '{}' not found at {}", name, url);
                return Err(AppError::CollectionNotFound(name.to_string()));
            }
            status => return Err(AppError::BadStatusCode(status)),
        }
    }

    api.check_auth().await?;
    log::info!("[validate] ✓ API key accepted");
    Ok(())
}
