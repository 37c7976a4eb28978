// src/pipeline/scrape.rs

//! Collection scrape pipeline.
//!
//! Discovery → drain → upload → batch embedding, all sharing one network
//! gate and one cancellation token.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Collection, Config, MemorySeenSet, RunStats};
use crate::services::discovery::PageDiscovery;
use crate::services::drain::DrainPipeline;
use crate::services::gate::{GateRegistry, NetworkGate, NetworkPause};
use crate::services::ingest_api::{AnythingLlmClient, IngestApi};
use crate::services::orchestrator::UploadOrchestrator;
use crate::services::pdf::{KeywordExtractor, PdfFallbackChain};
use crate::services::queue::IngestionQueue;
use crate::services::uploader::Uploader;
use crate::utils::http::{GatedClient, PageSource, build_client};

/// Pages scraped when no limit is given on the command line.
pub const DEFAULT_SCRAPE_PAGES: usize = 50;

/// Per-run options supplied by the command line.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub collection: String,
    pub max_pages: usize,
    /// One-based
    pub start_page: usize,
    /// Upload links even if the ingestion service already has them
    pub force: bool,
    /// Overrides `gate.fifo_path`
    pub fifo_path: Option<PathBuf>,
}

impl ScrapeOptions {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            max_pages: DEFAULT_SCRAPE_PAGES,
            start_page: 1,
            force: false,
            fifo_path: None,
        }
    }
}

/// Collaborators of a scrape run.
pub struct ScrapeContext {
    pub source: Arc<dyn PageSource>,
    pub api: Arc<dyn IngestApi>,
    pub extractor: Option<Arc<dyn KeywordExtractor>>,
    pub pause: Option<Arc<NetworkPause>>,
}

/// Build the site client and the ingestion API client, both gated by `gate`.
pub fn connect(
    config: &Config,
    gate: Arc<NetworkGate>,
) -> Result<(Arc<dyn PageSource>, Arc<dyn IngestApi>)> {
    let site = GatedClient::from_config(&config.crawler, Arc::clone(&gate))?;
    let ingest_http = GatedClient::new(
        build_client(&config.crawler.user_agent, config.ingest.timeout_secs)?,
        gate,
    );
    let api = AnythingLlmClient::new(ingest_http, &config.ingest);
    Ok((Arc::new(site), Arc::new(api)))
}

/// Run a full scrape against the live site and ingestion API.
///
/// Ctrl-C cancels the run; documents already committed are still flushed.
pub async fn run_scrape(config: &Config, options: &ScrapeOptions) -> Result<RunStats> {
    let registry = GateRegistry::from_config(&config.gate);
    let gate = registry.gate(&config.gate.name);

    #[cfg(unix)]
    let sighup = if config.gate.sighup_release {
        Some(registry.watch_sighup(&config.gate.name)?)
    } else {
        None
    };

    let (source, api) = connect(config, Arc::clone(&gate))?;

    let fifo = options
        .fifo_path
        .clone()
        .or_else(|| config.gate.fifo_path.as_ref().map(PathBuf::from));
    let pause = fifo.map(|path| {
        log::info!("[scrape] access denials will signal {}", path.display());
        Arc::new(NetworkPause::new(Arc::clone(&gate), path, &config.gate))
    });

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("[scrape] interrupted, shutting down");
                cancel.cancel();
            }
        })
    };

    let context = ScrapeContext {
        source,
        api,
        extractor: default_extractor(config),
        pause,
    };
    let result = run_with(config, options, context, cancel).await;

    interrupt.abort();
    #[cfg(unix)]
    if let Some(sighup) = sighup {
        sighup.abort();
    }
    result
}

#[cfg(feature = "pdf")]
fn default_extractor(config: &Config) -> Option<Arc<dyn KeywordExtractor>> {
    Some(Arc::new(crate::services::pdf::PdfKeywordExtractor::new(
        config.pdf.max_keywords,
    )))
}

#[cfg(not(feature = "pdf"))]
fn default_extractor(_config: &Config) -> Option<Arc<dyn KeywordExtractor>> {
    None
}

/// Run a scrape with the given collaborators.
pub async fn run_with(
    config: &Config,
    options: &ScrapeOptions,
    context: ScrapeContext,
    cancel: CancellationToken,
) -> Result<RunStats> {
    let start_time = Utc::now();
    let ScrapeContext {
        source,
        api,
        extractor,
        pause,
    } = context;

    let uploader = Arc::new(Uploader::new(
        Arc::clone(&api),
        Arc::new(MemorySeenSet::new()),
    ));
    if options.force {
        log::info!("[scrape] force enabled, not checking ingested documents");
    } else {
        match api.list_documents().await {
            Ok(listing) => {
                let seeded = uploader.seed(listing.seen_links());
                log::info!("[scrape] {} links already ingested", seeded);
            }
            Err(e) => log::warn!("[scrape] could not list ingested documents: {}", e),
        }
    }

    let collection = Arc::new(
        Collection::new(&options.collection, &config.crawler)
            .with_max_pages(options.max_pages)
            .with_start_page(options.start_page),
    );
    log::info!(
        "[scrape] '{}' from page {} (up to {} pages)",
        collection.name,
        options.start_page.max(1),
        collection.page_limit()
    );

    let discovery = PageDiscovery::new(Arc::clone(&collection), Arc::clone(&source), &config.crawler)?;
    let discovery_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                result = discovery.run() => result,
                _ = cancel.cancelled() => Err(AppError::Cancelled),
            };
            if result.is_err() {
                cancel.cancel();
            }
            result
        })
    };

    let drain = DrainPipeline::new(Arc::clone(&collection)).spawn(cancel.clone());

    let queue = IngestionQueue::new(Arc::clone(&api), &config.ingest);
    queue.start();

    let mut orchestrator =
        UploadOrchestrator::new(Arc::clone(&uploader), Arc::clone(&queue), &config.upload);
    match extractor {
        Some(extractor) if config.pdf.enabled => {
            let chain = PdfFallbackChain::new(
                Arc::clone(&source),
                Arc::clone(&uploader),
                extractor,
                &config.pdf,
            )?;
            orchestrator = orchestrator.with_pdf_chain(Arc::new(chain));
        }
        _ => log::debug!("[scrape] PDF fallback disabled"),
    }
    if let Some(pause) = pause {
        orchestrator = orchestrator.with_pause(pause);
    }

    let uploaded = orchestrator.run(drain.links, cancel.clone()).await;
    if uploaded.is_err() {
        cancel.cancel();
    }
    queue.close().await;

    let discovered = discovery_task.await?;
    let summary = uploaded?;
    let pages = match discovered {
        Ok(pages) => pages,
        // Upload errors win; a cancelled discovery only reflects them.
        Err(AppError::Cancelled) if cancel.is_cancelled() => collection.page_count().await,
        Err(e) => return Err(e),
    };

    let stats = RunStats {
        collection: collection.name.clone(),
        start_time,
        end_time: Utc::now(),
        pages,
        committed: summary.committed,
        duplicates: summary.duplicates,
        retries: summary.retries,
        failures: summary.failures,
        pdf_documents: summary.pdf_documents,
        embedded: queue.flushed(),
    };
    log::info!(
        "[scrape] uploaded {} links from {} pages in {}s",
        stats.committed,
        stats.pages,
        stats.duration().num_seconds()
    );
    Ok(stats)
}
