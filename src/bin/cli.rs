//! docdrain CLI
//!
//! Drains a reading-room collection into an AnythingLLM workspace.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docdrain::{
    error::Result,
    models::Config,
    pipeline::{self, ScrapeOptions, scrape::DEFAULT_SCRAPE_PAGES},
};

/// docdrain - reading-room collection drain
#[derive(Parser, Debug)]
#[command(
    name = "docdrain",
    version,
    about = "Crawl reading-room collections into an ingestion API"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// API key for the ingestion service (overrides the config file)
    #[arg(long, env = "DOCDRAIN_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape a collection and upload every document link
    Scrape {
        /// Collection slug, e.g. `stargate`
        collection: String,

        /// Maximum number of listing pages to scan
        #[arg(long, default_value_t = DEFAULT_SCRAPE_PAGES)]
        pages: usize,

        /// One-based page to start from
        #[arg(long, default_value_t = 1)]
        start_page: usize,

        /// Upload links already present in the ingestion service
        #[arg(long)]
        force: bool,

        /// Named pipe signalled when the site starts denying access
        #[arg(long)]
        fifo: Option<PathBuf>,
    },

    /// Validate configuration, the collection, and the API key
    Validate {
        /// Collection slug to check for existence
        #[arg(long)]
        collection: Option<String>,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config);
    init_logging(cli.verbose, &config.logging.level);
    if let Some(key) = cli.api_key {
        config.ingest.api_key = key;
    }

    match cli.command {
        Command::Scrape {
            collection,
            pages,
            start_page,
            force,
            fifo,
        } => {
            config.validate()?;
            let options = ScrapeOptions {
                collection,
                max_pages: pages,
                start_page,
                force,
                fifo_path: fifo,
            };

            let stats = pipeline::run_scrape(&config, &options).await?;
            log::info!("Collection '{}' drained", stats.collection);
            log::info!("  - pages: {}", stats.pages);
            log::info!(
                "  - committed: {} ({} duplicates, {} failures, {:.1}% success)",
                stats.committed,
                stats.duplicates,
                stats.failures,
                stats.success_rate() * 100.0
            );
            log::info!("  - access-denied retries: {}", stats.retries);
            log::info!("  - PDF documents: {}", stats.pdf_documents);
            log::info!("  - embedded: {}", stats.embedded);
            log::info!("  - elapsed: {}s", stats.duration().num_seconds());
            log::debug!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Command::Validate { collection } => {
            pipeline::run_validate(&config, collection.as_deref()).await?;
            log::info!("All validations passed!");
        }
    }

    Ok(())
}
