//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream crawling behavior
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Downstream ingestion API and batching
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Upload retry and backoff tuning
    #[serde(default)]
    pub upload: UploadConfig,

    /// PDF fallback chain settings
    #[serde(default)]
    pub pdf: PdfConfig,

    /// Network gate settings
    #[serde(default)]
    pub gate: GateConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.per_page_capacity == 0 {
            return Err(AppError::validation(
                "crawler.per_page_capacity must be > 0",
            ));
        }
        if self.crawler.page_channel_capacity == 0 {
            return Err(AppError::validation(
                "crawler.page_channel_capacity must be > 0",
            ));
        }
        url::Url::parse(&self.crawler.endpoint_base)?;
        url::Url::parse(&self.ingest.endpoint)?;
        if self.ingest.workspace.trim().is_empty() {
            return Err(AppError::validation("ingest.workspace is empty"));
        }
        if self.ingest.batch_capacity == 0 {
            return Err(AppError::validation("ingest.batch_capacity must be > 0"));
        }
        if self.ingest.flush_interval_secs == 0 {
            return Err(AppError::validation(
                "ingest.flush_interval_secs must be > 0",
            ));
        }
        if self.upload.backoff_low_threshold > self.upload.backoff_high_threshold {
            return Err(AppError::validation(
                "upload.backoff_low_threshold must not exceed upload.backoff_high_threshold",
            ));
        }
        if self.pdf.max_concurrent == 0 {
            return Err(AppError::validation("pdf.max_concurrent must be > 0"));
        }
        if self.gate.name.trim().is_empty() {
            return Err(AppError::validation("gate.name is empty"));
        }
        Ok(())
    }
}

/// Upstream HTTP client and page discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Site root; collections live under `readingroom/collection/`
    #[serde(default = "defaults::endpoint_base")]
    pub endpoint_base: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Rotate through a set of agent names instead of the fixed one
    #[serde(default)]
    pub rotate_user_agent: bool,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Expected number of documents per listing page
    #[serde(default = "defaults::per_page_capacity")]
    pub per_page_capacity: usize,

    /// Buffer size of each page's link channel
    #[serde(default = "defaults::page_channel_capacity")]
    pub page_channel_capacity: usize,

    /// Probe delay per page of distance from the start page
    #[serde(default = "defaults::probe_delay")]
    pub probe_delay_ms: u64,

    /// Distance after which the probe delay slope drops
    #[serde(default = "defaults::probe_delay_threshold")]
    pub probe_delay_threshold: usize,

    /// Probe delay per page of distance past the threshold
    #[serde(default = "defaults::probe_tail_delay")]
    pub probe_tail_delay_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            endpoint_base: defaults::endpoint_base(),
            user_agent: defaults::user_agent(),
            rotate_user_agent: false,
            timeout_secs: defaults::timeout(),
            per_page_capacity: defaults::per_page_capacity(),
            page_channel_capacity: defaults::page_channel_capacity(),
            probe_delay_ms: defaults::probe_delay(),
            probe_delay_threshold: defaults::probe_delay_threshold(),
            probe_tail_delay_ms: defaults::probe_tail_delay(),
        }
    }
}

/// Ingestion API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Base URL of the API, ending in `/api/`
    #[serde(default = "defaults::ingest_endpoint")]
    pub endpoint: String,

    /// Bearer key, usually supplied through the CLI or environment
    #[serde(default)]
    pub api_key: String,

    /// Workspace slug receiving embedded documents
    #[serde(default = "defaults::workspace")]
    pub workspace: String,

    /// Request timeout in seconds (uploads can be slow)
    #[serde(default = "defaults::ingest_timeout")]
    pub timeout_secs: u64,

    /// Maximum buffered documents before producers force a flush
    #[serde(default = "defaults::batch_capacity")]
    pub batch_capacity: usize,

    /// Period of the flush timer
    #[serde(default = "defaults::flush_interval")]
    pub flush_interval_secs: u64,

    /// Wait after forcing a flush on a full buffer
    #[serde(default = "defaults::full_retry_wait")]
    pub full_retry_wait_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::ingest_endpoint(),
            api_key: String::new(),
            workspace: defaults::workspace(),
            timeout_secs: defaults::ingest_timeout(),
            batch_capacity: defaults::batch_capacity(),
            flush_interval_secs: defaults::flush_interval(),
            full_retry_wait_ms: defaults::full_retry_wait(),
        }
    }
}

/// Retry/backoff tuning for access-denied uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Delay before a denied link goes back on the stream
    #[serde(default = "defaults::requeue_delay")]
    pub requeue_delay_ms: u64,

    /// Retries up to this count use the low per-retry delay
    #[serde(default = "defaults::backoff_low_threshold")]
    pub backoff_low_threshold: u64,

    /// Retries up to this count use the middle per-retry delay
    #[serde(default = "defaults::backoff_high_threshold")]
    pub backoff_high_threshold: u64,

    #[serde(default = "defaults::backoff_low")]
    pub backoff_low_ms: u64,

    #[serde(default = "defaults::backoff_mid")]
    pub backoff_mid_ms: u64,

    #[serde(default = "defaults::backoff_tail")]
    pub backoff_tail_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            requeue_delay_ms: defaults::requeue_delay(),
            backoff_low_threshold: defaults::backoff_low_threshold(),
            backoff_high_threshold: defaults::backoff_high_threshold(),
            backoff_low_ms: defaults::backoff_low(),
            backoff_mid_ms: defaults::backoff_mid(),
            backoff_tail_ms: defaults::backoff_tail(),
        }
    }
}

/// PDF fallback chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfConfig {
    /// Scan PDFs referenced by committed pages
    #[serde(default = "defaults::pdf_enabled")]
    pub enabled: bool,

    /// Concurrent page scans
    #[serde(default = "defaults::pdf_max_concurrent")]
    pub max_concurrent: usize,

    /// How long a scan waits for a permit before giving up
    #[serde(default = "defaults::permit_timeout")]
    pub permit_timeout_secs: u64,

    /// Upper bound on extracted keywords per PDF
    #[serde(default = "defaults::max_keywords")]
    pub max_keywords: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::pdf_enabled(),
            max_concurrent: defaults::pdf_max_concurrent(),
            permit_timeout_secs: defaults::permit_timeout(),
            max_keywords: defaults::max_keywords(),
        }
    }
}

/// Network gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Name shared by every component issuing HTTP
    #[serde(default = "defaults::gate_name")]
    pub name: String,

    /// Delay applied before an exclusive hold is released
    #[serde(default = "defaults::release_delay")]
    pub release_delay_ms: u64,

    /// Release the gate when the process receives SIGHUP
    #[serde(default = "defaults::sighup_release")]
    pub sighup_release: bool,

    /// Named pipe signalled on access denial (VPN restart hook)
    #[serde(default)]
    pub fifo_path: Option<String>,

    /// Longest wait for an external release after signalling the pipe
    #[serde(default = "defaults::signal_timeout")]
    pub signal_timeout_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            name: defaults::gate_name(),
            release_delay_ms: defaults::release_delay(),
            sighup_release: defaults::sighup_release(),
            fifo_path: None,
            signal_timeout_secs: defaults::signal_timeout(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // Crawler defaults
    pub fn endpoint_base() -> String {
        "https://www.cia.gov/".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; docdrain/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn per_page_capacity() -> usize {
        20
    }
    pub fn page_channel_capacity() -> usize {
        25
    }
    pub fn probe_delay() -> u64 {
        35
    }
    pub fn probe_delay_threshold() -> usize {
        200
    }
    pub fn probe_tail_delay() -> u64 {
        5
    }

    // Ingest defaults
    pub fn ingest_endpoint() -> String {
        "http://localhost:3001/api/".into()
    }
    pub fn workspace() -> String {
        "reading-room".into()
    }
    pub fn ingest_timeout() -> u64 {
        300
    }
    pub fn batch_capacity() -> usize {
        1000
    }
    pub fn flush_interval() -> u64 {
        10
    }
    pub fn full_retry_wait() -> u64 {
        1000
    }

    // Upload defaults
    pub fn requeue_delay() -> u64 {
        500
    }
    pub fn backoff_low_threshold() -> u64 {
        10
    }
    pub fn backoff_high_threshold() -> u64 {
        100
    }
    pub fn backoff_low() -> u64 {
        100
    }
    pub fn backoff_mid() -> u64 {
        400
    }
    pub fn backoff_tail() -> u64 {
        250
    }

    // PDF defaults
    pub fn pdf_enabled() -> bool {
        true
    }
    pub fn pdf_max_concurrent() -> usize {
        32
    }
    pub fn permit_timeout() -> u64 {
        480
    }
    pub fn max_keywords() -> usize {
        512
    }

    // Gate defaults
    pub fn gate_name() -> String {
        "net".into()
    }
    pub fn release_delay() -> u64 {
        1000
    }
    pub fn sighup_release() -> bool {
        true
    }
    pub fn signal_timeout() -> u64 {
        20
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_page_capacity() {
        let mut config = Config::default();
        config.crawler.per_page_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_endpoint() {
        let mut config = Config::default();
        config.ingest.endpoint = "not a url".to_string();
        assert!(matches!(config.validate(), Err(AppError::Url(_))));
    }

    #[test]
    fn validate_rejects_inverted_backoff_tiers() {
        let mut config = Config::default();
        config.upload.backoff_low_threshold = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[ingest]\nworkspace = \"stargate\"\n\n[gate]\nfifo_path = \"/tmp/vpn.fifo\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.ingest.workspace, "stargate");
        assert_eq!(config.ingest.batch_capacity, 1000);
        assert_eq!(config.gate.fifo_path.as_deref(), Some("/tmp/vpn.fifo"));
        assert_eq!(config.crawler.per_page_capacity, 20);
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let config = Config::load_or_default("/definitely/not/here.toml");
        assert_eq!(config.gate.name, "net");
    }
}
