// src/utils/http.rs

//! HTTP client utilities.
//!
//! Every request goes through a [`GatedClient`], which holds a shared pass
//! on the network gate while the request is in flight and until the body
//! has been read in full.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, header};
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::models::CrawlerConfig;
use crate::services::gate::NetworkGate;

/// Agent names cycled through when rotation is enabled.
const AGENT_NAMES: [&str; 5] = [
    "spooky",
    "george-foreman",
    "varth-dader",
    "war-stars",
    "elusive",
];

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    build_client(&config.user_agent, config.timeout_secs)
}

/// Create a client with an explicit agent and timeout.
pub fn build_client(user_agent: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    Ok(client)
}

/// Status and fully-read body of a response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Cycles through a fixed set of agent names with a jittered version suffix.
#[derive(Debug, Default)]
pub struct UserAgentRotator {
    next: AtomicUsize,
}

impl UserAgentRotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_agent(&self) -> String {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        let name = AGENT_NAMES[i % AGENT_NAMES.len()];
        let name = if i % 2 == 0 {
            name.to_uppercase()
        } else {
            name.to_string()
        };
        let nanos = chrono::Utc::now().timestamp_subsec_nanos();
        format!("{}/{}.{}", name, nanos % 10, (nanos / 10) % 10)
    }
}

/// A `reqwest` client whose requests pass through a network gate.
#[derive(Debug, Clone)]
pub struct GatedClient {
    client: reqwest::Client,
    gate: Arc<NetworkGate>,
    agents: Option<Arc<UserAgentRotator>>,
}

impl GatedClient {
    pub fn new(client: reqwest::Client, gate: Arc<NetworkGate>) -> Self {
        Self {
            client,
            gate,
            agents: None,
        }
    }

    /// Build the client from crawler settings.
    pub fn from_config(config: &CrawlerConfig, gate: Arc<NetworkGate>) -> Result<Self> {
        let client = Self::new(create_async_client(config)?, gate);
        Ok(if config.rotate_user_agent {
            client.with_rotating_agents()
        } else {
            client
        })
    }

    /// Override the User-Agent header per request.
    pub fn with_rotating_agents(mut self) -> Self {
        self.agents = Some(Arc::new(UserAgentRotator::new()));
        self
    }

    pub fn gate(&self) -> &Arc<NetworkGate> {
        &self.gate
    }

    /// Start a request. Send it with [`GatedClient::send`].
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.agents {
            Some(agents) => builder.header(header::USER_AGENT, agents.next_agent()),
            None => builder,
        }
    }

    /// Send a request under a shared gate pass and read the whole body.
    pub async fn send(&self, request: RequestBuilder) -> Result<RawResponse> {
        let _pass = self.gate.acquire_shared().await;
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse { status, body })
    }
}

/// Read access to the crawled site.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Status code of a HEAD request.
    async fn probe(&self, url: &str) -> Result<u16>;

    /// Status code and body of a GET request, decoded as text.
    async fn fetch_text(&self, url: &str) -> Result<(u16, String)>;

    /// Status code and raw body of a GET request.
    async fn fetch_bytes(&self, url: &str) -> Result<(u16, Vec<u8>)>;
}

#[async_trait]
impl PageSource for GatedClient {
    async fn probe(&self, url: &str) -> Result<u16> {
        let response = self.send(self.request(Method::HEAD, url)).await?;
        Ok(response.status)
    }

    async fn fetch_text(&self, url: &str) -> Result<(u16, String)> {
        let response = self.send(self.request(Method::GET, url)).await?;
        Ok((response.status, response.text()))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<(u16, Vec<u8>)> {
        let response = self.send(self.request(Method::GET, url)).await?;
        Ok((response.status, response.body))
    }
}
