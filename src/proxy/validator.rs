//! Concurrent proxy validation
//!
//! Every candidate gets exactly one GET through itself to a randomly chosen
//! IP-echo endpoint. A proxy passes only if the echo comes back quickly and
//! looks like an echo, not a login wall or an HTML error page.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, info, instrument};

use crate::models::ProxyAddr;
use crate::random::Entropy;

/// Validator configuration
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Concurrent probes
    pub workers: usize,
    /// Per-probe timeout
    pub timeout: Duration,
    /// Candidates per batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_pause: Duration,
    /// Echo-IP endpoints; one is picked per probe
    pub test_urls: Vec<String>,
    /// Accepted bodies are strictly shorter than this many bytes
    pub max_body_len: usize,
    pub user_agent: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            workers: 50,
            timeout: Duration::from_secs(8),
            batch_size: 100,
            batch_pause: Duration::from_secs(1),
            test_urls: vec![
                "https://httpbin.org/ip".to_string(),
                "https://ipinfo.io/ip".to_string(),
                "https://api.ipify.org".to_string(),
                "https://checkip.amazonaws.com/".to_string(),
            ],
            max_body_len: 100,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

/// Filters candidates down to the ones usable right now
#[async_trait]
pub trait ProxyCheck: Send + Sync {
    /// Returns the subset of `candidates` that passed. Order is not meaningful.
    async fn validate(&self, candidates: Vec<ProxyAddr>) -> Vec<ProxyAddr>;
}

/// Result of a single probe. Only pass/fail leaves this module; the rest is
/// for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    /// Answered, but not like an echo endpoint
    Rejected(String),
    Timeout,
    /// The proxy accepted the connection and then broke the exchange
    ProxyError(String),
    ConnectFailed(String),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Acceptance rule for an echo response
pub fn accept_echo(
    status: u16,
    elapsed: Duration,
    timeout: Duration,
    body: &str,
    max_body_len: usize,
) -> std::result::Result<(), String> {
    if !(200..300).contains(&status) {
        return Err(format!("HTTP {}", status));
    }
    if elapsed >= timeout {
        return Err(format!("slow response ({}ms)", elapsed.as_millis()));
    }
    let body = body.trim();
    if body.is_empty() {
        return Err("empty body".to_string());
    }
    if body.len() >= max_body_len {
        return Err(format!("body too long ({} bytes)", body.len()));
    }
    Ok(())
}

pub struct ProxyValidator {
    config: ValidatorConfig,
    entropy: Entropy,
}

impl ProxyValidator {
    pub fn new(config: ValidatorConfig, entropy: Entropy) -> Self {
        Self { config, entropy }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate in fixed-size batches, yielding the healthy proxies of each
    /// batch as soon as it completes
    pub fn validate_batches(
        &self,
        candidates: Vec<ProxyAddr>,
    ) -> impl Stream<Item = Vec<ProxyAddr>> + Send + '_ {
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<ProxyAddr>> = candidates
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total = batches.len();

        stream::iter(batches.into_iter().enumerate()).then(move |(i, batch)| async move {
            if i > 0 && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            let healthy = self.validate_batch(batch).await;
            debug!("Batch {}/{} yielded {} healthy proxies", i + 1, total, healthy.len());
            healthy
        })
    }

    async fn validate_batch(&self, batch: Vec<ProxyAddr>) -> Vec<ProxyAddr> {
        stream::iter(batch)
            .map(|proxy| async move {
                let outcome = self.probe(&proxy).await;
                outcome.is_healthy().then_some(proxy)
            })
            .buffer_unordered(self.config.workers.max(1))
            .filter_map(|healthy| async move { healthy })
            .collect()
            .await
    }

    /// Probe one proxy against a random echo endpoint
    pub async fn probe(&self, proxy: &ProxyAddr) -> ProbeOutcome {
        let Some(test_url) = self.entropy.choose(&self.config.test_urls).cloned() else {
            return ProbeOutcome::Rejected("no test endpoints configured".to_string());
        };

        let outcome = self.probe_url(proxy, &test_url).await;
        match &outcome {
            ProbeOutcome::Healthy => debug!("Proxy {} is healthy via {}", proxy, test_url),
            ProbeOutcome::Rejected(reason) => {
                debug!("Proxy {} rejected by {}: {}", proxy, test_url, reason)
            }
            ProbeOutcome::Timeout => debug!("Proxy {} timed out against {}", proxy, test_url),
            ProbeOutcome::ProxyError(e) => debug!("Proxy {} proxy-layer error: {}", proxy, e),
            ProbeOutcome::ConnectFailed(e) => debug!("Proxy {} unreachable: {}", proxy, e),
        }
        outcome
    }

    async fn probe_url(&self, proxy: &ProxyAddr, test_url: &str) -> ProbeOutcome {
        let client = match reqwest::Proxy::all(proxy.url()).and_then(|upstream| {
            reqwest::Client::builder()
                .proxy(upstream)
                .timeout(self.config.timeout)
                .user_agent(self.config.user_agent.as_str())
                .danger_accept_invalid_certs(true)
                .build()
        }) {
            Ok(client) => client,
            Err(e) => return ProbeOutcome::ProxyError(e.to_string()),
        };

        let start = Instant::now();
        let response = match client.get(test_url).send().await {
            Ok(response) => response,
            Err(e) => return classify_error(&e),
        };
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return classify_error(&e),
        };

        match accept_echo(
            status,
            start.elapsed(),
            self.config.timeout,
            &body,
            self.config.max_body_len,
        ) {
            Ok(()) => ProbeOutcome::Healthy,
            Err(reason) => ProbeOutcome::Rejected(reason),
        }
    }
}

fn classify_error(e: &reqwest::Error) -> ProbeOutcome {
    if e.is_timeout() {
        ProbeOutcome::Timeout
    } else if e.is_connect() {
        ProbeOutcome::ConnectFailed(e.to_string())
    } else {
        ProbeOutcome::ProxyError(e.to_string())
    }
}

#[async_trait]
impl ProxyCheck for ProxyValidator {
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    async fn validate(&self, candidates: Vec<ProxyAddr>) -> Vec<ProxyAddr> {
        let total = candidates.len();
        info!(
            "Validating {} proxies with {} workers",
            total, self.config.workers
        );

        let mut healthy = Vec::new();
        let mut batches = std::pin::pin!(self.validate_batches(candidates));
        while let Some(batch) = batches.next().await {
            healthy.extend(batch);
        }

        info!("Validation complete: {}/{} proxies healthy", healthy.len(), total);
        healthy
    }
}
