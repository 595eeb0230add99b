//! Primary-tier transport: a single GET routed through one pooled proxy

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::debug;

use crate::error::{LadderError, Result};
use crate::models::ProxyAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs one proxied request. Errors mean the proxy (or the path through
/// it) failed; HTTP status codes are returned, not raised.
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        proxy: &ProxyAddr,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<TransportResponse>;
}

/// reqwest-backed transport. Each call gets its own client since the proxy
/// is a client-level setting.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    accept_invalid_certs: bool,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip TLS verification on target sites
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    fn client_for(&self, proxy: &ProxyAddr, timeout: Duration) -> Result<reqwest::Client> {
        let upstream = reqwest::Proxy::all(proxy.url())
            .map_err(|e| LadderError::InvalidProxyAddress(format!("{}: {}", proxy, e)))?;

        reqwest::Client::builder()
            .proxy(upstream)
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|e| LadderError::Internal(format!("failed to build HTTP client: {}", e)))
    }
}

#[async_trait]
impl ProxyTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        proxy: &ProxyAddr,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<TransportResponse> {
        let client = self.client_for(proxy, timeout)?;

        debug!("GET {} via {}", url, proxy);
        let response = client.get(url).headers(headers).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(TransportResponse { status, body })
    }
}
