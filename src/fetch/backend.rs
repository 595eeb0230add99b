//! Alternate fetch tiers
//!
//! A backend is an opaque remote service that fetches a URL on our behalf
//! (a managed headless browser, a serverless function with rotating egress).
//! The orchestrator only sees [`FetchBackend::fetch`] and judges the returned
//! content with the same classifier it uses for the primary tier.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::BackendEndpoint;
use crate::error::{LadderError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendRequest {
    pub url: String,
    /// CSS selector the backend should wait for before capturing the page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,
    /// Solved CAPTCHA text to submit on the challenge page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captcha_solution: Option<String>,
}

impl BackendRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_solution(&self, solution: impl Into<String>) -> Self {
        Self {
            captcha_solution: Some(solution.into()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendResponse {
    pub success: bool,
    pub content: String,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    /// Raw CAPTCHA image captured by the backend, if it hit a challenge
    pub challenge: Option<Bytes>,
}

impl BackendResponse {
    pub fn failure_reason(&self) -> String {
        match (&self.error, self.status_code) {
            (Some(error), _) => error.clone(),
            (None, Some(status)) => format!("HTTP {}", status),
            (None, None) => "backend reported failure".to_string(),
        }
    }
}

#[async_trait]
pub trait FetchBackend: Send + Sync {
    /// Short stable name used in logs and attempt records
    fn name(&self) -> &str;

    /// Transport or protocol failures are errors; a page the backend fetched
    /// but did not like is an `Ok` with `success == false`.
    async fn fetch(&self, request: &BackendRequest) -> Result<BackendResponse>;
}

/// Reply shape shared by both services once unwrapped
#[derive(Debug, Deserialize)]
struct ServiceReply {
    #[serde(default)]
    success: bool,
    #[serde(default, alias = "html_content", alias = "html")]
    content: Option<String>,
    #[serde(default, alias = "statusCode")]
    status_code: Option<u16>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    captcha_image: Option<String>,
}

impl ServiceReply {
    fn into_response(self, backend: &str) -> BackendResponse {
        let challenge = self.captcha_image.as_deref().and_then(|raw| {
            let encoded = raw.split_once("base64,").map_or(raw, |(_, data)| data);
            match BASE64.decode(encoded.trim()) {
                Ok(bytes) if !bytes.is_empty() => Some(Bytes::from(bytes)),
                Ok(_) => None,
                Err(e) => {
                    warn!("{} returned an undecodable CAPTCHA image: {}", backend, e);
                    None
                }
            }
        });

        BackendResponse {
            success: self.success,
            content: self.content.unwrap_or_default(),
            status_code: self.status_code,
            error: self.error,
            challenge,
        }
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LadderError::Internal(format!("failed to build backend client: {}", e)))
}

async fn post_json(backend: &str, request: reqwest::RequestBuilder) -> Result<Value> {
    let response = request.send().await.map_err(|e| LadderError::Backend {
        backend: backend.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(LadderError::Backend {
            backend: backend.to_string(),
            message: format!("service returned HTTP {}", status.as_u16()),
        });
    }

    response.json::<Value>().await.map_err(|e| LadderError::Backend {
        backend: backend.to_string(),
        message: format!("unreadable reply: {}", e),
    })
}

/// Managed browser-automation service
pub struct BrowserServiceBackend {
    endpoint: BackendEndpoint,
    client: reqwest::Client,
}

impl BrowserServiceBackend {
    pub const NAME: &'static str = "browser";

    pub fn new(endpoint: BackendEndpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint,
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl FetchBackend for BrowserServiceBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, request: &BackendRequest) -> Result<BackendResponse> {
        debug!("Requesting {} from browser service", request.url);

        let mut builder = self.client.post(&self.endpoint.url).json(request);
        if let Some(key) = &self.endpoint.api_key {
            builder = builder.bearer_auth(key);
        }

        let value = post_json(Self::NAME, builder).await?;
        let reply: ServiceReply = serde_json::from_value(value)?;
        Ok(reply.into_response(Self::NAME))
    }
}

/// Serverless function whose egress IP changes between invocations
pub struct ServerlessBackend {
    endpoint: BackendEndpoint,
    client: reqwest::Client,
}

impl ServerlessBackend {
    pub const NAME: &'static str = "serverless";

    pub fn new(endpoint: BackendEndpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint,
            client: build_client(timeout)?,
        })
    }
}

#[derive(Serialize)]
struct ServerlessPayload<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_selector: Option<&'a str>,
}

#[async_trait]
impl FetchBackend for ServerlessBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, request: &BackendRequest) -> Result<BackendResponse> {
        debug!("Invoking serverless fetch for {}", request.url);

        let payload = ServerlessPayload {
            url: &request.url,
            wait_for_selector: request.wait_for_selector.as_deref(),
        };
        let mut builder = self.client.post(&self.endpoint.url).json(&payload);
        if let Some(key) = &self.endpoint.api_key {
            builder = builder.header("x-api-key", key);
        }

        let value = post_json(Self::NAME, builder).await?;
        let reply = unwrap_gateway_envelope(value)?;
        Ok(reply.into_response(Self::NAME))
    }
}

/// Function gateways wrap the handler's reply as `{"statusCode": n, "body": "<json>"}`
fn unwrap_gateway_envelope(value: Value) -> Result<ServiceReply> {
    let envelope_body = value
        .as_object()
        .filter(|obj| obj.contains_key("statusCode") && !obj.contains_key("success"))
        .and_then(|obj| obj.get("body"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    match envelope_body {
        Some(body) => Ok(serde_json::from_str(&body)?),
        None => Ok(serde_json::from_value(value)?),
    }
}
