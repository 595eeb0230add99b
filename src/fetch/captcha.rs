//! Interactive CAPTCHA resolution
//!
//! Solving is submit-then-poll against a human-solver service. Polling
//! reports an explicit tri-state instead of treating "not ready yet" as an
//! error, and the whole solve runs under one timeout budget.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::{LadderError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Ready(String),
    Pending,
    Failed(String),
}

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Upload a challenge image, returning the service's task id
    async fn submit(&self, image: &[u8]) -> Result<String>;

    async fn poll(&self, task_id: &str) -> Result<PollStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptchaPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CaptchaPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Submit `image` and poll until solved, failed, or out of time.
///
/// Poll errors are logged and polling continues; only the timeout or an
/// explicit failure from the service ends the loop early.
#[instrument(skip(solver, image), fields(image_bytes = image.len()))]
pub async fn solve(
    solver: &dyn CaptchaSolver,
    image: &[u8],
    policy: &CaptchaPolicy,
) -> Result<String> {
    let attempt = async {
        let task_id = solver.submit(image).await?;
        info!("CAPTCHA submitted as task {}", task_id);

        loop {
            tokio::time::sleep(policy.poll_interval).await;
            match solver.poll(&task_id).await {
                Ok(PollStatus::Ready(solution)) => {
                    info!("CAPTCHA task {} solved", task_id);
                    return Ok(solution);
                }
                Ok(PollStatus::Pending) => debug!("CAPTCHA task {} not ready", task_id),
                Ok(PollStatus::Failed(reason)) => {
                    return Err(LadderError::CaptchaUnresolved(reason));
                }
                Err(e) => warn!("Polling CAPTCHA task {} failed: {}", task_id, e),
            }
        }
    };

    match tokio::time::timeout(policy.timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(LadderError::CaptchaUnresolved(format!(
            "not solved within {}s",
            policy.timeout.as_secs()
        ))),
    }
}

/// Client for 2Captcha-compatible `in.php`/`res.php` endpoints
pub struct TwoCaptchaSolver {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ServiceReply {
    status: i64,
    #[serde(default)]
    request: Value,
    #[serde(default)]
    error_text: Option<String>,
}

impl ServiceReply {
    fn request_text(&self) -> String {
        match &self.request {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

const NOT_READY: &str = "CAPCHA_NOT_READY";

impl TwoCaptchaSolver {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LadderError::Internal(format!("failed to build CAPTCHA client: {}", e)))?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn read_reply(response: reqwest::Response) -> Result<ServiceReply> {
        // The service answers with JSON but not always with a JSON content type
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            LadderError::CaptchaUnresolved(format!("unexpected solver reply {:?}: {}", text, e))
        })
    }
}

#[async_trait]
impl CaptchaSolver for TwoCaptchaSolver {
    async fn submit(&self, image: &[u8]) -> Result<String> {
        let encoded = BASE64.encode(image);
        let form = [
            ("key", self.api_key.as_str()),
            ("method", "base64"),
            ("body", encoded.as_str()),
            ("json", "1"),
        ];

        let response = self
            .client
            .post(format!("{}/in.php", self.base_url))
            .form(&form)
            .send()
            .await?;
        let reply = Self::read_reply(response).await?;

        if reply.status == 1 {
            Ok(reply.request_text())
        } else {
            Err(LadderError::CaptchaUnresolved(format!(
                "submission rejected: {}",
                reply.error_text.clone().unwrap_or_else(|| reply.request_text())
            )))
        }
    }

    async fn poll(&self, task_id: &str) -> Result<PollStatus> {
        let query = [
            ("key", self.api_key.as_str()),
            ("action", "get"),
            ("id", task_id),
            ("json", "1"),
        ];

        let response = self
            .client
            .get(format!("{}/res.php", self.base_url))
            .query(&query)
            .send()
            .await?;
        let reply = Self::read_reply(response).await?;

        if reply.status == 1 {
            return Ok(PollStatus::Ready(reply.request_text()));
        }

        let request = reply.request_text();
        if request == NOT_READY || reply.error_text.as_deref() == Some(NOT_READY) {
            return Ok(PollStatus::Pending);
        }

        Ok(PollStatus::Failed(reply.error_text.unwrap_or(request)))
    }
}
