use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for proxyladder
#[derive(Error, Debug)]
pub enum LadderError {
    // Proxy errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Upstream returned HTTP {status}")]
    UpstreamStatus { status: u16 },

    // Content classification
    #[error("Blocked content detected ({indicator})")]
    BlockedContent { indicator: String },

    #[error("CAPTCHA unresolved: {0}")]
    CaptchaUnresolved(String),

    // Alternate tiers
    #[error("Fetch backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("All tiers exhausted for {url} after {attempts} attempts across {tiers} tiers: {last_error}")]
    AllTiersExhausted {
        url: String,
        attempts: u32,
        tiers: usize,
        last_error: String,
    },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for proxyladder operations
pub type Result<T> = std::result::Result<T, LadderError>;

impl LadderError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            LadderError::InvalidRequest(_)
            | LadderError::InvalidProxyAddress(_)
            | LadderError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 502 Bad Gateway
            LadderError::ProxyConnectionFailed(_)
            | LadderError::UpstreamStatus { .. }
            | LadderError::BlockedContent { .. }
            | LadderError::CaptchaUnresolved(_)
            | LadderError::Backend { .. }
            | LadderError::AllTiersExhausted { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            LadderError::NoProxiesAvailable => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            LadderError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            LadderError::Io(_)
            | LadderError::Json(_)
            | LadderError::Http(_)
            | LadderError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for LadderError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

// Timeouts are kept distinct so callers can log them separately from refused connections.
impl From<reqwest::Error> for LadderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LadderError::Timeout
        } else if err.is_connect() {
            LadderError::ProxyConnectionFailed(err.to_string())
        } else {
            LadderError::Http(err.to_string())
        }
    }
}

impl From<url::ParseError> for LadderError {
    fn from(err: url::ParseError) -> Self {
        LadderError::InvalidRequest(err.to_string())
    }
}
