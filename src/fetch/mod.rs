//! Multi-tier resilient fetching
//!
//! A request starts on a pooled proxy and escalates through the configured
//! alternate backends, then to a CAPTCHA-solving retry, cycling with backoff
//! until some tier delivers clean content.

pub mod backend;
pub mod backoff;
pub mod captcha;
pub mod classifier;
pub mod orchestrator;
pub mod profile;
pub mod transport;

pub use backend::{BrowserServiceBackend, FetchBackend, ServerlessBackend};
pub use backoff::Backoff;
pub use captcha::{CaptchaPolicy, CaptchaSolver, TwoCaptchaSolver};
pub use classifier::{BlockClassifier, Verdict};
pub use orchestrator::{FetcherConfig, ResilientFetcher};
pub use profile::HeaderProfile;
pub use transport::{ProxyTransport, ReqwestTransport};
