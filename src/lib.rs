//! Proxyladder - Resilient Fetching over a Self-Replenishing Proxy Pool
//!
//! ## Features
//!
//! - Proxy candidates scraped from public HTML and plain-text feeds
//! - Concurrent validation against IP-echo endpoints
//! - Healthy-proxy cache with a freshness window
//! - Escalation from proxied requests to alternate backends and CAPTCHA solving
//! - Jittered exponential backoff between cycles
//! - Operator API for pool status and forced refresh

pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod proxy;
pub mod random;
pub mod services;

pub use config::Config;
pub use error::{LadderError, Result};
pub use fetch::ResilientFetcher;
pub use proxy::{PoolRegistry, ProxyPool};
