//! Self-replenishing proxy pool
//!
//! This module provides:
//! - Candidate sourcing from public feeds
//! - Concurrent liveness validation
//! - A freshness-bounded on-disk cache
//! - The shared pool with failure tracking

pub mod cache;
pub mod pool;
pub mod sourcing;
pub mod validator;

pub use cache::{CacheRecord, ProxyCache};
pub use pool::{PoolConfig, PoolRegistry, ProxyPool};
pub use sourcing::{ProxySource, ProxySourcer, SourcerConfig};
pub use validator::{ProxyCheck, ProxyValidator, ValidatorConfig};
