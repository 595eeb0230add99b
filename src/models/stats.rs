use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of the proxy pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Candidates returned by the most recent sourcing run
    pub total_sourced: usize,
    /// Candidates that passed validation in the most recent sourcing run
    pub total_validated: usize,
    /// Live queue depth
    pub currently_healthy: usize,
    /// Failure reports since start (or since the last forced refresh)
    pub total_failed: u64,
    /// Distinct proxies currently excluded
    pub failed_count: usize,
    /// When the pool was last populated from a fresh sourcing run or the cache
    pub last_refresh: Option<DateTime<Utc>>,
}
