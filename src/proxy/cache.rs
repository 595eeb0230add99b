//! On-disk cache of the last validated proxy set
//!
//! The record is `{"timestamp": <unix seconds>, "proxies": ["ip:port", ...]}`.
//! Anything unreadable, stale, or dated in the future is reported as absent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::ProxyAddr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Unix timestamp in seconds
    pub timestamp: f64,
    pub proxies: Vec<ProxyAddr>,
}

impl CacheRecord {
    pub fn new(proxies: Vec<ProxyAddr>, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.timestamp_millis() as f64 / 1000.0,
            proxies,
        }
    }

    /// Age relative to `now`; None when the timestamp is in the future or not finite
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        let written_ms = (self.timestamp * 1000.0).round();
        if !written_ms.is_finite() {
            return None;
        }
        let age_ms = now.timestamp_millis() as f64 - written_ms;
        if age_ms < 0.0 {
            return None;
        }
        Some(Duration::from_millis(age_ms as u64))
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now).is_some_and(|age| age < max_age)
    }

    pub fn written_at(&self) -> Option<DateTime<Utc>> {
        let millis = (self.timestamp * 1000.0).round();
        if !millis.is_finite() {
            return None;
        }
        Utc.timestamp_millis_opt(millis as i64).single()
    }
}

/// File-backed cache store
#[derive(Debug, Clone)]
pub struct ProxyCache {
    path: PathBuf,
    max_age: Duration,
}

impl ProxyCache {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh record, or None if the file is missing, corrupt, or stale
    pub async fn load_fresh(&self) -> Option<CacheRecord> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read proxy cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        let record: CacheRecord = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring corrupt proxy cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        let now = Utc::now();
        match record.age(now) {
            Some(age) if age < self.max_age => {
                debug!(
                    "Proxy cache is {}s old with {} proxies",
                    age.as_secs(),
                    record.proxies.len()
                );
                Some(record)
            }
            Some(age) => {
                debug!("Proxy cache expired ({}s old)", age.as_secs());
                None
            }
            None => {
                warn!("Ignoring proxy cache with a future timestamp");
                None
            }
        }
    }

    /// Write the record through a temp file and rename, so readers never see
    /// a half-written cache
    pub async fn save(&self, record: &CacheRecord) -> Result<()> {
        let body = serde_json::to_vec_pretty(record)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> ProxyAddr {
        ProxyAddr::parse(s).unwrap()
    }

    #[test]
    fn test_freshness_window() {
        let now = Utc::now();
        let max_age = Duration::from_secs(1800);

        let fresh = CacheRecord::new(vec![], now - chrono::Duration::seconds(60));
        assert!(fresh.is_fresh(now, max_age));

        let edge = CacheRecord::new(vec![], now - chrono::Duration::seconds(1800));
        assert!(!edge.is_fresh(now, max_age));

        let future = CacheRecord::new(vec![], now + chrono::Duration::seconds(600));
        assert!(future.age(now).is_none());
        assert!(!future.is_fresh(now, max_age));
    }

    #[test]
    fn test_record_wire_format() {
        let record: CacheRecord =
            serde_json::from_str(r#"{"timestamp": 1700000000.5, "proxies": ["1.2.3.4:8080"]}"#)
                .unwrap();
        assert_eq!(record.proxies, vec![addr("1.2.3.4:8080")]);
        assert_eq!(
            record.written_at().unwrap().timestamp_millis(),
            1_700_000_000_500
        );

        assert!(serde_json::from_str::<CacheRecord>(
            r#"{"timestamp": 1, "proxies": ["not-a-proxy"]}"#
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_save_then_load_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProxyCache::new(
            dir.path().join("nested/healthy.json"),
            Duration::from_secs(1800),
        );

        let record = CacheRecord::new(vec![addr("5.6.7.8:80")], Utc::now());
        cache.save(&record).await.unwrap();

        let loaded = cache.load_fresh().await.unwrap();
        assert_eq!(loaded.proxies, vec![addr("5.6.7.8:80")]);
        assert!(!dir.path().join("nested/healthy.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_stale_missing_and_corrupt_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("healthy.json");
        let cache = ProxyCache::new(&path, Duration::from_secs(1800));

        assert!(cache.load_fresh().await.is_none());

        let stale = CacheRecord::new(
            vec![addr("1.2.3.4:8080")],
            Utc::now() - chrono::Duration::seconds(3600),
        );
        cache.save(&stale).await.unwrap();
        assert!(cache.load_fresh().await.is_none());

        std::fs::write(&path, b"{not json").unwrap();
        assert!(cache.load_fresh().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProxyCache::new(dir.path().join("healthy.json"), Duration::from_secs(60));

        cache
            .save(&CacheRecord::new(vec![addr("1.2.3.4:80")], Utc::now()))
            .await
            .unwrap();
        cache.delete().await.unwrap();
        cache.delete().await.unwrap();
        assert!(!cache.path().exists());
    }
}
