//! Self-replenishing pool of healthy proxies
//!
//! The pool owns three pieces of shared state: a FIFO queue of dispensable
//! proxies, a process-lifetime set of failed proxies, and counters. Queue
//! get/put is fine-grained; anything that repopulates (cache load, sourcing,
//! cache save, forced refresh) runs under one coarse async lock so only one
//! repopulation and one cache writer exist at a time.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::models::{PoolStats, ProxyAddr};
use crate::proxy::cache::{CacheRecord, ProxyCache};
use crate::proxy::sourcing::ProxySource;
use crate::proxy::validator::ProxyCheck;

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Low-water mark that triggers replenishment on `get_proxy`
    pub min_pool_size: usize,
    /// Upper bound on proxies enqueued by a repopulation
    pub max_pool_size: usize,
    pub cache_path: PathBuf,
    pub cache_max_age: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 10,
            max_pool_size: 100,
            cache_path: PathBuf::from("healthy_proxies.json"),
            cache_max_age: Duration::from_secs(30 * 60),
        }
    }
}

pub struct ProxyPool {
    config: PoolConfig,
    source: Arc<dyn ProxySource>,
    checker: Arc<dyn ProxyCheck>,
    cache: ProxyCache,
    available: Mutex<VecDeque<ProxyAddr>>,
    failed: DashSet<ProxyAddr>,
    populate_lock: tokio::sync::Mutex<()>,
    total_sourced: AtomicUsize,
    total_validated: AtomicUsize,
    total_failed: AtomicU64,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl ProxyPool {
    /// Create an empty pool. Call [`ProxyPool::initialize`] (or go through
    /// [`PoolRegistry`]) to populate it.
    pub fn new(
        config: PoolConfig,
        source: Arc<dyn ProxySource>,
        checker: Arc<dyn ProxyCheck>,
    ) -> Self {
        let cache = ProxyCache::new(config.cache_path.clone(), config.cache_max_age);
        Self {
            config,
            source,
            checker,
            cache,
            available: Mutex::new(VecDeque::new()),
            failed: DashSet::new(),
            populate_lock: tokio::sync::Mutex::new(()),
            total_sourced: AtomicUsize::new(0),
            total_validated: AtomicUsize::new(0),
            total_failed: AtomicU64::new(0),
            last_refresh: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Initial population: cache first, then sourcing
    pub async fn initialize(&self) {
        let _guard = self.populate_lock.lock().await;
        self.populate(true).await;
    }

    /// Dispense a proxy, replenishing first if the pool is below its
    /// low-water mark. `None` means nothing is available even after that.
    pub async fn get_proxy(&self) -> Option<ProxyAddr> {
        if self.len() < self.config.min_pool_size {
            debug!(
                "Pool below minimum ({} < {}), replenishing",
                self.len(),
                self.config.min_pool_size
            );
            self.replenish_if_low().await;
        }

        let mut queue = self.available.lock();
        while let Some(proxy) = queue.pop_front() {
            if !self.failed.contains(&proxy) {
                return Some(proxy);
            }
        }
        None
    }

    /// Put a dispensed proxy back at the end of the queue. Failed or already
    /// queued proxies are dropped.
    pub fn return_proxy(&self, proxy: ProxyAddr) {
        if self.failed.contains(&proxy) {
            debug!("Dropping returned proxy {} (failed)", proxy);
            return;
        }

        let mut queue = self.available.lock();
        if !queue.contains(&proxy) {
            queue.push_back(proxy);
        }
    }

    /// Exclude a proxy for the rest of the process lifetime (or until a
    /// forced refresh)
    pub fn report_failed(&self, proxy: &ProxyAddr) {
        self.failed.insert(proxy.clone());
        self.total_failed.fetch_add(1, Ordering::Relaxed);
        self.available.lock().retain(|queued| queued != proxy);
        debug!("Proxy {} reported failed", proxy);
    }

    pub fn is_failed(&self, proxy: &ProxyAddr) -> bool {
        self.failed.contains(proxy)
    }

    /// Repopulate if still below the low-water mark once the lock is held
    pub async fn replenish_if_low(&self) {
        let _guard = self.populate_lock.lock().await;
        if self.len() >= self.config.min_pool_size {
            return;
        }
        self.populate(true).await;
    }

    /// Drop everything (queue, failed set, cache file) and repopulate from
    /// the feeds
    #[instrument(skip(self))]
    pub async fn force_refresh(&self) {
        let _guard = self.populate_lock.lock().await;
        info!("Forcing proxy pool refresh");

        self.available.lock().clear();
        self.failed.clear();
        self.total_failed.store(0, Ordering::Relaxed);

        if let Err(e) = self.cache.delete().await {
            warn!("Failed to delete proxy cache: {}", e);
        }

        self.populate(false).await;
    }

    pub fn len(&self) -> usize {
        self.available.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_sourced: self.total_sourced.load(Ordering::Relaxed),
            total_validated: self.total_validated.load(Ordering::Relaxed),
            currently_healthy: self.len(),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            failed_count: self.failed.len(),
            last_refresh: *self.last_refresh.read(),
        }
    }

    /// Caller must hold `populate_lock`
    #[instrument(skip(self))]
    async fn populate(&self, use_cache: bool) {
        if use_cache {
            if let Some(record) = self.cache.load_fresh().await {
                let usable: Vec<ProxyAddr> = record
                    .proxies
                    .into_iter()
                    .filter(|p| !self.failed.contains(p))
                    .collect();

                if !usable.is_empty() {
                    let added = self.enqueue(usable);
                    *self.last_refresh.write() = Some(Utc::now());
                    info!(
                        "Loaded {} proxies from cache ({} in pool)",
                        added,
                        self.len()
                    );
                    return;
                }
                debug!("Every cached proxy has failed, treating cache as absent");
            }
        }

        info!("Sourcing fresh proxies");
        let candidates: Vec<ProxyAddr> = self
            .source
            .fetch_candidates()
            .await
            .into_iter()
            .filter(|p| !self.failed.contains(p))
            .collect();
        self.total_sourced.store(candidates.len(), Ordering::Relaxed);

        if candidates.is_empty() {
            warn!("No proxy candidates sourced, pool stays at {}", self.len());
            return;
        }

        let mut healthy = self.checker.validate(candidates).await;
        self.total_validated.store(healthy.len(), Ordering::Relaxed);

        if healthy.is_empty() {
            warn!("No sourced proxies passed validation, pool stays at {}", self.len());
            return;
        }

        healthy.sort();
        healthy.dedup();
        healthy.truncate(self.config.max_pool_size);

        let record = CacheRecord::new(healthy, Utc::now());
        if let Err(e) = self.cache.save(&record).await {
            warn!("Failed to persist proxy cache: {}", e);
        }

        let added = self.enqueue(record.proxies);
        *self.last_refresh.write() = Some(Utc::now());
        info!("Pool repopulated: {} added, {} available", added, self.len());
    }

    /// Append proxies that are neither failed nor queued, without exceeding
    /// the maximum size. Returns how many were added.
    fn enqueue(&self, proxies: Vec<ProxyAddr>) -> usize {
        let mut queue = self.available.lock();
        let mut present: HashSet<ProxyAddr> = queue.iter().cloned().collect();
        let mut added = 0;

        for proxy in proxies {
            if queue.len() >= self.config.max_pool_size {
                break;
            }
            if self.failed.contains(&proxy) || !present.insert(proxy.clone()) {
                continue;
            }
            queue.push_back(proxy);
            added += 1;
        }
        added
    }
}

/// Get-or-create factory for the process-wide pool.
///
/// The registry is owned by the composition root and handed to whoever needs
/// the pool; the first caller builds and populates it, concurrent callers
/// wait for that same instance.
pub struct PoolRegistry {
    config: PoolConfig,
    source: Arc<dyn ProxySource>,
    checker: Arc<dyn ProxyCheck>,
    cell: OnceCell<Arc<ProxyPool>>,
}

impl PoolRegistry {
    pub fn new(
        config: PoolConfig,
        source: Arc<dyn ProxySource>,
        checker: Arc<dyn ProxyCheck>,
    ) -> Self {
        Self {
            config,
            source,
            checker,
            cell: OnceCell::new(),
        }
    }

    pub async fn get_or_init(&self) -> Arc<ProxyPool> {
        self.cell
            .get_or_init(|| async {
                info!(
                    "Initializing proxy pool (min {}, max {})",
                    self.config.min_pool_size, self.config.max_pool_size
                );
                let pool = Arc::new(ProxyPool::new(
                    self.config.clone(),
                    self.source.clone(),
                    self.checker.clone(),
                ));
                pool.initialize().await;
                pool
            })
            .await
            .clone()
    }

    /// The pool if it has already been created
    pub fn get(&self) -> Option<Arc<ProxyPool>> {
        self.cell.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct StubSource {
        proxies: Vec<ProxyAddr>,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(proxies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                proxies: proxies.iter().map(|p| addr(p)).collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProxySource for StubSource {
        async fn fetch_candidates(&self) -> HashSet<ProxyAddr> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Give concurrent initializers a chance to pile up
            tokio::task::yield_now().await;
            self.proxies.iter().cloned().collect()
        }
    }

    /// Passes every candidate
    struct PassAll {
        calls: AtomicUsize,
    }

    impl PassAll {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProxyCheck for PassAll {
        async fn validate(&self, candidates: Vec<ProxyAddr>) -> Vec<ProxyAddr> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            candidates
        }
    }

    fn addr(s: &str) -> ProxyAddr {
        ProxyAddr::parse(s).unwrap()
    }

    fn config(dir: &TempDir, min: usize, max: usize) -> PoolConfig {
        PoolConfig {
            min_pool_size: min,
            max_pool_size: max,
            cache_path: dir.path().join("healthy_proxies.json"),
            cache_max_age: Duration::from_secs(1800),
        }
    }

    async fn seed_cache(config: &PoolConfig, proxies: &[&str], age_secs: i64) {
        let cache = ProxyCache::new(&config.cache_path, config.cache_max_age);
        let record = CacheRecord::new(
            proxies.iter().map(|p| addr(p)).collect(),
            Utc::now() - chrono::Duration::seconds(age_secs),
        );
        cache.save(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_sourcing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, 10, 100);
        seed_cache(&config, &["1.2.3.4:8080"], 60).await;

        let source = StubSource::new(&["9.9.9.9:9999"]);
        let pool = ProxyPool::new(config, source.clone(), PassAll::new());
        pool.initialize().await;

        assert_eq!(pool.get_proxy().await, Some(addr("1.2.3.4:8080")));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_triggers_sourcing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, 1, 100);
        seed_cache(&config, &["1.2.3.4:8080"], 1800).await;

        let source = StubSource::new(&["5.6.7.8:80"]);
        let pool = ProxyPool::new(config, source.clone(), PassAll::new());
        pool.initialize().await;

        assert_eq!(source.calls(), 1);
        assert_eq!(pool.get_proxy().await, Some(addr("5.6.7.8:80")));
    }

    #[tokio::test]
    async fn test_sourcing_populates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, 1, 100);
        let cache_path = config.cache_path.clone();

        let source = StubSource::new(&["5.6.7.8:80"]);
        let pool = ProxyPool::new(config, source.clone(), PassAll::new());
        pool.initialize().await;

        assert_eq!(pool.len(), 1);
        let stats = pool.stats();
        assert_eq!(stats.total_sourced, 1);
        assert_eq!(stats.total_validated, 1);
        assert_eq!(stats.currently_healthy, 1);
        assert!(stats.last_refresh.is_some());

        let record: CacheRecord =
            serde_json::from_slice(&std::fs::read(cache_path).unwrap()).unwrap();
        assert_eq!(record.proxies, vec![addr("5.6.7.8:80")]);
    }

    #[tokio::test]
    async fn test_empty_sourcing_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(&[]);
        let checker = PassAll::new();
        let pool = ProxyPool::new(config(&dir, 10, 100), source.clone(), checker.clone());

        assert_eq!(pool.get_proxy().await, None);
        assert_eq!(source.calls(), 1);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("healthy_proxies.json").exists());
    }

    #[tokio::test]
    async fn test_failed_proxy_is_never_dispensed() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(&["1.1.1.1:80", "2.2.2.2:80"]);
        let pool = ProxyPool::new(config(&dir, 0, 100), source, PassAll::new());
        pool.initialize().await;

        let bad = addr("1.1.1.1:80");
        pool.report_failed(&bad);
        pool.return_proxy(bad.clone());
        assert_eq!(pool.len(), 1);

        assert_eq!(pool.get_proxy().await, Some(addr("2.2.2.2:80")));
        pool.return_proxy(addr("2.2.2.2:80"));
        for _ in 0..5 {
            let got = pool.get_proxy().await;
            assert_ne!(got, Some(bad.clone()));
            if let Some(p) = got {
                pool.return_proxy(p);
            }
        }

        let stats = pool.stats();
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.failed_count, 1);
    }

    #[tokio::test]
    async fn test_failed_proxies_are_skipped_when_loading_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, 0, 100);
        seed_cache(&config, &["1.1.1.1:80", "2.2.2.2:80"], 10).await;

        let pool = ProxyPool::new(config, StubSource::new(&[]), PassAll::new());
        pool.report_failed(&addr("1.1.1.1:80"));
        pool.initialize().await;

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get_proxy().await, Some(addr("2.2.2.2:80")));
    }

    #[tokio::test]
    async fn test_all_failed_cache_falls_back_to_sourcing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, 0, 100);
        seed_cache(&config, &["1.1.1.1:80"], 10).await;

        let source = StubSource::new(&["3.3.3.3:80"]);
        let pool = ProxyPool::new(config, source.clone(), PassAll::new());
        pool.report_failed(&addr("1.1.1.1:80"));
        pool.initialize().await;

        assert_eq!(source.calls(), 1);
        assert_eq!(pool.get_proxy().await, Some(addr("3.3.3.3:80")));
    }

    #[tokio::test]
    async fn test_repopulation_respects_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let many: Vec<String> = (1..=250)
            .map(|i| format!("10.0.{}.{}:8080", i / 200, i % 200 + 1))
            .collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let config = config(&dir, 1, 100);
        let cache_path = config.cache_path.clone();

        let pool = ProxyPool::new(config, StubSource::new(&refs), PassAll::new());
        pool.initialize().await;

        assert_eq!(pool.len(), 100);
        assert_eq!(pool.stats().total_validated, 250);
        let record: CacheRecord =
            serde_json::from_slice(&std::fs::read(cache_path).unwrap()).unwrap();
        assert_eq!(record.proxies.len(), 100);
    }

    #[tokio::test]
    async fn test_return_proxy_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ProxyPool::new(
            config(&dir, 0, 100),
            StubSource::new(&["1.1.1.1:80"]),
            PassAll::new(),
        );
        pool.initialize().await;

        pool.return_proxy(addr("1.1.1.1:80"));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, 0, 100);
        seed_cache(&config, &["1.1.1.1:80"], 10).await;

        let source = StubSource::new(&["1.1.1.1:80", "4.4.4.4:80"]);
        let pool = ProxyPool::new(config, source.clone(), PassAll::new());
        pool.initialize().await;
        assert_eq!(source.calls(), 0);

        pool.report_failed(&addr("1.1.1.1:80"));
        pool.force_refresh().await;

        assert_eq!(source.calls(), 1);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().failed_count, 0);
        assert_eq!(pool.stats().total_failed, 0);
    }

    #[tokio::test]
    async fn test_registry_initializes_once_under_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource::new(&["5.6.7.8:80"]);
        let registry = Arc::new(PoolRegistry::new(
            config(&dir, 1, 100),
            source.clone(),
            PassAll::new(),
        ));
        assert!(registry.get().is_none());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_init().await })
            })
            .collect();

        let mut pools = Vec::new();
        for handle in handles {
            pools.push(handle.await.unwrap());
        }

        assert_eq!(source.calls(), 1);
        assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
        assert_eq!(pools[3].stats(), pools[11].stats());
        assert!(Arc::ptr_eq(&registry.get().unwrap(), &pools[0]));
    }
}
