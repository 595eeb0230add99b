//! Multi-tier resilient fetch
//!
//! Each cycle walks the ladder in a fixed order:
//!
//! 1. Primary: up to `max_retries` pooled proxies, one after another. A proxy
//!    that errors or answers non-2xx is reported failed and the next one is
//!    tried after a linear backoff. A 2xx proxy is returned to the pool; if its
//!    page is clean it is delivered, if it looks blocked the tier is abandoned.
//! 2. Alternate backends, each tried once. A CAPTCHA page with a captured
//!    challenge is handed to the solver (when configured) and the backend is
//!    asked once more with the solution.
//!
//! Cycles are separated by an exponential backoff. When every cycle is spent
//! the caller gets one `AllTiersExhausted` error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::{LadderError, Result};
use crate::fetch::backend::{BackendRequest, BackendResponse, FetchBackend};
use crate::fetch::backoff::Backoff;
use crate::fetch::captcha::{self, CaptchaPolicy, CaptchaSolver};
use crate::fetch::classifier::{BlockClassifier, Verdict};
use crate::fetch::profile::HeaderProfile;
use crate::fetch::transport::ProxyTransport;
use crate::models::{AttemptOutcome, FetchAttempt, FetchedPage, ProxyAddr, Tier};
use crate::proxy::pool::ProxyPool;
use crate::random::Entropy;

/// Orchestrator budgets
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Proxies tried per cycle in the primary tier
    pub max_retries: u32,
    /// Full passes over every tier
    pub max_cycles: u32,
    /// Per-request timeout in the primary tier
    pub request_timeout: Duration,
    /// Per-call timeout for alternate backends
    pub backend_timeout: Duration,
    /// Budget for one CAPTCHA solve (zero when no solver is configured)
    pub captcha_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_cycles: 3,
            request_timeout: Duration::from_secs(15),
            backend_timeout: Duration::from_secs(60),
            captcha_timeout: Duration::from_secs(120),
        }
    }
}

impl FetcherConfig {
    /// Upper bound on one whole fetch call: every request, solve, and backoff
    /// at its worst, plus headroom for pool replenishment
    pub fn overall_deadline(&self, backoff: &Backoff, backends: usize) -> Duration {
        let retries = self.max_retries.max(1);
        let cycles = self.max_cycles.max(1);
        let per_backend = self
            .backend_timeout
            .saturating_mul(2)
            .saturating_add(self.captcha_timeout);

        let per_cycle = (self.request_timeout + backoff.max_delay())
            .saturating_mul(retries)
            .saturating_add(per_backend.saturating_mul(backends as u32))
            .saturating_add(backoff.max_delay());

        per_cycle
            .saturating_mul(cycles)
            .saturating_add(Duration::from_secs(120))
    }
}

/// Mutable record of one fetch call; survives the deadline cancelling the run
#[derive(Default)]
struct Ledger {
    attempts: Vec<FetchAttempt>,
    last_error: Option<String>,
}

impl Ledger {
    fn record(
        &mut self,
        url: &str,
        cycle: u32,
        tier: Tier,
        proxy: Option<ProxyAddr>,
        outcome: AttemptOutcome,
        started: Instant,
    ) {
        match &outcome {
            AttemptOutcome::Delivered => {}
            AttemptOutcome::SoftBlocked(reason)
            | AttemptOutcome::CaptchaDetected(reason)
            | AttemptOutcome::HardFailed(reason)
            | AttemptOutcome::CaptchaUnresolved(reason) => {
                self.last_error = Some(format!("{}: {}", tier, reason));
            }
            AttemptOutcome::PoolExhausted => {
                self.last_error = Some(LadderError::NoProxiesAvailable.to_string());
            }
        }

        self.attempts.push(FetchAttempt {
            url: url.to_string(),
            cycle,
            tier,
            proxy,
            outcome,
            elapsed: started.elapsed(),
        });
    }
}

enum TierResult {
    Delivered(String),
    Escalate,
}

pub struct ResilientFetcher {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn ProxyTransport>,
    backends: Vec<Arc<dyn FetchBackend>>,
    solver: Option<(Arc<dyn CaptchaSolver>, CaptchaPolicy)>,
    classifier: BlockClassifier,
    backoff: Backoff,
    config: FetcherConfig,
    entropy: Entropy,
}

impl ResilientFetcher {
    pub fn new(
        pool: Arc<ProxyPool>,
        transport: Arc<dyn ProxyTransport>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            pool,
            transport,
            backends: Vec::new(),
            solver: None,
            classifier: BlockClassifier::default(),
            backoff: Backoff::default(),
            config,
            entropy: Entropy::default(),
        }
    }

    /// Append an alternate tier; tiers are tried in the order added
    pub fn with_backend(mut self, backend: Arc<dyn FetchBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_captcha_solver(
        mut self,
        solver: Arc<dyn CaptchaSolver>,
        policy: CaptchaPolicy,
    ) -> Self {
        self.solver = Some((solver, policy));
        self
    }

    pub fn with_classifier(mut self, classifier: BlockClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_entropy(mut self, entropy: Entropy) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Number of rungs on the ladder, counting the primary tier
    pub fn tier_count(&self) -> usize {
        1 + self.backends.len()
    }

    /// Fetch `url`, escalating through tiers as needed
    #[instrument(skip(self), fields(tiers = self.tier_count()))]
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LadderError::InvalidRequest(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let deadline = self
            .config
            .overall_deadline(&self.backoff, self.backends.len());
        let mut ledger = Ledger::default();

        let outcome = tokio::time::timeout(deadline, self.run(url, &mut ledger)).await;

        match outcome {
            Ok(Some((content, tier))) => {
                info!(
                    "Fetched {} via {} after {} attempts",
                    url,
                    tier,
                    ledger.attempts.len()
                );
                Ok(FetchedPage {
                    url: url.to_string(),
                    content,
                    tier,
                    attempts: ledger.attempts,
                })
            }
            Ok(None) => Err(self.exhausted(url, ledger)),
            Err(_) => {
                ledger.last_error = Some(format!(
                    "overall deadline of {}s exceeded",
                    deadline.as_secs()
                ));
                Err(self.exhausted(url, ledger))
            }
        }
    }

    fn exhausted(&self, url: &str, ledger: Ledger) -> LadderError {
        let err = LadderError::AllTiersExhausted {
            url: url.to_string(),
            attempts: ledger.attempts.len() as u32,
            tiers: self.tier_count(),
            last_error: ledger
                .last_error
                .unwrap_or_else(|| "no attempt was made".to_string()),
        };
        error!("{}", err);
        err
    }

    async fn run(&self, url: &str, ledger: &mut Ledger) -> Option<(String, Tier)> {
        let cycles = self.config.max_cycles.max(1);

        for cycle in 1..=cycles {
            debug!("Fetch cycle {}/{} for {}", cycle, cycles, url);

            if let TierResult::Delivered(content) = self.try_primary(url, cycle, ledger).await {
                return Some((content, Tier::Proxied));
            }

            for backend in &self.backends {
                let delivered = self
                    .try_backend(backend.as_ref(), url, cycle, ledger)
                    .await;
                if delivered.is_some() {
                    return delivered;
                }
            }

            if cycle < cycles {
                let delay = self.backoff.cycle_delay(cycle, &self.entropy);
                warn!(
                    "Cycle {} for {} failed, retrying in {}ms",
                    cycle,
                    url,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }

        None
    }

    async fn try_primary(&self, url: &str, cycle: u32, ledger: &mut Ledger) -> TierResult {
        let retries = self.config.max_retries.max(1);

        for attempt in 1..=retries {
            let started = Instant::now();
            let Some(proxy) = self.pool.get_proxy().await else {
                warn!("No proxies available for {}, escalating", url);
                ledger.record(
                    url,
                    cycle,
                    Tier::Proxied,
                    None,
                    AttemptOutcome::PoolExhausted,
                    started,
                );
                return TierResult::Escalate;
            };

            let headers = HeaderProfile::random(&self.entropy).headers();
            let result = self
                .transport
                .get(url, &proxy, headers, self.config.request_timeout)
                .await;

            match result {
                Ok(response) if response.is_success() => {
                    self.pool.return_proxy(proxy.clone());

                    match self.classifier.classify(&response.body) {
                        Verdict::Clean => {
                            ledger.record(
                                url,
                                cycle,
                                Tier::Proxied,
                                Some(proxy),
                                AttemptOutcome::Delivered,
                                started,
                            );
                            return TierResult::Delivered(response.body);
                        }
                        Verdict::Blocked(indicator) => {
                            warn!("Blocked content via {} ({}), escalating", proxy, indicator);
                            ledger.record(
                                url,
                                cycle,
                                Tier::Proxied,
                                Some(proxy),
                                AttemptOutcome::SoftBlocked(indicator),
                                started,
                            );
                            return TierResult::Escalate;
                        }
                        Verdict::Captcha(indicator) => {
                            warn!("CAPTCHA via {} ({}), escalating", proxy, indicator);
                            ledger.record(
                                url,
                                cycle,
                                Tier::Proxied,
                                Some(proxy),
                                AttemptOutcome::CaptchaDetected(indicator),
                                started,
                            );
                            return TierResult::Escalate;
                        }
                    }
                }
                Ok(response) => {
                    self.pool.report_failed(&proxy);
                    let reason = LadderError::UpstreamStatus {
                        status: response.status,
                    }
                    .to_string();
                    debug!("Proxy {} attempt {}: {}", proxy, attempt, reason);
                    ledger.record(
                        url,
                        cycle,
                        Tier::Proxied,
                        Some(proxy),
                        AttemptOutcome::HardFailed(reason),
                        started,
                    );
                }
                Err(e) => {
                    self.pool.report_failed(&proxy);
                    debug!("Proxy {} attempt {}: {}", proxy, attempt, e);
                    ledger.record(
                        url,
                        cycle,
                        Tier::Proxied,
                        Some(proxy),
                        AttemptOutcome::HardFailed(e.to_string()),
                        started,
                    );
                }
            }

            if attempt < retries {
                tokio::time::sleep(self.backoff.proxy_delay(attempt, &self.entropy)).await;
            }
        }

        info!("Primary tier exhausted {} proxies for {}", retries, url);
        TierResult::Escalate
    }

    async fn call_backend(
        &self,
        backend: &dyn FetchBackend,
        request: &BackendRequest,
    ) -> Result<BackendResponse> {
        match tokio::time::timeout(self.config.backend_timeout, backend.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(LadderError::Timeout),
        }
    }

    async fn try_backend(
        &self,
        backend: &dyn FetchBackend,
        url: &str,
        cycle: u32,
        ledger: &mut Ledger,
    ) -> Option<(String, Tier)> {
        let name = backend.name().to_string();
        let tier = Tier::Backend(name.clone());
        let request = BackendRequest::new(url);
        let started = Instant::now();

        info!("Escalating {} to backend {}", url, name);
        let response = match self.call_backend(backend, &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Backend {} failed for {}: {}", name, url, e);
                let outcome = AttemptOutcome::HardFailed(e.to_string());
                ledger.record(url, cycle, tier, None, outcome, started);
                return None;
            }
        };

        let verdict = match (&response.challenge, response.success) {
            (Some(_), _) => match self.classifier.classify(&response.content) {
                Verdict::Captcha(indicator) => Verdict::Captcha(indicator),
                _ => Verdict::Captcha("challenge image".to_string()),
            },
            (None, true) => self.classifier.classify(&response.content),
            (None, false) => {
                let reason = response.failure_reason();
                warn!("Backend {} could not fetch {}: {}", name, url, reason);
                ledger.record(url, cycle, tier, None, AttemptOutcome::HardFailed(reason), started);
                return None;
            }
        };

        match verdict {
            Verdict::Clean => {
                ledger.record(url, cycle, tier.clone(), None, AttemptOutcome::Delivered, started);
                Some((response.content, tier))
            }
            Verdict::Blocked(indicator) => {
                warn!("Backend {} was blocked ({})", name, indicator);
                let outcome = AttemptOutcome::SoftBlocked(indicator);
                ledger.record(url, cycle, tier, None, outcome, started);
                None
            }
            Verdict::Captcha(indicator) => {
                ledger.record(
                    url,
                    cycle,
                    tier,
                    None,
                    AttemptOutcome::CaptchaDetected(indicator),
                    started,
                );
                self.resolve_captcha(backend, &request, response, cycle, ledger)
                    .await
            }
        }
    }

    /// Solve the captured challenge and ask the backend once more
    async fn resolve_captcha(
        &self,
        backend: &dyn FetchBackend,
        request: &BackendRequest,
        response: BackendResponse,
        cycle: u32,
        ledger: &mut Ledger,
    ) -> Option<(String, Tier)> {
        let name = backend.name().to_string();
        let tier = Tier::Captcha(name.clone());
        let url = request.url.as_str();

        let (Some((solver, policy)), Some(image)) = (&self.solver, response.challenge) else {
            debug!("No CAPTCHA solver or challenge image for backend {}", name);
            return None;
        };

        let started = Instant::now();
        let solution = match captcha::solve(solver.as_ref(), &image, policy).await {
            Ok(solution) => solution,
            Err(e) => {
                warn!("CAPTCHA for {} via {} unresolved: {}", url, name, e);
                ledger.record(
                    url,
                    cycle,
                    tier,
                    None,
                    AttemptOutcome::CaptchaUnresolved(e.to_string()),
                    started,
                );
                return None;
            }
        };

        let retry = request.with_solution(solution);
        let outcome = match self.call_backend(backend, &retry).await {
            Ok(response) if response.success && response.challenge.is_none() => {
                match self.classifier.classify(&response.content) {
                    Verdict::Clean => {
                        let delivered = AttemptOutcome::Delivered;
                        ledger.record(url, cycle, tier.clone(), None, delivered, started);
                        return Some((response.content, tier));
                    }
                    Verdict::Blocked(indicator) | Verdict::Captcha(indicator) => {
                        AttemptOutcome::CaptchaUnresolved(format!("still blocked ({})", indicator))
                    }
                }
            }
            Ok(response) if response.challenge.is_some() => {
                AttemptOutcome::CaptchaUnresolved("solution rejected".to_string())
            }
            Ok(response) => AttemptOutcome::HardFailed(response.failure_reason()),
            Err(e) => AttemptOutcome::HardFailed(e.to_string()),
        };

        warn!("Backend {} did not deliver after CAPTCHA solve", name);
        ledger.record(url, cycle, tier, None, outcome, started);
        None
    }
}
