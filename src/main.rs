//! Proxyladder - Entry Point
//!
//! Builds the proxy pool and the tiered fetcher, then serves the operator API
//! alongside the background pool maintainer until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxyladder::api::{ApiServer, AppState};
use proxyladder::config::{Config, LogConfig};
use proxyladder::error::Result;
use proxyladder::fetch::{
    BrowserServiceBackend, FetchBackend, ReqwestTransport, ResilientFetcher, ServerlessBackend,
    TwoCaptchaSolver,
};
use proxyladder::proxy::{PoolRegistry, ProxySourcer, ProxyValidator};
use proxyladder::random::Entropy;
use proxyladder::services::{PoolMaintainer, PoolMaintainerConfig, PoolMaintainerHandle};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);

    info!("Starting Proxyladder");

    let entropy = Entropy::from_seed_or_os(config.random_seed);

    // Pool: sourcing and validation feed the shared registry
    let sourcer = ProxySourcer::new(config.sourcer_config(), entropy.clone())?;
    let validator = ProxyValidator::new(config.validator_config(), entropy.clone());
    let registry = PoolRegistry::new(config.pool_config(), Arc::new(sourcer), Arc::new(validator));
    let pool = registry.get_or_init().await;
    info!("Proxy pool ready with {} proxies", pool.len());

    // Fetch tiers, in escalation order
    let backend_timeout = Duration::from_secs(config.backends.timeout);
    let mut backends: Vec<Arc<dyn FetchBackend>> = Vec::new();
    if let Some(endpoint) = &config.backends.browser {
        backends.push(Arc::new(BrowserServiceBackend::new(
            endpoint.clone(),
            backend_timeout,
        )?));
    }
    if let Some(endpoint) = &config.backends.serverless {
        backends.push(Arc::new(ServerlessBackend::new(
            endpoint.clone(),
            backend_timeout,
        )?));
    }

    let transport = ReqwestTransport::new().accept_invalid_certs(true);
    let mut fetcher =
        ResilientFetcher::new(pool.clone(), Arc::new(transport), config.fetcher_config())
            .with_classifier(config.classifier())
            .with_backoff(config.backoff())
            .with_entropy(entropy.clone());
    for backend in backends {
        fetcher = fetcher.with_backend(backend);
    }
    if let (Some(captcha), Some(policy)) = (&config.captcha, config.captcha_policy()) {
        let solver = TwoCaptchaSolver::new(
            captcha.api_key.clone(),
            captcha.service_url.clone(),
            backend_timeout,
        )?;
        fetcher = fetcher.with_captcha_solver(Arc::new(solver), policy);
        info!("CAPTCHA tier enabled");
    }
    info!(
        "Fetcher ready with {} tiers: proxied, {:?}",
        fetcher.tier_count(),
        fetcher.backend_names()
    );

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start pool maintainer
    let (maintainer_handle, maintainer_shutdown) = PoolMaintainerHandle::new();
    let maintainer = PoolMaintainer::new(
        pool.clone(),
        PoolMaintainerConfig {
            check_interval: Duration::from_secs(config.pool.maintenance_interval.max(1)),
        },
    );
    let maintainer_task = tokio::spawn(async move {
        maintainer.run(maintainer_shutdown).await;
    });

    // Start API server
    let api_server = ApiServer::new(config.api.clone(), AppState::new(pool, Arc::new(fetcher)));
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("API listening on {}", config.api_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    maintainer_handle.shutdown();

    let _ = tokio::join!(api_task, maintainer_task);

    info!("Proxyladder stopped");
    Ok(())
}

/// Install the global subscriber; `RUST_LOG` wins over `LOG_LEVEL`
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxyladder={},tower_http=info", log.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
