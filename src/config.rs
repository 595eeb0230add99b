use crate::error::{LadderError, Result};
use crate::fetch::backoff::Backoff;
use crate::fetch::captcha::CaptchaPolicy;
use crate::fetch::classifier::BlockClassifier;
use crate::fetch::orchestrator::FetcherConfig;
use crate::proxy::pool::PoolConfig;
use crate::proxy::sourcing::{FeedFormat, FeedSpec, SourcerConfig};
use crate::proxy::validator::ValidatorConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_FEEDS: &str = "html:https://free-proxy-list.net/,\
html:https://www.sslproxies.org/,\
text:https://www.proxy-list.download/api/v1/get?type=http";

const DEFAULT_TEST_URLS: &str = "https://httpbin.org/ip,\
https://ipinfo.io/ip,\
https://api.ipify.org,\
https://checkip.amazonaws.com/";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy pool configuration
    pub pool: PoolSettings,
    /// Proxy validator configuration
    pub validator: ValidatorSettings,
    /// Proxy sourcing configuration
    pub sourcer: SourcerSettings,
    /// Resilient fetch configuration
    pub fetch: FetchSettings,
    /// Alternate fetch tiers
    pub backends: BackendSettings,
    /// Interactive CAPTCHA tier (None = disabled)
    pub captcha: Option<CaptchaSettings>,
    /// Operator API server configuration
    pub api: ApiServerConfig,
    /// Logging configuration
    pub log: LogConfig,
    /// Fixed seed for jitter and endpoint selection (None = OS entropy)
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Low-water mark that triggers replenishment (default: 10)
    pub min_size: usize,
    /// Upper bound on proxies kept after repopulation (default: 100)
    pub max_size: usize,
    /// Location of the healthy-proxy cache file
    pub cache_path: PathBuf,
    /// Cache max age in seconds (default: 1800)
    pub cache_max_age: u64,
    /// Background maintenance interval in seconds (default: 60)
    pub maintenance_interval: u64,
}

#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    /// Concurrent probes (default: 50)
    pub workers: usize,
    /// Per-probe timeout in seconds (default: 8)
    pub timeout: u64,
    /// Candidates per batch (default: 100)
    pub batch_size: usize,
    /// Echo-IP endpoints probed through each candidate
    pub test_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SourcerSettings {
    /// Origin feeds
    pub feeds: Vec<FeedSpec>,
    /// Per-feed request timeout in seconds (default: 30)
    pub timeout: u64,
    /// Skip TLS verification for feed requests (default: true)
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Proxies tried per cycle in the primary tier (default: 5)
    pub max_retries: u32,
    /// Full attempt cycles across all tiers (default: 3)
    pub max_cycles: u32,
    /// Primary-tier request timeout in seconds (default: 15)
    pub request_timeout: u64,
    /// Base of the linear backoff between proxies, in milliseconds (default: 1000)
    pub proxy_retry_base_ms: u64,
    /// Base of the exponential backoff between cycles, in seconds (default: 2)
    pub backoff_base: u64,
    /// Upper bound of any single backoff, in seconds (default: 30)
    pub backoff_cap: u64,
    /// Generic block indicators (None = built-in lexicon)
    pub block_indicators: Option<Vec<String>>,
    /// CAPTCHA indicators (None = built-in lexicon)
    pub captcha_indicators: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Managed browser-automation service
    pub browser: Option<BackendEndpoint>,
    /// Serverless egress function
    pub serverless: Option<BackendEndpoint>,
    /// Per-call timeout in seconds (default: 60)
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct CaptchaSettings {
    pub api_key: String,
    pub service_url: String,
    /// Solve timeout in seconds (default: 120)
    pub solve_timeout: u64,
    /// Poll interval in seconds (default: 5)
    pub poll_interval: u64,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8001)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let pool = PoolSettings {
            min_size: parse_env("POOL_MIN_SIZE", 10)?,
            max_size: parse_env("POOL_MAX_SIZE", 100)?,
            cache_path: PathBuf::from(get_env_or("POOL_CACHE_PATH", "healthy_proxies.json")),
            cache_max_age: parse_env("POOL_CACHE_MAX_AGE", 1800)?,
            maintenance_interval: parse_env("POOL_MAINTENANCE_INTERVAL", 60)?,
        };
        if pool.max_size == 0 || pool.min_size > pool.max_size {
            return Err(LadderError::InvalidConfig(
                "POOL_MIN_SIZE must not exceed POOL_MAX_SIZE, and POOL_MAX_SIZE must be positive"
                    .into(),
            ));
        }

        let test_urls = split_list(&get_env_or("VALIDATOR_TEST_URLS", DEFAULT_TEST_URLS));
        for raw in &test_urls {
            Url::parse(raw).map_err(|e| {
                LadderError::InvalidConfig(format!("VALIDATOR_TEST_URLS entry {}: {}", raw, e))
            })?;
        }
        if test_urls.is_empty() {
            return Err(LadderError::InvalidConfig(
                "VALIDATOR_TEST_URLS must list at least one endpoint".into(),
            ));
        }

        let validator = ValidatorSettings {
            workers: parse_env::<usize>("VALIDATOR_WORKERS", 50)?.max(1),
            timeout: parse_env::<u64>("VALIDATOR_TIMEOUT", 8)?.max(1),
            batch_size: parse_env::<usize>("VALIDATOR_BATCH_SIZE", 100)?.max(1),
            test_urls,
        };

        let sourcer = SourcerSettings {
            feeds: parse_feeds(&get_env_or("SOURCER_FEEDS", DEFAULT_FEEDS))?,
            timeout: parse_env::<u64>("SOURCER_TIMEOUT", 30)?.max(1),
            accept_invalid_certs: parse_env("SOURCER_ACCEPT_INVALID_CERTS", true)?,
        };

        let fetch = FetchSettings {
            max_retries: parse_env::<u32>("FETCH_MAX_RETRIES", 5)?.max(1),
            max_cycles: parse_env::<u32>("FETCH_MAX_CYCLES", 3)?.max(1),
            request_timeout: parse_env::<u64>("FETCH_REQUEST_TIMEOUT", 15)?.max(1),
            proxy_retry_base_ms: parse_env("FETCH_PROXY_RETRY_BASE_MS", 1000)?,
            backoff_base: parse_env("FETCH_BACKOFF_BASE", 2)?,
            backoff_cap: parse_env("FETCH_BACKOFF_CAP", 30)?,
            block_indicators: optional_list("BLOCK_INDICATORS"),
            captcha_indicators: optional_list("CAPTCHA_INDICATORS"),
        };

        let backends = BackendSettings {
            browser: parse_backend("BROWSER_BACKEND_URL", "BROWSER_BACKEND_API_KEY")?,
            serverless: parse_backend("SERVERLESS_BACKEND_URL", "SERVERLESS_BACKEND_API_KEY")?,
            timeout: parse_env::<u64>("BACKEND_TIMEOUT", 60)?.max(1),
        };

        let captcha = match optional_env("CAPTCHA_API_KEY") {
            Some(api_key) => Some(CaptchaSettings {
                api_key,
                service_url: get_env_or("CAPTCHA_SERVICE_URL", "http://2captcha.com")
                    .trim_end_matches('/')
                    .to_string(),
                solve_timeout: parse_env::<u64>("CAPTCHA_SOLVE_TIMEOUT", 120)?.max(1),
                poll_interval: parse_env::<u64>("CAPTCHA_POLL_INTERVAL", 5)?.max(1),
            }),
            None => None,
        };

        let random_seed = match optional_env("RANDOM_SEED") {
            Some(raw) => Some(raw.parse().map_err(|_| {
                LadderError::InvalidConfig("RANDOM_SEED must be an unsigned integer".into())
            })?),
            None => None,
        };

        Ok(Config {
            pool,
            validator,
            sourcer,
            fetch,
            backends,
            captcha,
            api: ApiServerConfig {
                port: get_env_or("API_PORT", "8001").parse().map_err(|_| {
                    LadderError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "0.0.0.0"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
            random_seed,
        })
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_pool_size: self.pool.min_size,
            max_pool_size: self.pool.max_size,
            cache_path: self.pool.cache_path.clone(),
            cache_max_age: Duration::from_secs(self.pool.cache_max_age),
        }
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            workers: self.validator.workers,
            timeout: Duration::from_secs(self.validator.timeout),
            batch_size: self.validator.batch_size,
            test_urls: self.validator.test_urls.clone(),
            ..ValidatorConfig::default()
        }
    }

    pub fn sourcer_config(&self) -> SourcerConfig {
        SourcerConfig {
            feeds: self.sourcer.feeds.clone(),
            request_timeout: Duration::from_secs(self.sourcer.timeout),
            accept_invalid_certs: self.sourcer.accept_invalid_certs,
            ..SourcerConfig::default()
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            max_retries: self.fetch.max_retries,
            max_cycles: self.fetch.max_cycles,
            request_timeout: Duration::from_secs(self.fetch.request_timeout),
            backend_timeout: Duration::from_secs(self.backends.timeout),
            captcha_timeout: self
                .captcha
                .as_ref()
                .map(|c| Duration::from_secs(c.solve_timeout))
                .unwrap_or_default(),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.fetch.proxy_retry_base_ms),
            Duration::from_secs(self.fetch.backoff_base),
            Duration::from_secs(self.fetch.backoff_cap),
        )
    }

    pub fn classifier(&self) -> BlockClassifier {
        let defaults = BlockClassifier::default();
        BlockClassifier::new(
            self.fetch
                .captcha_indicators
                .clone()
                .unwrap_or_else(|| defaults.captcha_indicators().to_vec()),
            self.fetch
                .block_indicators
                .clone()
                .unwrap_or_else(|| defaults.block_indicators().to_vec()),
        )
    }

    pub fn captcha_policy(&self) -> Option<CaptchaPolicy> {
        self.captcha.as_ref().map(|c| CaptchaPolicy {
            timeout: Duration::from_secs(c.solve_timeout),
            poll_interval: Duration::from_secs(c.poll_interval),
        })
    }
}

/// Parse `format:url` feed entries, e.g. `html:https://free-proxy-list.net/`
fn parse_feeds(raw: &str) -> Result<Vec<FeedSpec>> {
    split_list(raw)
        .into_iter()
        .map(|entry| {
            let (format, url) = entry.split_once(':').ok_or_else(|| {
                LadderError::InvalidConfig(format!(
                    "SOURCER_FEEDS entry must be format:url, got {}",
                    entry
                ))
            })?;
            let format = FeedFormat::from_str(format).ok_or_else(|| {
                LadderError::InvalidConfig(format!("SOURCER_FEEDS has unknown format: {}", format))
            })?;
            Url::parse(url).map_err(|e| {
                LadderError::InvalidConfig(format!("SOURCER_FEEDS url {}: {}", url, e))
            })?;
            Ok(FeedSpec::new(format, url))
        })
        .collect()
}

fn parse_backend(url_key: &str, key_key: &str) -> Result<Option<BackendEndpoint>> {
    let Some(raw) = optional_env(url_key) else {
        return Ok(None);
    };

    let url = Url::parse(&raw)
        .map_err(|e| LadderError::InvalidConfig(format!("{} must be a valid URL: {}", url_key, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LadderError::InvalidConfig(format!(
            "{} has unsupported scheme: {}",
            url_key,
            url.scheme()
        )));
    }

    Ok(Some(BackendEndpoint {
        url: raw,
        api_key: optional_env(key_key),
    }))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn optional_list(key: &str) -> Option<Vec<String>> {
    optional_env(key).map(|raw| split_list(&raw)).filter(|v| !v.is_empty())
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match optional_env(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| LadderError::InvalidConfig(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "POOL_MIN_SIZE",
        "POOL_MAX_SIZE",
        "POOL_CACHE_PATH",
        "POOL_CACHE_MAX_AGE",
        "POOL_MAINTENANCE_INTERVAL",
        "VALIDATOR_WORKERS",
        "VALIDATOR_TIMEOUT",
        "VALIDATOR_BATCH_SIZE",
        "VALIDATOR_TEST_URLS",
        "SOURCER_FEEDS",
        "SOURCER_TIMEOUT",
        "SOURCER_ACCEPT_INVALID_CERTS",
        "FETCH_MAX_RETRIES",
        "FETCH_MAX_CYCLES",
        "FETCH_REQUEST_TIMEOUT",
        "FETCH_PROXY_RETRY_BASE_MS",
        "FETCH_BACKOFF_BASE",
        "FETCH_BACKOFF_CAP",
        "BLOCK_INDICATORS",
        "CAPTCHA_INDICATORS",
        "BROWSER_BACKEND_URL",
        "BROWSER_BACKEND_API_KEY",
        "SERVERLESS_BACKEND_URL",
        "SERVERLESS_BACKEND_API_KEY",
        "BACKEND_TIMEOUT",
        "CAPTCHA_API_KEY",
        "CAPTCHA_SERVICE_URL",
        "CAPTCHA_SOLVE_TIMEOUT",
        "CAPTCHA_POLL_INTERVAL",
        "RANDOM_SEED",
        "API_PORT",
        "API_HOST",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.pool.min_size, 10);
        assert_eq!(config.pool.max_size, 100);
        assert_eq!(config.pool.cache_max_age, 1800);
        assert_eq!(config.validator.workers, 50);
        assert_eq!(config.validator.timeout, 8);
        assert_eq!(config.validator.test_urls.len(), 4);
        assert_eq!(config.sourcer.feeds.len(), 3);
        assert_eq!(config.sourcer.feeds[2].format, FeedFormat::Text);
        assert!(config.sourcer.accept_invalid_certs);
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.fetch.max_cycles, 3);
        assert!(config.backends.browser.is_none());
        assert!(config.backends.serverless.is_none());
        assert!(config.captcha.is_none());
        assert!(config.random_seed.is_none());
        assert_eq!(config.api_addr(), "0.0.0.0:8001");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("POOL_MIN_SIZE", "2");
        env::set_var("POOL_MAX_SIZE", "20");
        env::set_var("SOURCER_FEEDS", "text:https://feeds.example/list.txt");
        env::set_var("BROWSER_BACKEND_URL", "https://browser.example/render");
        env::set_var("BROWSER_BACKEND_API_KEY", "secret");
        env::set_var("CAPTCHA_API_KEY", "captcha-key");
        env::set_var("CAPTCHA_SERVICE_URL", "http://solver.example/");
        env::set_var("BLOCK_INDICATORS", "go away, not today");
        env::set_var("RANDOM_SEED", "42");

        let config = Config::from_env().unwrap();

        assert_eq!(config.pool_config().min_pool_size, 2);
        assert_eq!(config.pool_config().max_pool_size, 20);
        assert_eq!(
            config.sourcer.feeds,
            vec![FeedSpec::new(FeedFormat::Text, "https://feeds.example/list.txt")]
        );
        assert_eq!(
            config.backends.browser,
            Some(BackendEndpoint {
                url: "https://browser.example/render".to_string(),
                api_key: Some("secret".to_string()),
            })
        );
        let captcha = config.captcha.as_ref().unwrap();
        assert_eq!(captcha.service_url, "http://solver.example");
        assert_eq!(
            config.fetch.block_indicators,
            Some(vec!["go away".to_string(), "not today".to_string()])
        );
        assert_eq!(config.random_seed, Some(42));
        assert!(config.classifier().block_indicators().contains(&"go away".to_string()));
    }

    #[test]
    fn test_config_rejects_inverted_pool_bounds() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("POOL_MIN_SIZE", "50");
        env::set_var("POOL_MAX_SIZE", "10");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, LadderError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_unknown_feed_format() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SOURCER_FEEDS", "xml:https://feeds.example/list.xml");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, LadderError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_bad_backend_scheme() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SERVERLESS_BACKEND_URL", "ftp://lambda.example/");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, LadderError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_invalid_port() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("API_PORT", "not-a-port");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, LadderError::InvalidConfig(_)));
    }
}
