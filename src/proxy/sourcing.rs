//! Candidate proxy sourcing from public feeds
//!
//! Each feed is fetched and parsed inside its own failure boundary: a feed that
//! is down, slow, or has changed its markup contributes nothing and the run
//! carries on with the rest.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};

use crate::error::{LadderError, Result};
use crate::models::ProxyAddr;
use crate::random::Entropy;

const SOURCER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const DEFAULT_TABLE_ID: &str = "proxylisttable";

/// Produces candidate proxies; implemented by [`ProxySourcer`]
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Deduplicated union of every feed that answered. Never fails; an empty
    /// set means no fresh candidates are available right now.
    async fn fetch_candidates(&self) -> HashSet<ProxyAddr>;
}

/// Layout of an origin feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    /// HTML page with an `ip | port | ...` table
    Html,
    /// One `ip:port` per line
    Text,
}

impl FeedFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "html" | "table" => Some(FeedFormat::Html),
            "text" | "txt" | "plain" => Some(FeedFormat::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedFormat::Html => "html",
            FeedFormat::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSpec {
    pub format: FeedFormat,
    pub url: String,
}

impl FeedSpec {
    pub fn new(format: FeedFormat, url: impl Into<String>) -> Self {
        Self {
            format,
            url: url.into(),
        }
    }
}

/// Sourcer configuration
#[derive(Debug, Clone)]
pub struct SourcerConfig {
    pub feeds: Vec<FeedSpec>,
    /// Per-feed request timeout
    pub request_timeout: Duration,
    /// Random pause before each feed request
    pub pre_request_delay: (Duration, Duration),
    /// Random pause after each feed
    pub inter_feed_delay: (Duration, Duration),
    /// Many free feeds serve broken certificates
    pub accept_invalid_certs: bool,
}

impl Default for SourcerConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            request_timeout: Duration::from_secs(30),
            pre_request_delay: (Duration::from_secs(1), Duration::from_secs(3)),
            inter_feed_delay: (Duration::from_secs(2), Duration::from_secs(5)),
            accept_invalid_certs: true,
        }
    }
}

/// Fetches candidates from the configured feeds, one after another
pub struct ProxySourcer {
    config: SourcerConfig,
    client: reqwest::Client,
    entropy: Entropy,
}

impl ProxySourcer {
    pub fn new(config: SourcerConfig, entropy: Entropy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(SOURCER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| LadderError::Internal(format!("failed to build sourcer client: {}", e)))?;

        Ok(Self {
            config,
            client,
            entropy,
        })
    }

    async fn fetch_feed(&self, feed: &FeedSpec) -> anyhow::Result<HashSet<ProxyAddr>> {
        let (min, max) = self.config.pre_request_delay;
        tokio::time::sleep(self.entropy.duration_between(min, max)).await;

        let response = self.client.get(&feed.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {}", status.as_u16());
        }

        let body = response.text().await?;
        Ok(parse_feed(feed.format, &body))
    }
}

#[async_trait]
impl ProxySource for ProxySourcer {
    #[instrument(skip(self), fields(feeds = self.config.feeds.len()))]
    async fn fetch_candidates(&self) -> HashSet<ProxyAddr> {
        info!("Sourcing proxies from {} feeds", self.config.feeds.len());

        let mut all = HashSet::new();
        for (i, feed) in self.config.feeds.iter().enumerate() {
            match self.fetch_feed(feed).await {
                Ok(found) => {
                    info!(
                        "Parsed {} proxies from {} ({})",
                        found.len(),
                        feed.url,
                        feed.format.as_str()
                    );
                    all.extend(found);
                }
                Err(e) => {
                    warn!("Feed {} contributed nothing: {}", feed.url, e);
                }
            }

            if i + 1 < self.config.feeds.len() {
                let (min, max) = self.config.inter_feed_delay;
                tokio::time::sleep(self.entropy.duration_between(min, max)).await;
            }
        }

        info!("Total unique proxies collected: {}", all.len());
        all
    }
}

/// Parse a feed body according to its format
pub fn parse_feed(format: FeedFormat, body: &str) -> HashSet<ProxyAddr> {
    match format {
        FeedFormat::Html => {
            let from_table = parse_html_table(body, DEFAULT_TABLE_ID);
            if from_table.is_empty() {
                debug!("No proxy table rows found, falling back to line matching");
                parse_lines(body)
            } else {
                from_table
            }
        }
        FeedFormat::Text => parse_lines(body),
    }
}

/// Rows of `<table id=table_id>` (or, failing that, any table) whose first two
/// cells form an `ip:port`
pub fn parse_html_table(html: &str, table_id: &str) -> HashSet<ProxyAddr> {
    let document = Html::parse_document(html);
    let (Ok(by_id), Ok(any_table), Ok(rows), Ok(cells)) = (
        Selector::parse(&format!("table#{}", table_id)),
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("td"),
    ) else {
        return HashSet::new();
    };

    let tables: Vec<_> = match document.select(&by_id).next() {
        Some(table) => vec![table],
        None => document.select(&any_table).collect(),
    };

    let mut proxies = HashSet::new();
    for table in tables {
        for row in table.select(&rows) {
            let mut tds = row.select(&cells);
            let (Some(ip), Some(port)) = (tds.next(), tds.next()) else {
                continue;
            };
            let ip = ip.text().collect::<String>();
            let port = port.text().collect::<String>();
            if let Ok(addr) = ProxyAddr::parse(&format!("{}:{}", ip.trim(), port.trim())) {
                proxies.insert(addr);
            }
        }
    }
    proxies
}

/// Every `ip:port` token found at the start of a line
pub fn parse_lines(body: &str) -> HashSet<ProxyAddr> {
    static LINE: OnceLock<Regex> = OnceLock::new();
    let re = LINE.get_or_init(|| {
        Regex::new(r"^\s*(\d{1,3}(?:\.\d{1,3}){3}:\d{1,5})\b").expect("static regex")
    });

    body.lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| ProxyAddr::parse(&caps[1]).ok())
        .collect()
}
