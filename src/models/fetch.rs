use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::ProxyAddr;

/// One rung of the escalation ladder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "backend", rename_all = "snake_case")]
pub enum Tier {
    /// Direct request routed through a pooled proxy
    Proxied,
    /// Alternate fetch backend, by name
    Backend(String),
    /// Alternate backend retried with a solved CAPTCHA
    Captcha(String),
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Proxied => f.write_str("proxied"),
            Tier::Backend(name) => write!(f, "backend:{}", name),
            Tier::Captcha(name) => write!(f, "captcha:{}", name),
        }
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Delivered,
    SoftBlocked(String),
    CaptchaDetected(String),
    HardFailed(String),
    PoolExhausted,
    CaptchaUnresolved(String),
}

impl AttemptOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, AttemptOutcome::Delivered)
    }
}

/// Ephemeral record of one attempt inside an orchestrated fetch
#[derive(Debug, Clone, Serialize)]
pub struct FetchAttempt {
    pub url: String,
    pub cycle: u32,
    pub tier: Tier,
    pub proxy: Option<ProxyAddr>,
    pub outcome: AttemptOutcome,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

/// Content delivered by the orchestrator, with the attempts it took
#[derive(Debug, Clone, Serialize)]
pub struct FetchedPage {
    pub url: String,
    #[serde(skip_serializing)]
    pub content: String,
    pub tier: Tier,
    pub attempts: Vec<FetchAttempt>,
}

impl FetchedPage {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Proxied.to_string(), "proxied");
        assert_eq!(Tier::Backend("browser".into()).to_string(), "backend:browser");
        assert_eq!(Tier::Captcha("browser".into()).to_string(), "captcha:browser");
    }

    #[test]
    fn test_attempt_serializes_elapsed_in_millis() {
        let attempt = FetchAttempt {
            url: "https://example.com".into(),
            cycle: 1,
            tier: Tier::Proxied,
            proxy: Some(ProxyAddr::parse("1.2.3.4:8080").unwrap()),
            outcome: AttemptOutcome::HardFailed("HTTP 503".into()),
            elapsed: Duration::from_millis(1250),
        };

        let value = serde_json::to_value(&attempt).unwrap();
        assert_eq!(value["elapsed_ms"], 1250);
        assert_eq!(value["proxy"], "1.2.3.4:8080");
        assert_eq!(value["tier"]["kind"], "proxied");
        assert_eq!(value["outcome"]["outcome"], "hard_failed");
    }
}
