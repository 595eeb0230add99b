//! Content-based block detection shared by every tier

use serde::Serialize;

const DEFAULT_CAPTCHA_INDICATORS: &[&str] = &[
    "captcha",
    "captchacharacters",
    "auth-captcha",
    "cvf-captcha",
    "captcha-image",
    "robot-check",
    "security-check",
    "enter the characters you see below",
    "type the characters you see in this image",
    "to continue, please type the characters below",
    "please verify you're not a robot",
];

const DEFAULT_BLOCK_INDICATORS: &[&str] = &[
    "blocked",
    "access denied",
    "forbidden",
    "rate limit",
    "security check",
    "unusual traffic",
    "automated queries",
    "bot detection",
    "please verify",
    "temporarily blocked",
    "suspicious activity",
];

/// What a page body says about the request that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "indicator", rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    /// Generic refusal; the matching indicator
    Blocked(String),
    /// A CAPTCHA challenge specifically
    Captcha(String),
}

impl Verdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, Verdict::Clean)
    }
}

/// Case-insensitive substring matcher over two lexicons.
///
/// CAPTCHA indicators are checked first so a challenge page is never
/// reported as a generic block.
#[derive(Debug, Clone)]
pub struct BlockClassifier {
    captcha: Vec<String>,
    block: Vec<String>,
}

impl BlockClassifier {
    pub fn new(captcha: Vec<String>, block: Vec<String>) -> Self {
        Self {
            captcha: normalize(captcha),
            block: normalize(block),
        }
    }

    pub fn captcha_indicators(&self) -> &[String] {
        &self.captcha
    }

    pub fn block_indicators(&self) -> &[String] {
        &self.block
    }

    pub fn classify(&self, content: &str) -> Verdict {
        if content.trim().is_empty() {
            return Verdict::Blocked("empty response".to_string());
        }

        let lowered = content.to_lowercase();
        if let Some(hit) = self.captcha.iter().find(|i| lowered.contains(i.as_str())) {
            return Verdict::Captcha(hit.clone());
        }
        if let Some(hit) = self.block.iter().find(|i| lowered.contains(i.as_str())) {
            return Verdict::Blocked(hit.clone());
        }
        Verdict::Clean
    }
}

impl Default for BlockClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_CAPTCHA_INDICATORS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_BLOCK_INDICATORS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

fn normalize(indicators: Vec<String>) -> Vec<String> {
    indicators
        .into_iter()
        .map(|i| i.trim().to_lowercase())
        .filter(|i| !i.is_empty())
        .collect()
}
