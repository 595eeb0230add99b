//! Randomized desktop-browser request headers, one profile per attempt

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::random::Entropy;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

const LOCALES: &[&str] = &["en-US", "en-GB", "en-IN", "en-CA", "en-AU"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderProfile {
    pub user_agent: &'static str,
    pub locale: &'static str,
}

impl HeaderProfile {
    pub fn random(entropy: &Entropy) -> Self {
        Self {
            user_agent: entropy.choose(USER_AGENTS).copied().unwrap_or(USER_AGENTS[0]),
            locale: entropy.choose(LOCALES).copied().unwrap_or(LOCALES[0]),
        }
    }

    fn is_chromium(&self) -> bool {
        self.user_agent.contains("Chrome/")
    }

    pub fn accept_language(&self) -> String {
        let lang = self.locale.split('-').next().unwrap_or("en");
        format!("{},{};q=0.9", self.locale, lang)
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        };

        put("user-agent", self.user_agent);
        put(
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        );
        put("accept-language", &self.accept_language());
        put("accept-encoding", "gzip");
        put("dnt", "1");
        put("upgrade-insecure-requests", "1");
        put("sec-fetch-dest", "document");
        put("sec-fetch-mode", "navigate");
        put("sec-fetch-site", "none");
        put("sec-fetch-user", "?1");
        put("cache-control", "max-age=0");

        if self.is_chromium() {
            put(
                "sec-ch-ua",
                "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
            );
            put("sec-ch-ua-mobile", "?0");
            let platform = if self.user_agent.contains("Windows") {
                "\"Windows\""
            } else if self.user_agent.contains("Macintosh") {
                "\"macOS\""
            } else {
                "\"Linux\""
            };
            put("sec-ch-ua-platform", platform);
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_draws_from_pools() {
        let entropy = Entropy::seeded(9);
        for _ in 0..20 {
            let profile = HeaderProfile::random(&entropy);
            assert!(USER_AGENTS.contains(&profile.user_agent));
            assert!(LOCALES.contains(&profile.locale));
        }
    }

    #[test]
    fn test_chromium_profile_headers() {
        let profile = HeaderProfile {
            user_agent: USER_AGENTS[0],
            locale: "en-GB",
        };
        let headers = profile.headers();

        assert_eq!(headers["accept-language"], "en-GB,en;q=0.9");
        assert_eq!(headers["sec-ch-ua-platform"], "\"Windows\"");
        assert_eq!(headers["sec-fetch-mode"], "navigate");
    }

    #[test]
    fn test_firefox_profile_omits_client_hints() {
        let profile = HeaderProfile {
            user_agent: USER_AGENTS[3],
            locale: "en-US",
        };
        let headers = profile.headers();

        assert!(headers.get("sec-ch-ua").is_none());
        assert_eq!(headers["user-agent"], USER_AGENTS[3]);
    }
}
