use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LadderError;

/// A proxy endpoint identified by its `ip:port` string.
///
/// The address string is the proxy's only identity; two values with the same
/// address are the same proxy as far as the pool is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProxyAddr(String);

impl ProxyAddr {
    /// Parse an `ip:port` string, trimming surrounding whitespace
    pub fn parse(raw: &str) -> Result<Self, LadderError> {
        let raw = raw.trim();
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| LadderError::InvalidProxyAddress(format!("missing port: {}", raw)))?;

        let ip: Ipv4Addr = host
            .parse()
            .map_err(|_| LadderError::InvalidProxyAddress(format!("invalid host: {}", raw)))?;

        let port: u16 = port
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| LadderError::InvalidProxyAddress(format!("invalid port: {}", raw)))?;

        Ok(ProxyAddr(format!("{}:{}", ip, port)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Proxy URL understood by HTTP clients (plain HTTP proxy)
    pub fn url(&self) -> String {
        format!("http://{}", self.0)
    }
}

impl fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProxyAddr {
    type Err = LadderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProxyAddr::parse(s)
    }
}

impl TryFrom<String> for ProxyAddr {
    type Error = LadderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ProxyAddr::parse(&value)
    }
}

impl From<ProxyAddr> for String {
    fn from(value: ProxyAddr) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_address() {
        let addr = ProxyAddr::parse(" 1.2.3.4:8080\n").unwrap();
        assert_eq!(addr.as_str(), "1.2.3.4:8080");
        assert_eq!(addr.url(), "http://1.2.3.4:8080");
    }

    #[test]
    fn test_parse_normalizes_leading_zero_port() {
        let addr = ProxyAddr::parse("10.0.0.1:0080").unwrap();
        assert_eq!(addr.as_str(), "10.0.0.1:80");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "",
            "1.2.3.4",
            "1.2.3:80",
            "256.1.1.1:80",
            "1.2.3.4:0",
            "1.2.3.4:70000",
            "proxy.example:3128",
            "<td>1.2.3.4</td>",
        ] {
            assert!(
                matches!(ProxyAddr::parse(raw), Err(LadderError::InvalidProxyAddress(_))),
                "expected {:?} to be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_serde_as_plain_string() {
        let addr = ProxyAddr::parse("5.6.7.8:80").unwrap();
        let json = serde_json::to_string(&vec![addr.clone()]).unwrap();
        assert_eq!(json, r#"["5.6.7.8:80"]"#);

        let back: Vec<ProxyAddr> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![addr]);

        assert!(serde_json::from_str::<ProxyAddr>(r#""nope""#).is_err());
    }
}
