//! Broker addressing.
//!
//! A component is built from either a broker URL (`ws://host:port/cid`) or a
//! bare identity string, which addresses the default local broker.

use std::fmt;

use protocol::{RembusError, Result};
use url::Url;

/// Host used when only an identity is given.
pub const DEFAULT_HOST: &str = "localhost";

/// Port used when only an identity is given.
pub const DEFAULT_PORT: u16 = 8000;

/// Transport scheme; only WebSocket schemes are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain WebSocket.
    Ws,
    /// WebSocket over TLS.
    Wss,
}

impl Scheme {
    /// Scheme name as written in URLs.
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a component connects and which identity it claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Component identity; `None` for anonymous components.
    pub cid: Option<String>,
}

impl Endpoint {
    /// Parses a broker URL or a bare identity string.
    ///
    /// An empty string yields an anonymous component on the default broker.
    /// Any scheme other than `ws` or `wss` is a validation error.
    pub fn parse(input: &str) -> Result<Self> {
        let url = match Url::parse(input) {
            Ok(url) => url,
            Err(_) => return Ok(Self::for_identity(input)),
        };

        let scheme = match url.scheme() {
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => {
                return Err(RembusError::Validation(format!(
                    "wrong url {}: invalid protocol {}",
                    input, other
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RembusError::Validation(format!("wrong url {}: missing host", input)))?
            .to_string();

        let port = url.port_or_known_default().unwrap_or(DEFAULT_PORT);

        let cid = url
            .path()
            .trim_start_matches('/')
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            scheme,
            host,
            port,
            cid: (!cid.is_empty()).then_some(cid),
        })
    }

    /// The default local broker with the given identity.
    pub fn for_identity(cid: &str) -> Self {
        Self {
            scheme: Scheme::Ws,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cid: (!cid.is_empty()).then(|| cid.to_string()),
        }
    }

    /// Transport URL without the identity path.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_with_cid() {
        let ep = Endpoint::parse("ws://myhost:8000/mycid").unwrap();
        assert_eq!(ep.scheme, Scheme::Ws);
        assert_eq!(ep.host, "myhost");
        assert_eq!(ep.port, 8000);
        assert_eq!(ep.cid.as_deref(), Some("mycid"));
        assert_eq!(ep.url(), "ws://myhost:8000");
    }

    #[test]
    fn test_parse_url_without_cid() {
        let ep = Endpoint::parse("ws://myhost:8000").unwrap();
        assert_eq!(ep.cid, None);
        let ep = Endpoint::parse("ws://myhost:8000/").unwrap();
        assert_eq!(ep.cid, None);
    }

    #[test]
    fn test_parse_wss_default_port() {
        let ep = Endpoint::parse("wss://broker.example.com/c1").unwrap();
        assert_eq!(ep.scheme, Scheme::Wss);
        assert_eq!(ep.port, 443);
        assert_eq!(ep.url(), "wss://broker.example.com:443");
    }

    #[test]
    fn test_parse_rejects_unsupported_scheme() {
        let err = Endpoint::parse("zss://myhost:8000/mycid").unwrap_err();
        assert!(matches!(err, RembusError::Validation(_)));
        assert!(err.to_string().contains("invalid protocol zss"));

        assert!(Endpoint::parse("http://myhost:8000").is_err());
    }

    #[test]
    fn test_bare_identity_uses_default_broker() {
        let ep = Endpoint::parse("mycomponent").unwrap();
        assert_eq!(ep.scheme, Scheme::Ws);
        assert_eq!(ep.host, DEFAULT_HOST);
        assert_eq!(ep.port, DEFAULT_PORT);
        assert_eq!(ep.cid.as_deref(), Some("mycomponent"));
    }

    #[test]
    fn test_empty_string_is_anonymous() {
        let ep = Endpoint::parse("").unwrap();
        assert_eq!(ep.cid, None);
        assert_eq!(ep.url(), "ws://localhost:8000");
    }
}
