//! URL decomposition into protocol, domain, port and relative path.
//!
//! Only the narrow grammar `[http[s]://]domain[:port][/path]` is accepted.
//! Omitted components are filled in during parsing, so a `ParsedUrl` never
//! has optional fields.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<protocol>https?://)?(?P<domain>[A-Za-z0-9._-]+)(?P<port>:[0-9]+)?(?P<path>/.*)?$",
    )
    .expect("URL pattern is valid")
});

/// Transport protocol of a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully populated URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUrl {
    pub protocol: Protocol,
    pub domain: String,
    pub port: u16,
    pub relative_path: String,
}

impl fmt::Display for ParsedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.protocol, self.domain, self.port, self.relative_path
        )
    }
}

impl FromStr for ParsedUrl {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_url(s)
    }
}

/// Parse `url`, filling in defaults for the scheme (http), the port (80 or
/// 443) and the path ("/").
pub fn parse_url(url: &str) -> Result<ParsedUrl, FetchError> {
    let invalid = || FetchError::Parse {
        url: url.to_string(),
    };
    let caps = URL_PATTERN.captures(url).ok_or_else(invalid)?;

    let protocol = match caps.name("protocol").map(|m| m.as_str()) {
        Some("https://") => Protocol::Https,
        _ => Protocol::Http,
    };

    let port = match caps.name("port") {
        Some(m) => m.as_str()[1..]
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(invalid)?,
        None => protocol.default_port(),
    };

    let relative_path = caps
        .name("path")
        .map_or_else(|| "/".to_string(), |m| m.as_str().to_string());

    Ok(ParsedUrl {
        protocol,
        domain: caps["domain"].to_string(),
        port,
        relative_path,
    })
}
