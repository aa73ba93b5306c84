//! Per-call options and fetch results.

use crate::charset::Encoding;
use crate::http::HttpMethod;

/// User agent sent when the caller does not supply one.
pub const DEFAULT_USER_AGENT: &str = concat!("simplefetch/", env!("CARGO_PKG_VERSION"));

/// Options for one fetch call. Unchanged across redirect hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub method: HttpMethod,
    pub user_agent: String,
    pub encoding: Encoding,
    /// Extra request headers, sent in order. A `User-Agent` entry here
    /// replaces `user_agent`.
    pub headers: Vec<(String, String)>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            encoding: Encoding::default(),
            headers: Vec::new(),
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Caller headers followed by the default `User-agent`, unless the
    /// caller already set one.
    pub(crate) fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("User-Agent")) {
            headers.push(("User-agent".to_string(), self.user_agent.clone()));
        }
        headers
    }
}

/// Body of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Bytes(Vec<u8>),
}

impl Body {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            Body::Bytes(_) => None,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Body::Text(text) => text.into_bytes(),
            Body::Bytes(bytes) => bytes,
        }
    }
}

/// URLs visited by one top-level fetch, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectTrail {
    urls: Vec<String>,
}

impl RedirectTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, url: impl Into<String>) {
        self.urls.push(url.into());
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn into_urls(self) -> Vec<String> {
        self.urls
    }
}
