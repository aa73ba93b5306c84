//! Error types for the fetch client.
//!
//! # Design
//! Every failure surfaces immediately to the caller. The only swallowed
//! failures are body drains after a redirect or a non-200 status, which never
//! produce a `FetchError` at all.

use std::io;

use thiserror::Error;

/// Errors returned by URL parsing, connection setup and fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL does not match `[http[s]://]domain[:port][/path]`.
    #[error("cannot parse url: \"{url}\"")]
    Parse { url: String },

    /// The request to `domain:port` failed in the transport (connect, TLS,
    /// or reading the response head).
    #[error("request to {domain}:{port} failed: {source}")]
    Connection {
        domain: String,
        port: u16,
        #[source]
        source: ureq::Error,
    },

    /// Reading a response body failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The request could not be assembled (target or header not valid HTTP).
    #[error("invalid request: {0}")]
    InvalidRequest(#[source] ureq::http::Error),

    /// A request header name or value contains a line break.
    #[error("invalid request header {name:?}")]
    InvalidHeader { name: String },

    /// The method name is not a valid HTTP token.
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    /// The server answered with a status other than 200 or 301.
    #[error("Got non-200 response from upstream server [{url}]: ({status}) {reason}")]
    HttpStatus {
        url: String,
        status: u16,
        reason: String,
    },

    /// A 301 response carried no `Location` header.
    #[error("redirect from {url} has no Location header")]
    MissingLocation { url: String },

    /// The redirect chain exceeded `MAX_REDIRECT_DEPTH` hops.
    #[error("too many redirects ({} hops): {}", trail.len(), trail.join(" -> "))]
    TooManyRedirects { trail: Vec<String> },

    /// JSON was expected but the body was empty.
    #[error("server at \"{url}\" returned no data")]
    EmptyResponse { url: String },

    /// The body is not valid JSON. `text` holds the decoded body.
    #[error("could not parse data from server as JSON: {source}\n{text}")]
    Json {
        text: String,
        #[source]
        source: serde_json::Error,
    },

    /// The body bytes are not valid in the resolved charset.
    #[error("response body is not valid {charset}")]
    Decode { charset: String },

    /// The resolved charset label names no known encoding.
    #[error("unknown charset {charset:?}")]
    UnknownCharset { charset: String },
}

impl FetchError {
    /// HTTP status code carried by an `HttpStatus` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
