//! Minimal synchronous HTTP/HTTPS fetching with optional JSON decoding.
//!
//! # Overview
//! `parse_url` splits a URL into protocol, domain, port and path.
//! `open_connection` binds a connection to the URL's host; `fetch` issues a
//! request over it, follows up to `MAX_REDIRECT_DEPTH` 301 redirects and
//! decodes the body using the charset declared by the server. The
//! `fetch_url*` functions do both steps for one-shot callers.
//!
//! # Design
//! - The engine (`Fetcher`) builds `HttpRequest` values and interprets
//!   `HttpResponse` heads; only a `Connection` does I/O, so the redirect loop
//!   is testable against in-memory connections.
//! - `HttpConnection` runs requests through a `ureq::Agent` that reports
//!   every status and never follows redirects itself.
//! - Relative redirects stay on the caller's connection, absolute ones open a
//!   new connection that lives for the rest of the call.
//! - Everything is blocking and single-threaded; there is no shared state
//!   between calls.

pub mod charset;
pub mod client;
pub mod connection;
pub mod error;
pub mod http;
pub mod types;
pub mod url;

pub use charset::{Encoding, DEFAULT_CHARSET};
pub use client::{
    fetch, fetch_as_json, fetch_text, fetch_url, fetch_url_as_json, fetch_url_raw, open_connection,
    Fetcher, MAX_REDIRECT_DEPTH,
};
pub use connection::{Connection, Connector, HttpConnection, TcpConnector};
pub use error::FetchError;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use types::{Body, FetchOptions, RedirectTrail, DEFAULT_USER_AGENT};
pub use url::{parse_url, ParsedUrl, Protocol};
