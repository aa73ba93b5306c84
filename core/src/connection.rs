//! Transport sessions bound to one (protocol, domain, port) triple.
//!
//! # Design
//! `Connection` is the seam between the request engine and the network: it
//! sends a request head and hands back the response head, with the body read
//! in a second step so error paths can drain it and ignore failures.
//! `Connector` opens connections for redirect hops that leave the current
//! host. `HttpConnection` is the real implementation, a `ureq::Agent` whose
//! pool keeps the session to its host alive between requests. The agent
//! neither follows redirects nor turns statuses into errors; both are the
//! engine's job.

use std::io::{self, Read};

use log::trace;
use ureq::http;
use ureq::Agent;

use crate::error::FetchError;
use crate::http::{HttpRequest, HttpResponse};
use crate::url::ParsedUrl;

/// An open session to one host that can carry sequential requests.
pub trait Connection {
    /// Send `request` and return the response head. The body stays on the
    /// connection until `read_body` is called.
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, FetchError>;

    /// Read the body of the last response. Returns an empty body if there is
    /// no response pending.
    fn read_body(&mut self) -> io::Result<Vec<u8>>;
}

/// Opens connections for a parsed URL.
pub trait Connector {
    type Conn: Connection;

    fn connect(&self, target: &ParsedUrl) -> Result<Self::Conn, FetchError>;
}

/// Opens `HttpConnection`s, over TLS when the URL is https.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Conn = HttpConnection;

    fn connect(&self, target: &ParsedUrl) -> Result<HttpConnection, FetchError> {
        Ok(HttpConnection::open(target.clone()))
    }
}

/// HTTP/1.1 connection to a single host.
///
/// The socket is opened on the first request and kept in the agent's pool
/// afterwards. When the server closes it, the next request reconnects.
pub struct HttpConnection {
    target: ParsedUrl,
    agent: Agent,
    pending: Option<ureq::Body>,
}

impl HttpConnection {
    pub fn open(target: ParsedUrl) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            // Connect straight to the target; proxy variables are not read.
            .proxy(None)
            .build()
            .new_agent();
        Self {
            target,
            agent,
            pending: None,
        }
    }

    pub fn target(&self) -> &ParsedUrl {
        &self.target
    }

    /// Absolute URI for `path` on this connection's host.
    fn uri(&self, path: &str) -> String {
        format!(
            "{}://{}:{}{}",
            self.target.protocol.as_str(),
            self.target.domain,
            self.target.port,
            path
        )
    }

    /// Read whatever is left of the previous body so the pooled socket can
    /// carry the next request.
    fn discard_pending(&mut self) {
        if self.pending.is_none() {
            return;
        }
        if let Err(e) = self.read_body() {
            trace!("discarding unread body from {} failed: {e}", self.target);
        }
    }
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("target", &self.target)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

impl Connection for HttpConnection {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        self.discard_pending();

        let mut builder = http::Request::builder()
            .method(request.method.as_str())
            .uri(self.uri(&request.path));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let outgoing = builder.body(()).map_err(FetchError::InvalidRequest)?;

        trace!("{} {}", request.method, outgoing.uri());
        let response = self
            .agent
            .run(outgoing)
            .map_err(|source| FetchError::Connection {
                domain: self.target.domain.clone(),
                port: self.target.port,
                source,
            })?;

        let (parts, body) = response.into_parts();
        self.pending = Some(body);
        Ok(HttpResponse {
            status: parts.status.as_u16(),
            reason: parts.status.canonical_reason().unwrap_or_default().to_string(),
            headers: parts
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
        })
    }

    fn read_body(&mut self) -> io::Result<Vec<u8>> {
        let Some(body) = self.pending.take() else {
            return Ok(Vec::new());
        };
        let mut bytes = Vec::new();
        body.into_reader().read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}
