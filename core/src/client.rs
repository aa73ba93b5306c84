//! Request engine: issues requests, follows redirects and decodes bodies.
//!
//! # Design
//! `Fetcher` is generic over a `Connector` so the redirect loop can be driven
//! by in-memory connections in tests. The caller owns the connection passed
//! to `fetch`; connections opened for cross-host redirects belong to the call
//! and are dropped when it returns.

use log::{debug, warn};
use serde::de::DeserializeOwned;

use crate::charset::{self, Encoding, DEFAULT_CHARSET};
use crate::connection::{Connection, Connector, HttpConnection, TcpConnector};
use crate::error::FetchError;
use crate::http::{HttpRequest, HttpResponse};
use crate::types::{Body, FetchOptions, RedirectTrail};
use crate::url::parse_url;

/// Number of 301 hops followed before a fetch gives up.
pub const MAX_REDIRECT_DEPTH: usize = 15;

/// Synchronous fetch engine.
#[derive(Debug, Clone, Default)]
pub struct Fetcher<K = TcpConnector> {
    connector: K,
}

impl Fetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Connector> Fetcher<K> {
    pub fn with_connector(connector: K) -> Self {
        Self { connector }
    }

    /// Parse `url` and open a connection to its host.
    pub fn open_connection(&self, url: &str) -> Result<K::Conn, FetchError> {
        let target = parse_url(url)?;
        self.connector.connect(&target)
    }

    /// Fetch `url` over `connection`, following 301 redirects.
    ///
    /// `url` may be a path on the connection's host ("/a/b") or a full URL,
    /// of which only the path is used.
    pub fn fetch(
        &self,
        connection: &mut K::Conn,
        url: &str,
        options: &FetchOptions,
    ) -> Result<Body, FetchError> {
        let (response, bytes) = self.retrieve(connection, url, options)?;
        match &options.encoding {
            Encoding::Raw => Ok(Body::Bytes(bytes)),
            Encoding::Decode(fallback) => decode_text(&bytes, &response, fallback).map(Body::Text),
        }
    }

    /// Fetch `url` and decode the body as text. A `Raw` encoding in
    /// `options` falls back to the default charset.
    pub fn fetch_text(
        &self,
        connection: &mut K::Conn,
        url: &str,
        options: &FetchOptions,
    ) -> Result<String, FetchError> {
        let (response, bytes) = self.retrieve(connection, url, options)?;
        let fallback = match &options.encoding {
            Encoding::Raw => DEFAULT_CHARSET,
            Encoding::Decode(label) => label.as_str(),
        };
        decode_text(&bytes, &response, fallback)
    }

    /// Fetch `url` as text and deserialize it from JSON.
    pub fn fetch_as_json<T: DeserializeOwned>(
        &self,
        connection: &mut K::Conn,
        url: &str,
        options: &FetchOptions,
    ) -> Result<T, FetchError> {
        let text = self.fetch_text(connection, url, options)?;
        if text.is_empty() {
            return Err(FetchError::EmptyResponse {
                url: url.to_string(),
            });
        }
        serde_json::from_str(&text).map_err(|source| FetchError::Json { text, source })
    }

    /// Request loop shared by every fetch: returns the head and body of the
    /// final 200 response.
    fn retrieve(
        &self,
        connection: &mut K::Conn,
        url: &str,
        options: &FetchOptions,
    ) -> Result<(HttpResponse, Vec<u8>), FetchError> {
        let headers = options.request_headers();
        if let Some((name, _)) = headers
            .iter()
            .find(|(k, v)| has_line_break(k) || has_line_break(v))
        {
            return Err(FetchError::InvalidHeader { name: name.clone() });
        }

        let mut trail = RedirectTrail::new();
        let mut hopped: Option<K::Conn> = None;
        let mut current = url.to_string();

        loop {
            let conn = match hopped.as_mut() {
                Some(conn) => conn,
                None => &mut *connection,
            };
            let request = HttpRequest {
                method: options.method.clone(),
                path: request_target(&current)?,
                headers: headers.clone(),
            };
            let response = conn.send(&request)?;
            debug!(
                "{} {} -> {} {}",
                request.method, current, response.status, response.reason
            );

            match response.status {
                200 => {
                    if !trail.is_empty() {
                        debug!("{} resolved after {} redirects", url, trail.len());
                    }
                    let bytes = conn.read_body()?;
                    return Ok((response, bytes));
                }
                301 => {
                    trail.push(current.as_str());
                    if trail.len() > MAX_REDIRECT_DEPTH {
                        warn!(
                            "giving up on {} after {} redirects: {}",
                            url,
                            trail.len(),
                            trail.urls().join(" -> ")
                        );
                        return Err(FetchError::TooManyRedirects {
                            trail: trail.into_urls(),
                        });
                    }
                    drain(conn);
                    let location = response
                        .header("Location")
                        .ok_or_else(|| FetchError::MissingLocation {
                            url: current.clone(),
                        })?
                        .to_string();
                    debug!("following redirect {} -> {}", current, location);
                    if !location.starts_with('/') {
                        hopped = Some(self.open_connection(&location)?);
                    }
                    current = location;
                }
                status => {
                    drain(conn);
                    return Err(FetchError::HttpStatus {
                        url: current,
                        status,
                        reason: response.reason,
                    });
                }
            }
        }
    }

    /// Open a fresh connection to `url` and fetch it.
    pub fn fetch_url(&self, url: &str, options: &FetchOptions) -> Result<Body, FetchError> {
        let mut connection = self.open_connection(url)?;
        self.fetch(&mut connection, url, options)
    }

    /// Open a fresh connection to `url` and return the body bytes undecoded.
    pub fn fetch_url_raw(&self, url: &str, options: &FetchOptions) -> Result<Vec<u8>, FetchError> {
        let options = options.clone().with_encoding(Encoding::Raw);
        self.fetch_url(url, &options).map(Body::into_bytes)
    }

    /// Open a fresh connection to `url` and deserialize its JSON body.
    pub fn fetch_url_as_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<T, FetchError> {
        let mut connection = self.open_connection(url)?;
        self.fetch_as_json(&mut connection, url, options)
    }
}

/// Path to request: `url` itself when it is already a path, otherwise the
/// path component of the full URL.
fn request_target(url: &str) -> Result<String, FetchError> {
    if url.starts_with('/') {
        Ok(url.to_string())
    } else {
        Ok(parse_url(url)?.relative_path)
    }
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\r', '\n'])
}

/// Read and discard the pending body. Failures are expected when the server
/// already closed the stream and are ignored.
fn drain<C: Connection>(conn: &mut C) {
    if let Err(e) = conn.read_body() {
        debug!("ignoring failure while draining response body: {e}");
    }
}

fn decode_text(bytes: &[u8], response: &HttpResponse, fallback: &str) -> Result<String, FetchError> {
    let charset = charset::resolve_charset(response.content_type(), fallback);
    charset::decode(bytes, &charset)
}

/// Parse `url` and open a connection to its host.
pub fn open_connection(url: &str) -> Result<HttpConnection, FetchError> {
    Fetcher::new().open_connection(url)
}

/// Fetch `url` over `connection`, following 301 redirects.
pub fn fetch(
    connection: &mut HttpConnection,
    url: &str,
    options: &FetchOptions,
) -> Result<Body, FetchError> {
    debug!("fetching {} over {}", url, connection.target());
    Fetcher::new().fetch(connection, url, options)
}

/// Fetch `url` over `connection` and decode the body as text.
pub fn fetch_text(
    connection: &mut HttpConnection,
    url: &str,
    options: &FetchOptions,
) -> Result<String, FetchError> {
    Fetcher::new().fetch_text(connection, url, options)
}

/// Fetch `url` over `connection` and deserialize its JSON body.
pub fn fetch_as_json<T: DeserializeOwned>(
    connection: &mut HttpConnection,
    url: &str,
    options: &FetchOptions,
) -> Result<T, FetchError> {
    Fetcher::new().fetch_as_json(connection, url, options)
}

/// Fetch `url` over a new connection.
pub fn fetch_url(url: &str, options: &FetchOptions) -> Result<Body, FetchError> {
    Fetcher::new().fetch_url(url, options)
}

/// Fetch `url` over a new connection, returning the body bytes undecoded.
pub fn fetch_url_raw(url: &str, options: &FetchOptions) -> Result<Vec<u8>, FetchError> {
    Fetcher::new().fetch_url_raw(url, options)
}

/// Fetch `url` over a new connection and deserialize its JSON body.
pub fn fetch_url_as_json<T: DeserializeOwned>(
    url: &str,
    options: &FetchOptions,
) -> Result<T, FetchError> {
    Fetcher::new().fetch_url_as_json(url, options)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::io;
    use std::rc::Rc;

    use super::*;
    use crate::http::HttpMethod;
    use crate::url::ParsedUrl;

    /// Canned reply: status, reason, headers, body (`None` fails the read).
    type Reply = (u16, &'static str, Vec<(&'static str, &'static str)>, Option<Vec<u8>>);

    #[derive(Default)]
    struct Script {
        replies: HashMap<String, VecDeque<Reply>>,
        /// (host, request) in the order they were sent.
        sent: Vec<(String, HttpRequest)>,
        opened: Vec<String>,
    }

    struct ScriptedConnection {
        host: String,
        script: Rc<RefCell<Script>>,
        body: Option<Option<Vec<u8>>>,
    }

    impl Connection for ScriptedConnection {
        fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
            let mut script = self.script.borrow_mut();
            script.sent.push((self.host.clone(), request.clone()));
            let (status, reason, headers, body) = script
                .replies
                .get_mut(&self.host)
                .and_then(VecDeque::pop_front)
                .expect("no scripted reply left");
            self.body = Some(body);
            Ok(HttpResponse {
                status,
                reason: reason.to_string(),
                headers: headers
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
        }

        fn read_body(&mut self) -> io::Result<Vec<u8>> {
            match self.body.take() {
                Some(Some(body)) => Ok(body),
                Some(None) => Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone")),
                None => Ok(Vec::new()),
            }
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedConnector {
        script: Rc<RefCell<Script>>,
    }

    impl ScriptedConnector {
        fn reply(&self, host: &str, reply: Reply) -> &Self {
            self.script
                .borrow_mut()
                .replies
                .entry(host.to_string())
                .or_default()
                .push_back(reply);
            self
        }

        fn sent(&self) -> Vec<(String, HttpRequest)> {
            self.script.borrow().sent.clone()
        }

        fn opened(&self) -> Vec<String> {
            self.script.borrow().opened.clone()
        }
    }

    impl Connector for ScriptedConnector {
        type Conn = ScriptedConnection;

        fn connect(&self, target: &ParsedUrl) -> Result<ScriptedConnection, FetchError> {
            self.script.borrow_mut().opened.push(target.domain.clone());
            Ok(ScriptedConnection {
                host: target.domain.clone(),
                script: Rc::clone(&self.script),
                body: None,
            })
        }
    }

    fn ok(body: &[u8], content_type: &'static str) -> Reply {
        (200, "OK", vec![("Content-Type", content_type)], Some(body.to_vec()))
    }

    fn moved(location: &'static str) -> Reply {
        (301, "Moved Permanently", vec![("Location", location)], Some(Vec::new()))
    }

    fn fetcher() -> (ScriptedConnector, Fetcher<ScriptedConnector>) {
        let connector = ScriptedConnector::default();
        (connector.clone(), Fetcher::with_connector(connector))
    }

    #[test]
    fn full_url_is_requested_by_path() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"hello", "text/plain"));
        let mut conn = fetcher.open_connection("http://example.com/index.html").unwrap();

        let body = fetcher
            .fetch(&mut conn, "http://example.com/index.html", &FetchOptions::new())
            .unwrap();

        assert_eq!(body, Body::Text("hello".to_string()));
        let sent = script.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.path, "/index.html");
        assert_eq!(sent[0].1.method, HttpMethod::Get);
    }

    #[test]
    fn relative_redirect_reuses_connection() {
        let (script, fetcher) = fetcher();
        script
            .reply("example.com", moved("/new"))
            .reply("example.com", ok(b"moved here", "text/plain"));
        let mut conn = fetcher.open_connection("example.com").unwrap();

        let body = fetcher.fetch(&mut conn, "/old", &FetchOptions::new()).unwrap();

        assert_eq!(body.as_text(), Some("moved here"));
        assert_eq!(script.opened(), vec!["example.com".to_string()]);
        let paths: Vec<_> = script.sent().into_iter().map(|(_, r)| r.path).collect();
        assert_eq!(paths, vec!["/old", "/new"]);
    }

    #[test]
    fn absolute_redirect_opens_new_connection() {
        let (script, fetcher) = fetcher();
        script
            .reply("a.example", moved("https://b.example/landing"))
            .reply("b.example", moved("/final"))
            .reply("b.example", ok(b"{}", "application/json"));
        let mut conn = fetcher.open_connection("a.example").unwrap();
        let options = FetchOptions::new().with_header("X-Token", "t");

        let body = fetcher.fetch(&mut conn, "/start", &options).unwrap();

        assert_eq!(body.as_text(), Some("{}"));
        assert_eq!(
            script.opened(),
            vec!["a.example".to_string(), "b.example".to_string()]
        );
        let sent = script.sent();
        let hops: Vec<_> = sent.iter().map(|(h, r)| (h.as_str(), r.path.as_str())).collect();
        assert_eq!(
            hops,
            vec![("a.example", "/start"), ("b.example", "/landing"), ("b.example", "/final")]
        );
        assert!(sent.iter().all(|(_, r)| r.headers == sent[0].1.headers));
    }

    #[test]
    fn redirect_chain_is_bounded() {
        let (script, fetcher) = fetcher();
        for _ in 0..=MAX_REDIRECT_DEPTH {
            script.reply("example.com", moved("/loop"));
        }
        let mut conn = fetcher.open_connection("example.com").unwrap();

        let err = fetcher.fetch(&mut conn, "/start", &FetchOptions::new()).unwrap_err();

        match err {
            FetchError::TooManyRedirects { trail } => {
                assert_eq!(trail.len(), MAX_REDIRECT_DEPTH + 1);
                assert_eq!(trail[0], "/start");
                assert!(trail[1..].iter().all(|u| u == "/loop"));
            }
            other => panic!("expected TooManyRedirects, got {other:?}"),
        }
        assert_eq!(script.sent().len(), MAX_REDIRECT_DEPTH + 1);
    }

    #[test]
    fn chain_at_the_limit_succeeds() {
        let (script, fetcher) = fetcher();
        for _ in 0..MAX_REDIRECT_DEPTH {
            script.reply("example.com", moved("/next"));
        }
        script.reply("example.com", ok(b"end", "text/plain"));
        let mut conn = fetcher.open_connection("example.com").unwrap();

        let body = fetcher.fetch(&mut conn, "/", &FetchOptions::new()).unwrap();
        assert_eq!(body.as_text(), Some("end"));
    }

    #[test]
    fn not_found_is_an_http_status_error_without_retry() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", (404, "Not Found", vec![], None));
        let mut conn = fetcher.open_connection("example.com").unwrap();

        let err = fetcher.fetch(&mut conn, "/missing", &FetchOptions::new()).unwrap_err();

        assert!(matches!(
            &err,
            FetchError::HttpStatus { status: 404, reason, url } if reason == "Not Found" && url == "/missing"
        ));
        assert_eq!(script.sent().len(), 1);
    }

    #[test]
    fn redirect_drain_failure_is_ignored() {
        let (script, fetcher) = fetcher();
        script
            .reply("example.com", (301, "Moved", vec![("Location", "/b")], None))
            .reply("example.com", ok(b"b", "text/plain"));
        let mut conn = fetcher.open_connection("example.com").unwrap();

        let body = fetcher.fetch(&mut conn, "/a", &FetchOptions::new()).unwrap();
        assert_eq!(body.as_text(), Some("b"));
    }

    #[test]
    fn redirect_without_location_fails() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", (301, "Moved", vec![], Some(Vec::new())));
        let mut conn = fetcher.open_connection("example.com").unwrap();

        let err = fetcher.fetch(&mut conn, "/a", &FetchOptions::new()).unwrap_err();
        assert!(matches!(err, FetchError::MissingLocation { url } if url == "/a"));
    }

    #[test]
    fn declared_charset_overrides_caller_default() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"caf\xe9", "text/plain; charset=ISO-8859-1"));
        let mut conn = fetcher.open_connection("example.com").unwrap();
        let options = FetchOptions::new().with_encoding(Encoding::decode("utf-8"));

        let body = fetcher.fetch(&mut conn, "/", &options).unwrap();
        assert_eq!(body.as_text(), Some("caf\u{e9}"));
    }

    #[test]
    fn caller_charset_used_when_none_declared() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"caf\xe9", "text/plain"));
        let mut conn = fetcher.open_connection("example.com").unwrap();
        let options = FetchOptions::new().with_encoding(Encoding::decode("latin1"));

        let body = fetcher.fetch(&mut conn, "/", &options).unwrap();
        assert_eq!(body.as_text(), Some("caf\u{e9}"));
    }

    #[test]
    fn undecodable_body_fails() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"caf\xe9", "text/plain"));
        let mut conn = fetcher.open_connection("example.com").unwrap();

        let err = fetcher.fetch(&mut conn, "/", &FetchOptions::new()).unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[test]
    fn raw_encoding_skips_decoding() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"caf\xe9", "text/plain; charset=utf-8"));
        let mut conn = fetcher.open_connection("example.com").unwrap();
        let options = FetchOptions::new().with_encoding(Encoding::Raw);

        let body = fetcher.fetch(&mut conn, "/", &options).unwrap();
        assert_eq!(body, Body::Bytes(b"caf\xe9".to_vec()));
    }

    #[test]
    fn fetch_url_raw_returns_bytes_unchanged() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"\xff\x00\xfe", "text/plain; charset=utf-8"));

        let bytes = fetcher
            .fetch_url_raw("example.com/blob", &FetchOptions::new())
            .unwrap();
        assert_eq!(bytes, b"\xff\x00\xfe");
    }

    #[test]
    fn json_empty_object() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"{}", "application/json"));

        let value: serde_json::Value = fetcher
            .fetch_url_as_json("example.com/data", &FetchOptions::new())
            .unwrap();
        assert_eq!(value, serde_json::json!({}));
    }

    #[test]
    fn json_empty_body_fails() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"", "application/json"));

        let err = fetcher
            .fetch_url_as_json::<serde_json::Value>("example.com/data", &FetchOptions::new())
            .unwrap_err();
        assert!(matches!(err, FetchError::EmptyResponse { url } if url == "example.com/data"));
    }

    #[test]
    fn json_invalid_body_fails_with_text() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"not json", "application/json"));

        let err = fetcher
            .fetch_url_as_json::<serde_json::Value>("example.com/data", &FetchOptions::new())
            .unwrap_err();
        assert!(matches!(err, FetchError::Json { text, .. } if text == "not json"));
    }

    #[test]
    fn json_ignores_raw_encoding() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(br#"{"n":1}"#, "application/json"));
        let options = FetchOptions::new().with_encoding(Encoding::Raw);

        let value: serde_json::Value = fetcher
            .fetch_url_as_json("example.com/data", &options)
            .unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn fetch_text_decodes_even_with_raw_encoding() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok("na\u{ef}ve".as_bytes(), "text/plain"));
        let mut conn = fetcher.open_connection("example.com").unwrap();
        let options = FetchOptions::new().with_encoding(Encoding::Raw);

        let text = fetcher.fetch_text(&mut conn, "/", &options).unwrap();
        assert_eq!(text, "na\u{ef}ve");
    }

    #[test]
    fn custom_method_is_sent_verbatim() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"", "text/plain"));
        let options = FetchOptions::new().with_method("REPORT".parse().unwrap());

        fetcher.fetch_url("example.com/cal", &options).unwrap();

        let sent = script.sent();
        assert_eq!(sent[0].1.method.as_str(), "REPORT");
    }

    #[test]
    fn method_and_headers_are_sent() {
        let (script, fetcher) = fetcher();
        script.reply("example.com", ok(b"", "text/plain"));
        let options = FetchOptions::new()
            .with_method(HttpMethod::Delete)
            .with_user_agent("agent/9")
            .with_header("Accept", "*/*");

        fetcher.fetch_url("example.com/thing", &options).unwrap();

        let sent = script.sent();
        let (_, request) = &sent[0];
        assert_eq!(request.method, HttpMethod::Delete);
        assert_eq!(
            request.headers,
            vec![
                ("Accept".to_string(), "*/*".to_string()),
                ("User-agent".to_string(), "agent/9".to_string()),
            ]
        );
    }

    #[test]
    fn header_injection_is_rejected_before_sending() {
        let (script, fetcher) = fetcher();
        let options = FetchOptions::new().with_header("X-Evil", "a\r\nHost: other");

        let err = fetcher.fetch_url("example.com", &options).unwrap_err();
        assert!(matches!(err, FetchError::InvalidHeader { name } if name == "X-Evil"));
        assert!(script.sent().is_empty());
    }

    #[test]
    fn malformed_url_fails_to_open() {
        let (_, fetcher) = fetcher();
        assert!(matches!(
            fetcher.open_connection("not a url"),
            Err(FetchError::Parse { .. })
        ));
    }
}
