use std::collections::BTreeMap;

use axum::{
    body::Body,
    extract::Path,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

pub const LATIN1_BODY: &[u8] = b"caf\xe9";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub tags: Vec<String>,
}

pub fn app() -> Router {
    Router::new()
        .route("/text", get(text))
        .route("/plain", get(plain))
        .route("/latin1", get(latin1))
        .route("/chunked", get(chunked))
        .route("/json/object", get(json_object))
        .route("/json/empty-object", get(json_empty_object))
        .route("/json/empty", get(json_empty))
        .route("/json/invalid", get(json_invalid))
        .route("/redirect/{n}", get(redirect))
        .route("/loop", get(redirect_loop))
        .route("/hop/{port}", get(hop))
        .route("/headers", get(echo_headers))
        .route("/method", any(echo_method))
        .route("/teapot", get(teapot))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// `Location` for hop `n` of a `/redirect/{n}` chain, `None` at the end.
pub fn redirect_location(n: u32) -> Option<String> {
    n.checked_sub(1).map(|next| format!("/redirect/{next}"))
}

fn moved(location: String) -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

async fn text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "hello, world",
    )
}

async fn plain() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "na\u{ef}ve")
}

async fn latin1() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=ISO-8859-1")],
        LATIN1_BODY.to_vec(),
    )
}

async fn chunked() -> impl IntoResponse {
    let parts = stream::iter([Ok::<_, std::io::Error>("chunk one, "), Ok("chunk two")]);
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(parts),
    )
}

async fn json_object() -> Json<Project> {
    Json(Project {
        name: "simplefetch".to_string(),
        tags: vec!["a".to_string(), "b".to_string()],
    })
}

async fn json_empty_object() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], "{}")
}

async fn json_empty() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], "")
}

async fn json_invalid() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], "not json")
}

async fn redirect(Path(n): Path<u32>) -> Response {
    match redirect_location(n) {
        Some(location) => moved(location),
        None => "done".into_response(),
    }
}

async fn redirect_loop() -> Response {
    moved("/loop".to_string())
}

async fn hop(Path(port): Path<u16>) -> Response {
    moved(format!("http://127.0.0.1:{port}/text"))
}

async fn echo_headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    Json(
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
    )
}

async fn echo_method(method: Method) -> String {
    method.to_string()
}

async fn teapot() -> impl IntoResponse {
    (StatusCode::IM_A_TEAPOT, "short and stout")
}
