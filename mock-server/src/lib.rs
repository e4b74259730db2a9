//! HTTP fixture server for end-to-end transport tests.
//!
//! Routes:
//! - `GET /data` returns `ok`
//! - `ANY /echo`, `ANY /echo/{*rest}` return the request as JSON (`Echo`)
//! - `GET /bytes/{n}` returns `n` bytes of `x`
//! - `GET /delay/{ms}` sleeps, then returns `done`
//! - `GET /status/{code}` returns an empty response with that status
//! - `GET /headers/repeat` sends `x-repeat` twice

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// Largest body `/bytes/{n}` will produce.
pub const MAX_BYTES: usize = 16 * 1024 * 1024;

/// What `/echo` saw.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Lowercase names; a repeated header keeps its last value.
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Position of this request among all echo requests served.
    pub seq: u64,
}

#[derive(Clone, Default)]
pub struct Fixture {
    echoed: Arc<AtomicU64>,
}

pub fn app() -> Router {
    Router::new()
        .route("/data", get(data))
        .route("/echo", any(echo))
        .route("/echo/{*rest}", any(echo))
        .route("/bytes/{n}", get(sized_body))
        .route("/delay/{ms}", get(delay))
        .route("/status/{code}", get(status))
        .route("/headers/repeat", get(repeat_header))
        .with_state(Fixture::default())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn data() -> &'static str {
    "ok"
}

async fn echo(
    State(fixture): State<Fixture>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    let seq = fixture.echoed.fetch_add(1, Ordering::SeqCst);
    tracing::debug!(%method, %uri, bytes = body.len(), seq, "echo");
    Json(Echo {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
        seq,
    })
}

async fn sized_body(Path(n): Path<usize>) -> Result<Vec<u8>, StatusCode> {
    if n > MAX_BYTES {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    Ok(vec![b'x'; n])
}

async fn delay(Path(ms): Path<u64>) -> &'static str {
    tracing::debug!(ms, "delaying response");
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn status(Path(code): Path<u16>) -> Result<StatusCode, StatusCode> {
    StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn repeat_header() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.append("x-repeat", HeaderValue::from_static("first"));
    headers.append("x-repeat", HeaderValue::from_static("second"));
    (headers, "repeated")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_serializes_to_json() {
        let echo = Echo {
            method: "POST".to_string(),
            path: "/echo".to_string(),
            body: "hi".to_string(),
            ..Echo::default()
        };
        let json = serde_json::to_value(&echo).unwrap();
        assert_eq!(json["method"], "POST");
        assert_eq!(json["path"], "/echo");
        assert_eq!(json["query"], serde_json::Value::Null);
        assert_eq!(json["body"], "hi");
    }

    #[test]
    fn echo_roundtrips_through_json() {
        let mut echo = Echo {
            method: "PUT".to_string(),
            seq: 3,
            ..Echo::default()
        };
        echo.headers.insert("accept".to_string(), "*/*".to_string());
        let back: Echo = serde_json::from_str(&serde_json::to_string(&echo).unwrap()).unwrap();
        assert_eq!(back, echo);
    }
}
