use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, Echo, MAX_BYTES};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(body.to_string())
        .unwrap()
}

// --- data ---

#[tokio::test]
async fn data_returns_ok() {
    let resp = app().oneshot(request("GET", "/data", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], b"ok");
}

// --- echo ---

#[tokio::test]
async fn echo_reflects_method_body_and_headers() {
    let resp = app()
        .oneshot(request("POST", "/echo?x=1", "payload"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.path, "/echo");
    assert_eq!(echo.query.as_deref(), Some("x=1"));
    assert_eq!(echo.body, "payload");
    assert_eq!(echo.headers.get("content-type").map(String::as_str), Some("text/plain"));
}

#[tokio::test]
async fn echo_accepts_custom_methods_and_nested_paths() {
    let resp = app()
        .oneshot(request("PATCH", "/echo/items/7", "{}"))
        .await
        .unwrap();
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.method, "PATCH");
    assert_eq!(echo.path, "/echo/items/7");
}

#[tokio::test]
async fn echo_counts_requests_per_app() {
    let app = app();
    let first: Echo = body_json(app.clone().oneshot(request("GET", "/echo", "")).await.unwrap()).await;
    let second: Echo = body_json(app.oneshot(request("GET", "/echo", "")).await.unwrap()).await;
    assert_eq!(first.seq, 0);
    assert_eq!(second.seq, 1);
}

// --- bytes ---

#[tokio::test]
async fn bytes_returns_requested_size() {
    let resp = app().oneshot(request("GET", "/bytes/1000", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_bytes(resp).await;
    assert_eq!(body.len(), 1000);
    assert!(body.iter().all(|b| *b == b'x'));
}

#[tokio::test]
async fn bytes_rejects_oversized_request() {
    let uri = format!("/bytes/{}", MAX_BYTES + 1);
    let resp = app().oneshot(request("GET", &uri, "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// --- delay ---

#[tokio::test]
async fn delay_waits_then_answers() {
    let started = std::time::Instant::now();
    let resp = app().oneshot(request("GET", "/delay/50", "")).await.unwrap();
    assert!(started.elapsed() >= std::time::Duration::from_millis(50));
    assert_eq!(&body_bytes(resp).await[..], b"done");
}

// --- status ---

#[tokio::test]
async fn status_returns_requested_code() {
    let resp = app().oneshot(request("GET", "/status/418", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
}

#[tokio::test]
async fn status_rejects_invalid_code() {
    let resp = app().oneshot(request("GET", "/status/42", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- headers ---

#[tokio::test]
async fn repeated_header_is_sent_twice() {
    let resp = app().oneshot(request("GET", "/headers/repeat", "")).await.unwrap();
    let values: Vec<&str> = resp
        .headers()
        .get_all("x-repeat")
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(values, ["first", "second"]);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let resp = app().oneshot(request("GET", "/nope", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
