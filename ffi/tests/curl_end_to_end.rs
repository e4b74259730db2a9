//! libcurl transfers against the live fixture server.
//!
//! # Design
//! One fixture server is started per test binary on a random port and shared
//! by every test. The fixture speaks cleartext HTTP/1.1, so every transport
//! here asks libcurl for HTTP/1.1; the protocol-independent paths (option
//! mapping, callbacks, handle lifetime) are the same ones HTTP/3 uses.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use h3bridge_core::engine::EngineCode;
use h3bridge_core::{
    HttpVersion, Method, Request, ResolveOverride, Response, TransportConfig, TransportError,
};
use mock_server::Echo;

fn server() -> SocketAddr {
    static ADDR: OnceLock<SocketAddr> = OnceLock::new();
    *ADDR.get_or_init(|| {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();

        thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
                mock_server::run(listener).await
            })
            .unwrap();
        });
        addr
    })
}

fn url(path: &str) -> String {
    format!("http://{}{path}", server())
}

fn config() -> TransportConfig {
    TransportConfig::default()
        .with_http_version(HttpVersion::Http11)
        .with_timeouts(Duration::from_secs(2), Duration::from_secs(10))
}

fn echo(response: &Response) -> Echo {
    serde_json::from_slice(&response.body).unwrap()
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

#[test]
fn get_data() {
    let response = h3bridge_curl::transport(config())
        .execute(Request::get(url("/data")).header("Accept", "*/*"))
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "ok");
    assert_eq!(response.protocol, "HTTP/1.1");
    assert_eq!(response.headers.get("content-length"), Some("2"));
}

#[test]
fn post_sends_body_without_expect() {
    let response = h3bridge_curl::transport(config())
        .execute(
            Request::new(Method::Post, url("/echo"))
                .header("Content-Type", "application/json")
                .body_bytes(r#"{"title":"Buy milk"}"#),
        )
        .unwrap();
    let echo = echo(&response);
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.body, r#"{"title":"Buy milk"}"#);
    assert_eq!(echo.headers.get("content-type").map(String::as_str), Some("application/json"));
    assert_eq!(echo.headers.get("content-length").map(String::as_str), Some("20"));
    assert!(!echo.headers.contains_key("expect"));
}

#[test]
fn put_uploads_large_body() {
    let payload = "0123456789".repeat(20_000);
    let response = h3bridge_curl::transport(config())
        .execute(Request::new(Method::Put, url("/echo/blob")).body_bytes(payload.clone()))
        .unwrap();
    let echo = echo(&response);
    assert_eq!(echo.method, "PUT");
    assert_eq!(echo.path, "/echo/blob");
    assert_eq!(echo.body.len(), payload.len());
    assert_eq!(echo.body, payload);
}

#[test]
fn delete_and_custom_methods() {
    let transport = h3bridge_curl::transport(config());
    let response = transport
        .execute(Request::new(Method::Delete, url("/echo/items/1")))
        .unwrap();
    assert_eq!(echo(&response).method, "DELETE");

    let response = transport
        .execute(Request::new(Method::Other("PATCH".to_string()), url("/echo/items/1")))
        .unwrap();
    assert_eq!(echo(&response).method, "PATCH");
}

#[test]
fn head_has_no_body() {
    let response = h3bridge_curl::transport(config())
        .execute(Request::new(Method::Head, url("/data")))
        .unwrap();
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
}

#[test]
fn error_status_is_returned_as_response() {
    let response = h3bridge_curl::transport(config())
        .execute(Request::get(url("/status/404")))
        .unwrap();
    assert_eq!(response.status, 404);
}

#[test]
fn repeated_response_header_keeps_last_value() {
    let response = h3bridge_curl::transport(config())
        .execute(Request::get(url("/headers/repeat")))
        .unwrap();
    assert_eq!(response.headers.get("x-repeat"), Some("second"));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn slow_response_times_out() {
    let config = config().with_timeouts(Duration::from_secs(1), Duration::from_millis(200));
    let err = h3bridge_curl::transport(config)
        .execute(Request::get(url("/delay/2000")))
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");

    // The process and the shared runtime are still usable.
    let response = h3bridge_curl::transport(self::config())
        .execute(Request::get(url("/data")))
        .unwrap();
    assert_eq!(response.text(), "ok");
}

#[test]
fn oversized_body_aborts() {
    let err = h3bridge_curl::transport(config().with_max_response_body(1024))
        .execute(Request::get(url("/bytes/200000")))
        .unwrap_err();
    assert!(
        matches!(err, TransportError::BodyWriteOverflow { limit: 1024 }),
        "{err}"
    );
}

#[test]
fn refused_connection_reports_native_code() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = h3bridge_curl::transport(config())
        .execute(Request::get(format!("http://127.0.0.1:{port}/")))
        .unwrap_err();
    match err {
        TransportError::TransferFailed { code, .. } => assert_eq!(code, EngineCode::COULDNT_CONNECT),
        other => panic!("unexpected error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn cache_busting_keeps_existing_query() {
    let transport = h3bridge_curl::transport(config().with_cache_busting(true));
    let first = echo(&transport.execute(Request::get(url("/echo?q=keep"))).unwrap());
    let second = echo(&transport.execute(Request::get(url("/echo?q=keep"))).unwrap());
    let first = first.query.unwrap();
    let second = second.query.unwrap();
    assert!(first.starts_with("q=keep&q="), "{first}");
    assert!(second.starts_with("q=keep&q="), "{second}");
    assert_ne!(first, second);
}

#[test]
fn resolve_pins_host_to_address() {
    let port = server().port();
    let config = config().with_resolve(ResolveOverride::new("fixture.test", port, "127.0.0.1"));
    let response = h3bridge_curl::transport(config)
        .execute(Request::get(format!("http://fixture.test:{port}/data")))
        .unwrap();
    assert_eq!(response.text(), "ok");
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_transfers_stay_separate() {
    let transport = h3bridge_curl::transport(config());
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let transport = transport.clone();
            thread::spawn(move || {
                for round in 0..5 {
                    let tag = format!("w{i}r{round}");
                    let response = transport
                        .execute(
                            Request::new(Method::Post, url(&format!("/echo/{tag}")))
                                .header("X-Tag", tag.clone())
                                .body_bytes(tag.repeat(500)),
                        )
                        .unwrap();
                    let echo = echo(&response);
                    assert_eq!(echo.path, format!("/echo/{tag}"));
                    assert_eq!(echo.headers.get("x-tag"), Some(&tag));
                    assert_eq!(echo.body, tag.repeat(500));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_transfers_run_on_blocking_pool() {
    let transport = h3bridge_curl::transport(config());
    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .execute_async(Request::get(url(&format!("/echo/async/{i}"))))
                    .await
            })
        })
        .collect();
    for (i, task) in tasks.into_iter().enumerate() {
        let response = task.await.unwrap().unwrap();
        assert_eq!(echo(&response).path, format!("/echo/async/{i}"));
    }
}
