//! HTTP request and response types handed across the adapter boundary.
//!
//! # Design
//! These types describe a request the way an ordinary blocking HTTP client
//! sees it: a method, a URL, a header mapping and a readable body. The adapter
//! maps them onto the native engine's option protocol and builds a `Response`
//! from what the callback bridge accumulated. Nothing here touches the engine.
//!
//! The response body is fully buffered, so `Response` owns a `Bytes` value and
//! hands out readers over it instead of exposing a live stream.

use std::fmt;
use std::io::Read;

use bytes::{Buf, Bytes};

/// HTTP method for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    /// Any method without a dedicated engine directive (`PATCH`, `OPTIONS`, ...).
    Other(String),
}

impl Method {
    /// Parse a method token. Tokens are case-sensitive, so `get` is a custom
    /// method and not `GET`.
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Other(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header mapping with case-insensitive names.
///
/// Several values may be stored under one name. `get` returns the first of
/// them; `set` drops every existing value before storing the new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, keeping any values already stored under `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value stored under `name` with `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(first) => {
                self.entries[first].1 = value.into();
                let mut index = 0;
                self.entries.retain(|(existing, _)| {
                    let keep = index <= first || !existing.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value.into())),
        }
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Every value stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Distinct names in first-insertion order, spelled as first inserted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().enumerate().filter_map(|(i, (name, _))| {
            let first = self.entries[..i]
                .iter()
                .all(|(earlier, _)| !earlier.eq_ignore_ascii_case(name));
            first.then_some(name.as_str())
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Cumulative transfer counters reported by the engine's progress hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub download_total: i64,
    pub download_now: i64,
    pub upload_total: i64,
    pub upload_now: i64,
}

/// What a progress observer wants the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    Continue,
    Abort,
}

/// Request body stream. Read on the thread blocked inside perform.
pub type Body = Box<dyn Read + Send>;

/// Progress observer attached to a single request.
pub type ProgressObserver = Box<dyn FnMut(Progress) -> ProgressAction + Send>;

/// An outgoing HTTP request.
///
/// `content_length` is `-1` when the body length is unknown, in which case the
/// engine falls back to chunked upload for methods that carry a body.
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Body>,
    pub content_length: i64,
    pub progress: Option<ProgressObserver>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            content_length: -1,
            progress: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Attach an in-memory body; the content length becomes known.
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        self.content_length = body.len() as i64;
        self.body = Some(Box::new(body.reader()));
        self
    }

    /// Attach a streaming body. Pass `-1` when the length is unknown.
    pub fn body_reader(mut self, reader: impl Read + Send + 'static, content_length: i64) -> Self {
        self.body = Some(Box::new(reader));
        self.content_length = content_length;
        self
    }

    pub fn on_progress(
        mut self,
        observer: impl FnMut(Progress) -> ProgressAction + Send + 'static,
    ) -> Self {
        self.progress = Some(Box::new(observer));
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// A completed HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
    /// Negotiated protocol family, e.g. `HTTP/3`.
    pub protocol: &'static str,
}

impl Response {
    pub fn content_length(&self) -> i64 {
        self.body.len() as i64
    }

    /// The buffered body as a readable stream.
    pub fn reader(&self) -> impl Read {
        self.body.clone().reader()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parse_maps_standard_tokens() {
        assert_eq!(Method::parse("GET"), Method::Get);
        assert_eq!(Method::parse("POST"), Method::Post);
        assert_eq!(Method::parse("PUT"), Method::Put);
        assert_eq!(Method::parse("DELETE"), Method::Delete);
        assert_eq!(Method::parse("HEAD"), Method::Head);
        assert_eq!(Method::parse("PATCH"), Method::Other("PATCH".to_string()));
        assert_eq!(Method::parse("get"), Method::Other("get".to_string()));
    }

    #[test]
    fn headers_lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn headers_get_returns_first_value() {
        let mut headers = Headers::new();
        headers.append("Accept", "a");
        headers.append("accept", "b");
        assert_eq!(headers.get("Accept"), Some("a"));
        assert_eq!(headers.get_all("ACCEPT").collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn headers_set_replaces_every_value() {
        let mut headers = Headers::new();
        headers.append("X-Id", "1");
        headers.append("Other", "o");
        headers.append("x-id", "2");
        headers.set("X-ID", "3");
        assert_eq!(headers.get_all("x-id").collect::<Vec<_>>(), vec!["3"]);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.names().collect::<Vec<_>>(), vec!["X-Id", "Other"]);
    }

    #[test]
    fn headers_names_are_distinct() {
        let mut headers = Headers::new();
        headers.append("A", "1");
        headers.append("b", "2");
        headers.append("a", "3");
        assert_eq!(headers.names().collect::<Vec<_>>(), vec!["A", "b"]);
    }

    #[test]
    fn body_bytes_sets_content_length() {
        let req = Request::new(Method::Post, "https://example.test").body_bytes("hello");
        assert_eq!(req.content_length, 5);
        assert!(req.body.is_some());
    }

    #[test]
    fn request_defaults_to_unknown_length() {
        let req = Request::get("https://example.test");
        assert_eq!(req.content_length, -1);
        assert!(req.body.is_none());
    }

    #[test]
    fn response_reader_yields_body() {
        let response = Response {
            status: 200,
            headers: Headers::new(),
            body: Bytes::from_static(b"ok"),
            protocol: "HTTP/3",
        };
        let mut out = String::new();
        response.reader().read_to_string(&mut out).unwrap();
        assert_eq!(out, "ok");
        assert_eq!(response.content_length(), 2);
        assert!(response.is_success());
    }
}
