//! Transport configuration.
//!
//! # Design
//! Every field has a default so a config can be loaded from a partial JSON
//! document. Timeouts are stored in milliseconds; `0` and absent both mean
//! "use the built-in default", matching how the engine treats a zero timeout
//! as "never", which is not something this adapter exposes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::HttpVersion;
use crate::error::ConfigError;

/// Overall transfer timeout applied when the caller configures none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
/// Connect timeout applied when the caller configures none.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(64);
/// Query parameter carrying the cache-busting value.
pub const DEFAULT_CACHE_BUSTER_PARAM: &str = "q";

/// A host:port pinned to one or more addresses, bypassing DNS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOverride {
    pub host: String,
    pub port: u16,
    pub addresses: Vec<String>,
}

impl ResolveOverride {
    pub fn new(host: impl Into<String>, port: u16, address: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            addresses: vec![address.into()],
        }
    }

    /// Parse the engine's `host:port:addr[,addr...]` form. IPv6 addresses may
    /// be bracketed.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidResolve(entry.to_string());
        let (host, rest) = entry.split_once(':').ok_or_else(invalid)?;
        let (port, addresses) = rest.split_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        let addresses: Vec<String> = addresses
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        if host.is_empty() || addresses.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
            addresses,
        })
    }
}

impl fmt::Display for ResolveOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.addresses.join(","))
    }
}

/// Settings for `Http3Transport` and the outer `Transport` dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Directory of CA certificates handed to the engine.
    pub ca_path: Option<String>,
    /// Route requests through the native engine instead of the fallback.
    pub force_http3: bool,
    pub http_version: HttpVersion,
    /// Peer and host verification. Off unless explicitly enabled.
    pub verify_tls: bool,
    pub resolve: Vec<ResolveOverride>,
    /// Turn on the engine's verbose mode and forward its trace text.
    pub debug_trace: bool,
    pub connect_timeout_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    /// Append a random query parameter to defeat intermediary caches.
    pub cache_busting: bool,
    pub cache_buster_param: String,
    /// Largest response body buffered before the transfer is aborted.
    pub max_response_body: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ca_path: None,
            force_http3: false,
            http_version: HttpVersion::Http3,
            verify_tls: false,
            resolve: Vec::new(),
            debug_trace: false,
            connect_timeout_ms: None,
            timeout_ms: None,
            cache_busting: false,
            cache_buster_param: DEFAULT_CACHE_BUSTER_PARAM.to_string(),
            max_response_body: None,
        }
    }
}

impl TransportConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn timeout(&self) -> Duration {
        match self.timeout_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => DEFAULT_TIMEOUT,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        match self.connect_timeout_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Engine resolve list, one `host:port:addresses` entry per override.
    pub fn resolve_entries(&self) -> Vec<String> {
        self.resolve.iter().map(ToString::to_string).collect()
    }

    pub fn with_http_version(mut self, version: HttpVersion) -> Self {
        self.http_version = version;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, overall: Duration) -> Self {
        self.connect_timeout_ms = Some(clamped_millis(connect));
        self.timeout_ms = Some(clamped_millis(overall));
        self
    }

    pub fn with_resolve(mut self, entry: ResolveOverride) -> Self {
        self.resolve.push(entry);
        self
    }

    pub fn with_force_http3(mut self, enabled: bool) -> Self {
        self.force_http3 = enabled;
        self
    }

    pub fn with_cache_busting(mut self, enabled: bool) -> Self {
        self.cache_busting = enabled;
        self
    }

    pub fn with_debug_trace(mut self, enabled: bool) -> Self {
        self.debug_trace = enabled;
        self
    }

    pub fn with_max_response_body(mut self, limit: usize) -> Self {
        self.max_response_body = Some(limit);
        self
    }
}

fn clamped_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let config = TransportConfig::from_json("{}").unwrap();
        assert_eq!(config, TransportConfig::default());
        assert_eq!(config.timeout(), Duration::from_secs(180));
        assert_eq!(config.connect_timeout(), Duration::from_secs(64));
        assert_eq!(config.http_version, HttpVersion::Http3);
        assert!(!config.verify_tls);
        assert_eq!(config.cache_buster_param, "q");
    }

    #[test]
    fn zero_timeouts_fall_back_to_defaults() {
        let config = TransportConfig::from_json(r#"{"timeout_ms":0,"connect_timeout_ms":0}"#).unwrap();
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn full_json_is_parsed() {
        let config = TransportConfig::from_json(
            r#"{
                "ca_path": "/etc/ssl/certs",
                "force_http3": true,
                "http_version": "http2",
                "resolve": [{"host": "up.example.test", "port": 443, "addresses": ["10.0.0.1", "10.0.0.2"]}],
                "debug_trace": true,
                "timeout_ms": 5000,
                "connect_timeout_ms": 1500,
                "cache_busting": true,
                "max_response_body": 1024
            }"#,
        )
        .unwrap();
        assert_eq!(config.ca_path.as_deref(), Some("/etc/ssl/certs"));
        assert!(config.force_http3);
        assert_eq!(config.http_version, HttpVersion::Http2);
        assert_eq!(config.timeout(), Duration::from_millis(5000));
        assert_eq!(config.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(
            config.resolve_entries(),
            vec!["up.example.test:443:10.0.0.1,10.0.0.2".to_string()]
        );
        assert_eq!(config.max_response_body, Some(1024));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = TransportConfig::from_json(r#"{"http_version":"http9"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn resolve_entry_parses_engine_form() {
        let entry = ResolveOverride::parse("example.test:443:127.0.0.1,[::1]").unwrap();
        assert_eq!(entry.host, "example.test");
        assert_eq!(entry.port, 443);
        assert_eq!(entry.addresses, vec!["127.0.0.1", "[::1]"]);
        assert_eq!(entry.to_string(), "example.test:443:127.0.0.1,[::1]");
    }

    #[test]
    fn resolve_entry_rejects_malformed_input() {
        assert!(ResolveOverride::parse("example.test").is_err());
        assert!(ResolveOverride::parse("example.test:http:1.2.3.4").is_err());
        assert!(ResolveOverride::parse("example.test:443:").is_err());
        assert!(ResolveOverride::parse(":443:1.2.3.4").is_err());
    }

    #[test]
    fn huge_timeouts_saturate() {
        let config = TransportConfig::default().with_timeouts(Duration::MAX, Duration::from_secs(5));
        assert_eq!(config.connect_timeout_ms, Some(u64::MAX));
        assert_eq!(config.timeout_ms, Some(5_000));
    }
}
