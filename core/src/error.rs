//! Error types for the HTTP/3 transport adapter.
//!
//! # Design
//! Every failure the caller can observe is a single `TransportError`; partial
//! responses are never returned. `TimedOut` is split out of `TransferFailed`
//! so callers can tell an engine-enforced timeout apart from other perform
//! failures and decide for themselves whether to retry.

use thiserror::Error;

use crate::engine::{EngineCode, OptionKey};

/// Errors returned by `Http3Transport::execute` and the outer dispatcher.
#[derive(Debug, Error)]
pub enum TransportError {
    /// One-time engine initialisation failed. A later call retries it.
    #[error("native engine initialisation failed: {message} ({code})")]
    GlobalInitFailed { code: EngineCode, message: String },

    /// The engine refused to hand out a transfer handle.
    #[error("native handle creation failed")]
    HandleCreationFailed,

    /// The engine rejected a specific option while the handle was configured.
    #[error("engine rejected option {option}: {message} ({code})")]
    OptionRejected {
        option: OptionKey,
        code: EngineCode,
        message: String,
    },

    /// Perform returned a non-zero result code.
    #[error("transfer failed: {message} ({code})")]
    TransferFailed { code: EngineCode, message: String },

    /// Perform hit the engine's connect or overall timeout.
    #[error("transfer timed out: {message}")]
    TimedOut { message: String },

    /// The response body outgrew the configured buffer limit.
    #[error("response body exceeded {limit} bytes")]
    BodyWriteOverflow { limit: usize },

    #[error("invalid request url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid request header {name:?}")]
    InvalidHeader { name: String },

    /// Error surfaced unchanged from the fallback transport.
    #[error("fallback transport failed: {0}")]
    Fallback(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The blocking worker running the transfer panicked or was cancelled.
    #[error("transfer worker failed: {0}")]
    Worker(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::TimedOut { .. })
    }

    /// Native result code behind this error, when there is one.
    pub fn code(&self) -> Option<EngineCode> {
        match self {
            TransportError::GlobalInitFailed { code, .. }
            | TransportError::OptionRejected { code, .. }
            | TransportError::TransferFailed { code, .. } => Some(*code),
            TransportError::TimedOut { .. } => Some(EngineCode::OPERATION_TIMEDOUT),
            _ => None,
        }
    }
}

/// Errors raised while loading a `TransportConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid resolve entry {0:?}: expected host:port:address[,address...]")]
    InvalidResolve(String),
}
