//! HTTP transport adapter over a native, handle-based transfer engine.
//!
//! # Overview
//! Translates a `Request` into a sequence of option settings on a fresh
//! native handle, runs the blocking transfer, and gathers the engine's
//! callback traffic back into a buffered `Response`. The engine itself is a
//! black box behind the `NativeEngine` trait; `h3bridge-curl` binds it to
//! libcurl and `scripted::ScriptedEngine` (feature `scripted`) plays
//! transfers back in-process.
//!
//! # Design
//! - One handle and one `TransferContext` per request; nothing is shared
//!   between in-flight requests except the handle registry.
//! - Callbacks reach their context through the registry using the handle
//!   address as userdata, and tolerate a missing entry.
//! - Global init and handle create/destroy are serialised by
//!   `EngineRuntime`; perform is not.
//! - Timeouts surface as `TransportError::TimedOut`; nothing here exits the
//!   process.

pub mod adapter;
pub mod bridge;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod header;
pub mod http;
pub mod lifecycle;
pub mod registry;
#[cfg(any(test, feature = "scripted"))]
pub mod scripted;

pub use adapter::Http3Transport;
pub use config::{ResolveOverride, TransportConfig};
pub use context::{DebugSink, TracingSink};
pub use dispatch::{RoundTrip, Transport};
pub use engine::{EngineCode, HttpVersion, NativeEngine, OptionKey};
pub use error::{ConfigError, TransportError};
pub use http::{Headers, Method, Progress, ProgressAction, Request, Response};
pub use lifecycle::EngineRuntime;
