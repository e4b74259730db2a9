//! Outer dispatch between the native HTTP/3 path and a fallback transport.
//!
//! `Transport` decides per configuration, not per request: with
//! `force_http3` every request goes through `Http3Transport`, otherwise every
//! request goes to the caller's fallback. Fallback errors are passed through
//! untouched.

use crate::adapter::Http3Transport;
use crate::engine::NativeEngine;
use crate::error::TransportError;
use crate::http::{Request, Response};

/// Anything that can turn a request into a response.
pub trait RoundTrip: Send + Sync {
    fn round_trip(&self, request: Request) -> Result<Response, TransportError>;
}

impl<E: NativeEngine> RoundTrip for Http3Transport<E> {
    fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        self.execute(request)
    }
}

pub struct Transport {
    http3: Box<dyn RoundTrip>,
    fallback: Box<dyn RoundTrip>,
    force_http3: bool,
}

impl Transport {
    pub fn new(http3: impl RoundTrip + 'static, fallback: impl RoundTrip + 'static, force_http3: bool) -> Self {
        Self {
            http3: Box::new(http3),
            fallback: Box::new(fallback),
            force_http3,
        }
    }

    /// Build from an adapter, taking the routing flag from its config.
    pub fn from_config<E: NativeEngine + 'static>(
        http3: Http3Transport<E>,
        fallback: impl RoundTrip + 'static,
    ) -> Self {
        let force_http3 = http3.config().force_http3;
        Self::new(http3, fallback, force_http3)
    }

    pub fn uses_http3(&self) -> bool {
        self.force_http3
    }
}

impl RoundTrip for Transport {
    fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        if self.uses_http3() {
            tracing::trace!(url = %request.url, "dispatching to native transport");
            self.http3.round_trip(request)
        } else {
            tracing::trace!(url = %request.url, "dispatching to fallback transport");
            self.fallback.round_trip(request)
        }
    }
}
