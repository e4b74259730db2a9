//! Executes a `Request` on the native engine and returns a buffered `Response`.
//!
//! # Overview
//! One call to `execute` is one native handle and one `TransferContext`:
//!
//! 1. global init (once per runtime)
//! 2. handle acquisition
//! 3. baseline options: TLS verification, protocol version, CA path, verbose
//! 4. URL, optionally cache-busted
//! 5. method directive
//! 6. header lines and upload sizes
//! 7. resolver pins
//! 8. signal, encoding, keep-alive and timeout tuning
//! 9. callback registration, bound to this call's context
//! 10. perform, blocking the calling thread
//! 11. status and protocol queries
//! 12. response assembly
//!
//! Every exit path releases the handle through `HandleGuard`. Failures are
//! returned whole; headers that arrived before an error are discarded.
//!
//! # Design
//! `execute` blocks for the full transfer. Async callers go through
//! `execute_async`, which moves the call onto tokio's blocking pool.

use std::sync::Arc;

use url::Url;

use crate::bridge;
use crate::config::TransportConfig;
use crate::context::{ContextOptions, DebugSink, TracingSink, TransferContext};
use crate::engine::{negotiated_version, EngineCode, EngineOption, InfoKey, NativeEngine};
use crate::error::TransportError;
use crate::header;
use crate::http::{Headers, Method, Request, Response};
use crate::lifecycle::{EngineRuntime, HandleGuard};
use crate::registry;

/// Engine directive selecting the request method.
///
/// DELETE and any non-standard token go through the custom-request directive.
pub fn method_directive(method: &Method) -> EngineOption<'_> {
    match method {
        Method::Get => EngineOption::HttpGet,
        Method::Post => EngineOption::Post,
        Method::Put => EngineOption::Upload,
        Method::Head => EngineOption::NoBody,
        Method::Delete => EngineOption::CustomRequest("DELETE"),
        Method::Other(token) => EngineOption::CustomRequest(token),
    }
}

/// Validate and flatten request headers into engine lines.
pub fn header_lines(headers: &Headers) -> Result<Vec<String>, TransportError> {
    for (name, value) in headers.iter() {
        if !header::is_valid_name(name) || value.contains(['\r', '\n']) {
            return Err(TransportError::InvalidHeader {
                name: name.to_string(),
            });
        }
    }
    Ok(header::flatten(headers))
}

/// Append `param=<value>` to `raw`, keeping every existing query pair.
pub fn cache_busted_url(raw: &str, param: &str, value: u64) -> Result<String, TransportError> {
    let mut url = Url::parse(raw).map_err(|e| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut().append_pair(param, &value.to_string());
    Ok(url.into())
}

/// HTTP transport backed by a native engine handle per request.
pub struct Http3Transport<E: NativeEngine> {
    runtime: Arc<EngineRuntime<E>>,
    config: TransportConfig,
    debug_sink: Arc<dyn DebugSink>,
}

impl<E: NativeEngine> Clone for Http3Transport<E> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            config: self.config.clone(),
            debug_sink: Arc::clone(&self.debug_sink),
        }
    }
}

impl<E: NativeEngine> Http3Transport<E> {
    pub fn new(runtime: Arc<EngineRuntime<E>>, config: TransportConfig) -> Self {
        Self {
            runtime,
            config,
            debug_sink: Arc::new(TracingSink),
        }
    }

    /// Receive engine trace text here instead of `tracing` when
    /// `debug_trace` is on.
    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.debug_sink = sink;
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<EngineRuntime<E>> {
        &self.runtime
    }

    pub fn execute(&self, mut request: Request) -> Result<Response, TransportError> {
        let request_id: u64 = rand::random();
        let span = tracing::debug_span!(
            "h3_transfer",
            request_id,
            method = %request.method,
            url = %request.url,
        );
        let _entered = span.enter();

        self.runtime.ensure_initialized()?;
        // Declared before the handle so it outlives handle destruction.
        let context = Arc::new(TransferContext::new(
            request_id,
            ContextOptions {
                request_body: request.body.take(),
                progress: request.progress.take(),
                debug_sink: self
                    .config
                    .debug_trace
                    .then(|| Arc::clone(&self.debug_sink)),
                max_response_body: self.config.max_response_body,
            },
        ));
        let handle = self.runtime.open_handle()?;

        self.apply_baseline(&handle)?;

        let url = if self.config.cache_busting {
            cache_busted_url(&request.url, &self.config.cache_buster_param, request_id)?
        } else {
            request.url.clone()
        };
        self.apply(&handle, EngineOption::Url(&url))?;
        self.apply(&handle, method_directive(&request.method))?;

        let lines = header_lines(&request.headers)?;
        self.apply(&handle, EngineOption::HttpHeader(&lines))?;
        if request.content_length >= 0 {
            match request.method {
                Method::Put => self.apply(&handle, EngineOption::InFileSize(request.content_length))?,
                Method::Post => {
                    self.apply(&handle, EngineOption::PostFieldSize(request.content_length))?
                }
                _ => {}
            }
        }

        let resolve = self.config.resolve_entries();
        if !resolve.is_empty() {
            self.apply(&handle, EngineOption::Resolve(&resolve))?;
        }
        self.apply_tuning(&handle)?;

        registry::global().bind(handle.id(), &context);
        self.register_callbacks(&handle)?;

        tracing::debug!("performing transfer");
        if let Err(code) = handle.perform() {
            return Err(self.perform_error(code, &context));
        }

        let status = handle
            .info(InfoKey::ResponseCode)
            .map_err(|code| self.transfer_failed(code))?;
        let status = u16::try_from(status).map_err(|_| TransportError::TransferFailed {
            code: EngineCode::BAD_FUNCTION_ARGUMENT,
            message: format!("engine reported status {status}"),
        })?;
        let protocol = handle
            .info(InfoKey::HttpVersion)
            .ok()
            .and_then(negotiated_version)
            .unwrap_or_else(|| self.config.http_version.label());

        let (headers, body) = context.take_response_parts();
        tracing::debug!(status, protocol, bytes = body.len(), "transfer complete");
        Ok(Response {
            status,
            headers,
            body,
            protocol,
        })
    }

    fn apply(&self, handle: &HandleGuard<'_, E>, option: EngineOption<'_>) -> Result<(), TransportError> {
        let key = option.key();
        tracing::trace!(option = %key, "set engine option");
        handle.set_option(option).map_err(|code| {
            let message = self.runtime.engine().describe(code);
            tracing::error!(option = %key, %code, %message, "engine rejected option");
            TransportError::OptionRejected {
                option: key,
                code,
                message,
            }
        })
    }

    fn apply_baseline(&self, handle: &HandleGuard<'_, E>) -> Result<(), TransportError> {
        let verify = self.config.verify_tls;
        self.apply(handle, EngineOption::SslVerifyPeer(verify))?;
        self.apply(handle, EngineOption::SslVerifyHost(verify))?;
        self.apply(handle, EngineOption::HttpVersion(self.config.http_version))?;
        if let Some(ca_path) = self.config.ca_path.as_deref() {
            self.apply(handle, EngineOption::CaPath(ca_path))?;
        }
        if self.config.debug_trace {
            self.apply(handle, EngineOption::Verbose(true))?;
        }
        Ok(())
    }

    fn apply_tuning(&self, handle: &HandleGuard<'_, E>) -> Result<(), TransportError> {
        self.apply(handle, EngineOption::NoSignal(true))?;
        self.apply(handle, EngineOption::TransferEncoding(false))?;
        self.apply(handle, EngineOption::TcpKeepAlive(true))?;
        self.apply(handle, EngineOption::ConnectTimeout(self.config.connect_timeout()))?;
        self.apply(handle, EngineOption::Timeout(self.config.timeout()))
    }

    fn register_callbacks(&self, handle: &HandleGuard<'_, E>) -> Result<(), TransportError> {
        let userdata = handle.id().as_userdata();
        self.apply(handle, EngineOption::HeaderFunction(bridge::header_callback))?;
        self.apply(handle, EngineOption::HeaderData(userdata))?;
        self.apply(handle, EngineOption::WriteFunction(bridge::write_callback))?;
        self.apply(handle, EngineOption::WriteData(userdata))?;
        self.apply(handle, EngineOption::ReadFunction(bridge::read_callback))?;
        self.apply(handle, EngineOption::ReadData(userdata))?;
        // Progress stays on even without an observer: it is how an
        // overflowed, paused transfer gets aborted.
        self.apply(handle, EngineOption::ProgressFunction(bridge::progress_callback))?;
        self.apply(handle, EngineOption::ProgressData(userdata))?;
        self.apply(handle, EngineOption::NoProgress(false))?;
        if self.config.debug_trace {
            self.apply(handle, EngineOption::DebugFunction(bridge::debug_callback))?;
            self.apply(handle, EngineOption::DebugData(userdata))?;
        }
        Ok(())
    }

    fn transfer_failed(&self, code: EngineCode) -> TransportError {
        TransportError::TransferFailed {
            code,
            message: self.runtime.engine().describe(code),
        }
    }

    fn perform_error(&self, code: EngineCode, context: &TransferContext) -> TransportError {
        if context.overflowed() {
            let limit = self.config.max_response_body.unwrap_or_default();
            tracing::warn!(limit, %code, "response body overflow aborted transfer");
            return TransportError::BodyWriteOverflow { limit };
        }
        let message = self.runtime.engine().describe(code);
        if code == EngineCode::OPERATION_TIMEDOUT {
            tracing::warn!(
                timeout_ms = self.config.timeout().as_millis() as u64,
                connect_timeout_ms = self.config.connect_timeout().as_millis() as u64,
                %message,
                "transfer timed out"
            );
            return TransportError::TimedOut { message };
        }
        tracing::warn!(%code, %message, "transfer failed");
        TransportError::TransferFailed { code, message }
    }
}

#[cfg(feature = "tokio")]
impl<E: NativeEngine + 'static> Http3Transport<E> {
    /// Run `execute` on the blocking pool so the async runtime's workers are
    /// never parked inside perform.
    pub async fn execute_async(&self, request: Request) -> Result<Response, TransportError> {
        let transport = self.clone();
        tokio::task::spawn_blocking(move || transport.execute(request))
            .await
            .map_err(|e| TransportError::Worker(e.to_string()))?
    }
}
