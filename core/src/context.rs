//! Per-request state filled in by the callback bridge.
//!
//! # Design
//! One `TransferContext` exists per in-flight request. The adapter owns it
//! through an `Arc`; the handle registry only holds a `Weak`. Every callback
//! runs on the thread blocked inside perform, so the inner mutex is never
//! contended. It exists to make the context `Sync` for the process-wide
//! registry, not to coordinate threads.

use std::io::{ErrorKind, Read};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::engine::DebugKind;
use crate::header;
use crate::http::{Body, Headers, Progress, ProgressAction, ProgressObserver};

/// Receives the engine's diagnostic text for one transfer.
pub trait DebugSink: Send + Sync {
    fn trace(&self, request_id: u64, kind: DebugKind, text: &str);
}

/// Forwards engine diagnostics to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DebugSink for TracingSink {
    fn trace(&self, request_id: u64, kind: DebugKind, text: &str) {
        tracing::debug!(
            target: "h3bridge::engine",
            request_id,
            kind = ?kind,
            "{}",
            text.trim_end()
        );
    }
}

/// Result of handing a body chunk to the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    /// The chunk would overflow the body limit; the transfer must stop.
    Pause,
}

/// Construction-time inputs for a `TransferContext`.
#[derive(Default)]
pub struct ContextOptions {
    pub request_body: Option<Body>,
    pub progress: Option<ProgressObserver>,
    pub debug_sink: Option<Arc<dyn DebugSink>>,
    pub max_response_body: Option<usize>,
}

struct TransferState {
    headers: Headers,
    body: BytesMut,
    overflowed: bool,
    request_body: Option<Body>,
    uploaded: u64,
    progress: Option<ProgressObserver>,
}

pub struct TransferContext {
    request_id: u64,
    max_response_body: Option<usize>,
    debug_sink: Option<Arc<dyn DebugSink>>,
    state: Mutex<TransferState>,
}

impl TransferContext {
    pub fn new(request_id: u64, options: ContextOptions) -> Self {
        Self {
            request_id,
            max_response_body: options.max_response_body,
            debug_sink: options.debug_sink,
            state: Mutex::new(TransferState {
                headers: Headers::new(),
                body: BytesMut::new(),
                overflowed: false,
                request_body: options.request_body,
                uploaded: 0,
                progress: options.progress,
            }),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Store one raw header line. Lines without a colon are ignored.
    /// Later lines replace earlier values for the same name.
    pub fn on_header(&self, line: &[u8]) {
        if let Some((name, value)) = header::parse_line(line) {
            self.state.lock().headers.set(name, value);
        }
    }

    /// Append a body chunk, refusing it once the configured limit would be
    /// exceeded.
    pub fn on_body(&self, chunk: &[u8]) -> WriteOutcome {
        let mut state = self.state.lock();
        if let Some(limit) = self.max_response_body {
            if state.body.len() + chunk.len() > limit {
                state.overflowed = true;
                tracing::warn!(
                    request_id = self.request_id,
                    limit,
                    buffered = state.body.len(),
                    chunk = chunk.len(),
                    "response body exceeds limit, pausing transfer"
                );
                return WriteOutcome::Pause;
            }
        }
        state.body.extend_from_slice(chunk);
        WriteOutcome::Accepted
    }

    /// Fill `buf` from the request body. Returns `0` at end of input, when
    /// there is no body, and on read errors.
    pub fn on_read(&self, buf: &mut [u8]) -> usize {
        let mut state = self.state.lock();
        let Some(body) = state.request_body.as_mut() else {
            return 0;
        };
        let read = loop {
            match body.read(buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(
                        request_id = self.request_id,
                        error = %e,
                        "request body read failed, ending upload"
                    );
                    break 0;
                }
            }
        };
        state.uploaded += read as u64;
        read
    }

    /// Forward progress to the request's observer. Always aborts once the
    /// body limit was hit, since a paused transfer would otherwise idle until
    /// the overall timeout.
    pub fn on_progress(&self, progress: Progress) -> ProgressAction {
        let mut state = self.state.lock();
        if state.overflowed {
            return ProgressAction::Abort;
        }
        match state.progress.as_mut() {
            Some(observer) => observer(progress),
            None => ProgressAction::Continue,
        }
    }

    pub fn on_debug(&self, kind: DebugKind, text: &[u8]) {
        if !kind.is_textual() {
            return;
        }
        if let Some(sink) = &self.debug_sink {
            sink.trace(self.request_id, kind, &String::from_utf8_lossy(text));
        }
    }

    pub fn overflowed(&self) -> bool {
        self.state.lock().overflowed
    }

    pub fn uploaded(&self) -> u64 {
        self.state.lock().uploaded
    }

    /// Move the accumulated headers and body out of the context.
    pub fn take_response_parts(&self) -> (Headers, Bytes) {
        let mut state = self.state.lock();
        let headers = std::mem::take(&mut state.headers);
        let body = std::mem::take(&mut state.body).freeze();
        (headers, body)
    }
}

impl std::fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferContext")
            .field("request_id", &self.request_id)
            .field("max_response_body", &self.max_response_body)
            .finish_non_exhaustive()
    }
}
