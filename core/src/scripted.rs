//! In-process engine that plays back scripted transfers.
//!
//! `ScriptedEngine` speaks the same protocol as a native binding: it records
//! every option set on a handle, and during perform it drives the registered
//! read, header, write, progress and debug callbacks exactly as the native
//! engine would, from the calling thread. A responder closure decides what
//! each transfer returns, so tests can serve different payloads to
//! concurrent requests and assert that none of them leak into another.

use std::collections::HashMap;
use std::ffi::c_void;
use std::os::raw::c_char;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::{
    DataCallback, DebugCallback, DebugKind, EngineCode, EngineHandle, EngineOption, HttpVersion,
    InfoKey, NativeEngine, OptionKey, ProgressCallback, ReadCallback, READ_ABORT, WRITE_PAUSE,
};

/// Owned copy of an option value as the engine received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOption {
    Url(String),
    CaPath(String),
    SslVerifyPeer(bool),
    SslVerifyHost(bool),
    HttpVersion(HttpVersion),
    Verbose(bool),
    HttpGet,
    Post,
    Upload,
    NoBody,
    CustomRequest(String),
    HttpHeader(Vec<String>),
    InFileSize(i64),
    PostFieldSize(i64),
    Resolve(Vec<String>),
    NoSignal(bool),
    TransferEncoding(bool),
    TcpKeepAlive(bool),
    Timeout(Duration),
    ConnectTimeout(Duration),
    NoProgress(bool),
    /// A function or data slot; the pointer itself is not recorded.
    Slot(OptionKey),
}

impl RecordedOption {
    fn record(option: &EngineOption<'_>) -> Self {
        match *option {
            EngineOption::Url(v) => RecordedOption::Url(v.to_string()),
            EngineOption::CaPath(v) => RecordedOption::CaPath(v.to_string()),
            EngineOption::SslVerifyPeer(v) => RecordedOption::SslVerifyPeer(v),
            EngineOption::SslVerifyHost(v) => RecordedOption::SslVerifyHost(v),
            EngineOption::HttpVersion(v) => RecordedOption::HttpVersion(v),
            EngineOption::Verbose(v) => RecordedOption::Verbose(v),
            EngineOption::HttpGet => RecordedOption::HttpGet,
            EngineOption::Post => RecordedOption::Post,
            EngineOption::Upload => RecordedOption::Upload,
            EngineOption::NoBody => RecordedOption::NoBody,
            EngineOption::CustomRequest(v) => RecordedOption::CustomRequest(v.to_string()),
            EngineOption::HttpHeader(lines) => RecordedOption::HttpHeader(lines.to_vec()),
            EngineOption::InFileSize(v) => RecordedOption::InFileSize(v),
            EngineOption::PostFieldSize(v) => RecordedOption::PostFieldSize(v),
            EngineOption::Resolve(entries) => RecordedOption::Resolve(entries.to_vec()),
            EngineOption::NoSignal(v) => RecordedOption::NoSignal(v),
            EngineOption::TransferEncoding(v) => RecordedOption::TransferEncoding(v),
            EngineOption::TcpKeepAlive(v) => RecordedOption::TcpKeepAlive(v),
            EngineOption::Timeout(v) => RecordedOption::Timeout(v),
            EngineOption::ConnectTimeout(v) => RecordedOption::ConnectTimeout(v),
            EngineOption::NoProgress(v) => RecordedOption::NoProgress(v),
            ref slot => RecordedOption::Slot(slot.key()),
        }
    }
}

/// Everything one handle saw, kept after the handle is destroyed.
#[derive(Debug, Clone, Default)]
pub struct RecordedTransfer {
    pub serial: u64,
    pub options: Vec<(OptionKey, RecordedOption)>,
    pub uploaded: Vec<u8>,
    pub performed: bool,
    pub destroy_count: usize,
}

impl RecordedTransfer {
    pub fn option(&self, key: OptionKey) -> Option<&RecordedOption> {
        self.options
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn has(&self, option: &RecordedOption) -> bool {
        self.options.iter().any(|(_, v)| v == option)
    }

    pub fn keys(&self) -> Vec<OptionKey> {
        self.options.iter().map(|(k, _)| *k).collect()
    }

    pub fn url(&self) -> Option<&str> {
        match self.option(OptionKey::Url)? {
            RecordedOption::Url(url) => Some(url),
            _ => None,
        }
    }

    pub fn header_lines(&self) -> &[String] {
        match self.option(OptionKey::HttpHeader) {
            Some(RecordedOption::HttpHeader(lines)) => lines,
            _ => &[],
        }
    }

    /// Upload body as text, for assertions.
    pub fn uploaded_text(&self) -> String {
        String::from_utf8_lossy(&self.uploaded).into_owned()
    }
}

/// What a scripted transfer delivers and how it ends.
#[derive(Debug, Clone)]
pub struct TransferScript {
    pub status: u16,
    pub header_lines: Vec<Vec<u8>>,
    pub body_chunks: Vec<Vec<u8>>,
    pub result: EngineCode,
    /// Negotiated version reported through `InfoKey::HttpVersion`.
    pub http_version: i64,
    /// Size of each buffer offered to the read callback.
    pub read_chunk: usize,
}

impl TransferScript {
    /// A successful HTTP/3 response with a single body chunk.
    pub fn ok(status: u16, body: impl AsRef<[u8]>) -> Self {
        let body = body.as_ref().to_vec();
        Self {
            status,
            header_lines: vec![
                format!("HTTP/3 {status}\r\n").into_bytes(),
                format!("content-length: {}\r\n", body.len()).into_bytes(),
                b"\r\n".to_vec(),
            ],
            body_chunks: vec![body],
            result: EngineCode::OK,
            http_version: 30,
            read_chunk: 16 * 1024,
        }
    }

    /// A transfer that delivers nothing and fails with `code`.
    pub fn failed(code: EngineCode) -> Self {
        Self {
            status: 0,
            header_lines: Vec::new(),
            body_chunks: Vec::new(),
            result: code,
            http_version: 0,
            read_chunk: 16 * 1024,
        }
    }

    /// Add a header line before the blank line that ends the header block.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let line = format!("{name}: {value}\r\n").into_bytes();
        let at = self.header_lines.len().saturating_sub(1);
        self.header_lines.insert(at, line);
        self
    }

    pub fn chunks<I, C>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        self.body_chunks = chunks.into_iter().map(|c| c.as_ref().to_vec()).collect();
        self
    }

    /// Deliver everything, then end perform with `code`.
    pub fn ending_with(mut self, code: EngineCode) -> Self {
        self.result = code;
        self
    }

    pub fn http_version(mut self, raw: i64) -> Self {
        self.http_version = raw;
        self
    }

    pub fn read_chunk(mut self, size: usize) -> Self {
        self.read_chunk = size.max(1);
        self
    }
}

type Responder = Arc<dyn Fn(&RecordedTransfer) -> TransferScript + Send + Sync>;

#[derive(Default, Clone, Copy)]
struct Slots {
    header: Option<DataCallback>,
    header_data: usize,
    write: Option<DataCallback>,
    write_data: usize,
    read: Option<ReadCallback>,
    read_data: usize,
    progress: Option<ProgressCallback>,
    progress_data: usize,
    debug: Option<DebugCallback>,
    debug_data: usize,
}

struct LiveTransfer {
    record: RecordedTransfer,
    slots: Slots,
    status: u16,
    http_version: i64,
}

#[derive(Default)]
struct State {
    live: HashMap<usize, LiveTransfer>,
    history: Vec<RecordedTransfer>,
}

pub struct ScriptedEngine {
    responder: Responder,
    state: Mutex<State>,
    serial: AtomicU64,
    init_calls: AtomicUsize,
    init_failures_left: AtomicUsize,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    invalid_destroys: AtomicUsize,
    refuse_handles: bool,
    reject: Option<(OptionKey, EngineCode)>,
}

impl ScriptedEngine {
    pub fn new(responder: impl Fn(&RecordedTransfer) -> TransferScript + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            state: Mutex::new(State::default()),
            serial: AtomicU64::new(0),
            init_calls: AtomicUsize::new(0),
            init_failures_left: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            invalid_destroys: AtomicUsize::new(0),
            refuse_handles: false,
            reject: None,
        }
    }

    /// Fail the first `n` global init attempts.
    pub fn fail_init_times(self, n: usize) -> Self {
        self.init_failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Make `create_handle` return `None`.
    pub fn refuse_handles(mut self) -> Self {
        self.refuse_handles = true;
        self
    }

    /// Reject every attempt to set `key` with `code`.
    pub fn reject_option(mut self, key: OptionKey, code: EngineCode) -> Self {
        self.reject = Some((key, code));
        self
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Destroy calls for handles that were not live.
    pub fn invalid_destroys(&self) -> usize {
        self.invalid_destroys.load(Ordering::SeqCst)
    }

    pub fn live_handles(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Transfers whose handles were destroyed, in destruction order.
    pub fn history(&self) -> Vec<RecordedTransfer> {
        self.state.lock().history.clone()
    }

    /// The destroyed transfer, if exactly one exists.
    pub fn only_transfer(&self) -> Option<RecordedTransfer> {
        let mut history = self.history();
        if history.len() == 1 {
            history.pop()
        } else {
            None
        }
    }

    fn upload(slots: &Slots, chunk: usize) -> Result<Vec<u8>, EngineCode> {
        let mut uploaded = Vec::new();
        let Some(read) = slots.read else {
            return Ok(uploaded);
        };
        let mut buf = vec![0u8; chunk];
        loop {
            let n = unsafe {
                read(
                    buf.as_mut_ptr() as *mut c_char,
                    1,
                    buf.len(),
                    slots.read_data as *mut c_void,
                )
            };
            if n == READ_ABORT {
                return Err(EngineCode::ABORTED_BY_CALLBACK);
            }
            if n == 0 {
                return Ok(uploaded);
            }
            if n > buf.len() {
                return Err(EngineCode::READ_ERROR);
            }
            uploaded.extend_from_slice(&buf[..n]);
        }
    }

    fn progress(slots: &Slots, enabled: bool, down_total: i64, down: i64, up: i64) -> Result<(), EngineCode> {
        match slots.progress {
            Some(progress) if enabled => {
                let verdict = unsafe {
                    progress(slots.progress_data as *mut c_void, down_total, down, up, up)
                };
                if verdict == 0 {
                    Ok(())
                } else {
                    Err(EngineCode::ABORTED_BY_CALLBACK)
                }
            }
            _ => Ok(()),
        }
    }

    fn debug(slots: &Slots, native: *mut c_void, verbose: bool, kind: DebugKind, text: &str) {
        if let (true, Some(debug)) = (verbose, slots.debug) {
            let mut bytes = text.as_bytes().to_vec();
            unsafe {
                debug(
                    native,
                    kind.as_raw(),
                    bytes.as_mut_ptr() as *mut c_char,
                    bytes.len(),
                    slots.debug_data as *mut c_void,
                )
            };
        }
    }

    fn deliver(
        slots: &Slots,
        record: &RecordedTransfer,
        script: &TransferScript,
        uploaded: i64,
    ) -> Result<(), EngineCode> {
        let progress_on = matches!(
            record.option(OptionKey::NoProgress),
            Some(RecordedOption::NoProgress(false))
        );
        for line in &script.header_lines {
            let mut line = line.clone();
            if let Some(header) = slots.header {
                let taken = unsafe {
                    header(
                        line.as_mut_ptr() as *mut c_char,
                        1,
                        line.len(),
                        slots.header_data as *mut c_void,
                    )
                };
                if taken != line.len() {
                    return Err(EngineCode::WRITE_ERROR);
                }
            }
        }
        if record.has(&RecordedOption::NoBody) {
            return Ok(());
        }
        let total: i64 = script.body_chunks.iter().map(|c| c.len() as i64).sum();
        let mut delivered = 0i64;
        for chunk in &script.body_chunks {
            let mut chunk = chunk.clone();
            if let Some(write) = slots.write {
                let taken = unsafe {
                    write(
                        chunk.as_mut_ptr() as *mut c_char,
                        1,
                        chunk.len(),
                        slots.write_data as *mut c_void,
                    )
                };
                if taken == WRITE_PAUSE {
                    // A paused easy transfer only resumes or dies through the
                    // progress hook; without an abort it idles into a timeout.
                    Self::progress(slots, progress_on, total, delivered, uploaded)?;
                    return Err(EngineCode::OPERATION_TIMEDOUT);
                }
                if taken != chunk.len() {
                    return Err(EngineCode::WRITE_ERROR);
                }
            }
            delivered += chunk.len() as i64;
            Self::progress(slots, progress_on, total, delivered, uploaded)?;
        }
        Ok(())
    }
}

impl NativeEngine for ScriptedEngine {
    fn global_init(&self) -> Result<(), EngineCode> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .init_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            Err(EngineCode::FAILED_INIT)
        } else {
            Ok(())
        }
    }

    fn create_handle(&self) -> Option<EngineHandle> {
        if self.refuse_handles {
            return None;
        }
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        let raw = Box::into_raw(Box::new(serial)) as *mut c_void;
        let handle = EngineHandle::from_ptr(raw)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        self.state.lock().live.insert(
            raw as usize,
            LiveTransfer {
                record: RecordedTransfer {
                    serial,
                    ..RecordedTransfer::default()
                },
                slots: Slots::default(),
                status: 0,
                http_version: 0,
            },
        );
        Some(handle)
    }

    unsafe fn set_option(&self, handle: EngineHandle, option: EngineOption<'_>) -> Result<(), EngineCode> {
        if let Some((key, code)) = self.reject {
            if option.key() == key {
                return Err(code);
            }
        }
        let mut state = self.state.lock();
        let transfer = state
            .live
            .get_mut(&(handle.as_ptr() as usize))
            .ok_or(EngineCode::BAD_FUNCTION_ARGUMENT)?;
        let slots = &mut transfer.slots;
        match option {
            EngineOption::HeaderFunction(f) => slots.header = Some(f),
            EngineOption::HeaderData(d) => slots.header_data = d as usize,
            EngineOption::WriteFunction(f) => slots.write = Some(f),
            EngineOption::WriteData(d) => slots.write_data = d as usize,
            EngineOption::ReadFunction(f) => slots.read = Some(f),
            EngineOption::ReadData(d) => slots.read_data = d as usize,
            EngineOption::ProgressFunction(f) => slots.progress = Some(f),
            EngineOption::ProgressData(d) => slots.progress_data = d as usize,
            EngineOption::DebugFunction(f) => slots.debug = Some(f),
            EngineOption::DebugData(d) => slots.debug_data = d as usize,
            _ => {}
        }
        transfer
            .record
            .options
            .push((option.key(), RecordedOption::record(&option)));
        Ok(())
    }

    unsafe fn perform(&self, handle: EngineHandle) -> Result<(), EngineCode> {
        let key = handle.as_ptr() as usize;
        let (mut record, slots) = {
            let mut state = self.state.lock();
            let transfer = state.live.get_mut(&key).ok_or(EngineCode::BAD_FUNCTION_ARGUMENT)?;
            if transfer.record.performed {
                return Err(EngineCode::BAD_FUNCTION_ARGUMENT);
            }
            transfer.record.performed = true;
            (transfer.record.clone(), transfer.slots)
        };
        let verbose = record.has(&RecordedOption::Verbose(true));
        let uploads = record.has(&RecordedOption::Upload) || record.has(&RecordedOption::Post);

        Self::debug(&slots, handle.as_ptr(), verbose, DebugKind::Text, "Connected to scripted engine\n");
        let read_chunk = (self.responder)(&record).read_chunk;
        if uploads {
            record.uploaded = Self::upload(&slots, read_chunk)?;
        }
        let script = (self.responder)(&record);
        for line in record.header_lines() {
            Self::debug(&slots, handle.as_ptr(), verbose, DebugKind::HeaderOut, &format!("{line}\r\n"));
        }

        let outcome = Self::deliver(&slots, &record, &script, record.uploaded.len() as i64);

        let mut state = self.state.lock();
        if let Some(transfer) = state.live.get_mut(&key) {
            transfer.record.uploaded = record.uploaded;
            transfer.status = script.status;
            transfer.http_version = script.http_version;
        }
        outcome?;
        script.result.result()
    }

    unsafe fn get_info(&self, handle: EngineHandle, key: InfoKey) -> Result<i64, EngineCode> {
        let state = self.state.lock();
        let transfer = state
            .live
            .get(&(handle.as_ptr() as usize))
            .ok_or(EngineCode::BAD_FUNCTION_ARGUMENT)?;
        Ok(match key {
            InfoKey::ResponseCode => i64::from(transfer.status),
            InfoKey::HttpVersion => transfer.http_version,
        })
    }

    unsafe fn destroy_handle(&self, handle: EngineHandle) {
        let raw = handle.as_ptr();
        let removed = self.state.lock().live.remove(&(raw as usize));
        let Some(mut transfer) = removed else {
            self.invalid_destroys.fetch_add(1, Ordering::SeqCst);
            return;
        };
        // The native engine reports connection shutdown while the handle is
        // being cleaned up, so the callbacks are still wired at this point.
        let verbose = transfer.record.has(&RecordedOption::Verbose(true));
        let closing = format!("Closing connection {}\n", transfer.record.serial);
        Self::debug(&transfer.slots, raw, verbose, DebugKind::Text, &closing);

        transfer.record.destroy_count += 1;
        self.state.lock().history.push(transfer.record);
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        drop(Box::from_raw(raw as *mut u64));
    }

    fn describe(&self, code: EngineCode) -> String {
        match code {
            EngineCode::OPERATION_TIMEDOUT => "Timeout was reached".to_string(),
            EngineCode::ABORTED_BY_CALLBACK => "Operation was aborted by an application callback".to_string(),
            EngineCode::WRITE_ERROR => "Failed writing received data to disk/application".to_string(),
            EngineCode::COULDNT_CONNECT => "Couldn't connect to server".to_string(),
            EngineCode::FAILED_INIT => "Failed initialization".to_string(),
            other => format!("scripted engine error {}", other.0),
        }
    }
}
