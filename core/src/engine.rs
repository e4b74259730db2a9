//! Protocol spoken with the native transfer engine.
//!
//! # Overview
//! The engine is consumed as a black box through five primitives: one-time
//! global initialisation, handle creation, option setting, a blocking perform,
//! post-transfer info queries and handle destruction. Callbacks are registered
//! like any other option, as C function pointers plus an opaque userdata
//! pointer the engine hands back on every invocation.
//!
//! # Design
//! Result codes, sentinels and callback signatures follow the libcurl easy
//! interface so a binding can forward them without translation. Handles are
//! opaque pointers; their address doubles as the identity the callback bridge
//! uses to find the owning transfer.

use std::ffi::c_void;
use std::fmt;
use std::os::raw::{c_char, c_int};
use std::ptr::NonNull;
use std::time::Duration;

/// Result code reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineCode(pub i32);

impl EngineCode {
    pub const OK: EngineCode = EngineCode(0);
    pub const UNSUPPORTED_PROTOCOL: EngineCode = EngineCode(1);
    pub const FAILED_INIT: EngineCode = EngineCode(2);
    pub const URL_MALFORMAT: EngineCode = EngineCode(3);
    pub const COULDNT_RESOLVE_HOST: EngineCode = EngineCode(6);
    pub const COULDNT_CONNECT: EngineCode = EngineCode(7);
    pub const WRITE_ERROR: EngineCode = EngineCode(23);
    pub const READ_ERROR: EngineCode = EngineCode(26);
    pub const OUT_OF_MEMORY: EngineCode = EngineCode(27);
    pub const OPERATION_TIMEDOUT: EngineCode = EngineCode(28);
    pub const ABORTED_BY_CALLBACK: EngineCode = EngineCode(42);
    pub const BAD_FUNCTION_ARGUMENT: EngineCode = EngineCode(43);
    pub const UNKNOWN_OPTION: EngineCode = EngineCode(48);

    pub fn is_ok(self) -> bool {
        self == EngineCode::OK
    }

    /// Turn a raw code into `Ok(())` or `Err(code)`.
    pub fn result(self) -> Result<(), EngineCode> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for EngineCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}", self.0)
    }
}

/// Returned by a write or header callback to pause the transfer.
pub const WRITE_PAUSE: usize = 0x1000_0001;
/// Returned by a read callback to abort the transfer.
pub const READ_ABORT: usize = 0x1000_0000;
pub const PROGRESS_CONTINUE: c_int = 0;
pub const PROGRESS_ABORT: c_int = 1;

/// Header and body callback: `(data, size, nmemb, userdata) -> bytes consumed`.
pub type DataCallback = unsafe extern "C" fn(*mut c_char, usize, usize, *mut c_void) -> usize;
/// Upload callback: `(buffer, size, nmemb, userdata) -> bytes produced`.
pub type ReadCallback = unsafe extern "C" fn(*mut c_char, usize, usize, *mut c_void) -> usize;
/// `(userdata, dltotal, dlnow, ultotal, ulnow) -> 0 to continue`.
pub type ProgressCallback = unsafe extern "C" fn(*mut c_void, i64, i64, i64, i64) -> c_int;
/// `(native handle, info type, data, size, userdata) -> 0`.
pub type DebugCallback =
    unsafe extern "C" fn(*mut c_void, c_int, *mut c_char, usize, *mut c_void) -> c_int;

/// Protocol version requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpVersion {
    Http11,
    Http2,
    #[default]
    Http3,
}

impl HttpVersion {
    /// Label exposed on `Response::protocol`.
    pub fn label(self) -> &'static str {
        match self {
            HttpVersion::Http11 => "HTTP/1.1",
            HttpVersion::Http2 => "HTTP/2",
            HttpVersion::Http3 => "HTTP/3",
        }
    }
}

/// Kind of diagnostic text delivered to the debug callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugKind {
    Text,
    HeaderIn,
    HeaderOut,
    DataIn,
    DataOut,
    SslDataIn,
    SslDataOut,
}

impl DebugKind {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        Some(match raw {
            0 => DebugKind::Text,
            1 => DebugKind::HeaderIn,
            2 => DebugKind::HeaderOut,
            3 => DebugKind::DataIn,
            4 => DebugKind::DataOut,
            5 => DebugKind::SslDataIn,
            6 => DebugKind::SslDataOut,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> c_int {
        match self {
            DebugKind::Text => 0,
            DebugKind::HeaderIn => 1,
            DebugKind::HeaderOut => 2,
            DebugKind::DataIn => 3,
            DebugKind::DataOut => 4,
            DebugKind::SslDataIn => 5,
            DebugKind::SslDataOut => 6,
        }
    }

    /// Payload traffic is not forwarded to debug sinks, only protocol text.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            DebugKind::Text | DebugKind::HeaderIn | DebugKind::HeaderOut
        )
    }
}

/// A single option applied to a handle before perform.
///
/// Borrowed values only need to outlive the `set_option` call; bindings copy
/// whatever the engine keeps referencing.
#[derive(Debug, Clone, Copy)]
pub enum EngineOption<'a> {
    Url(&'a str),
    CaPath(&'a str),
    SslVerifyPeer(bool),
    SslVerifyHost(bool),
    HttpVersion(HttpVersion),
    Verbose(bool),
    HttpGet,
    Post,
    Upload,
    NoBody,
    CustomRequest(&'a str),
    HttpHeader(&'a [String]),
    InFileSize(i64),
    PostFieldSize(i64),
    Resolve(&'a [String]),
    NoSignal(bool),
    TransferEncoding(bool),
    TcpKeepAlive(bool),
    Timeout(Duration),
    ConnectTimeout(Duration),
    NoProgress(bool),
    HeaderFunction(DataCallback),
    HeaderData(*mut c_void),
    WriteFunction(DataCallback),
    WriteData(*mut c_void),
    ReadFunction(ReadCallback),
    ReadData(*mut c_void),
    ProgressFunction(ProgressCallback),
    ProgressData(*mut c_void),
    DebugFunction(DebugCallback),
    DebugData(*mut c_void),
}

impl EngineOption<'_> {
    pub fn key(&self) -> OptionKey {
        match self {
            EngineOption::Url(_) => OptionKey::Url,
            EngineOption::CaPath(_) => OptionKey::CaPath,
            EngineOption::SslVerifyPeer(_) => OptionKey::SslVerifyPeer,
            EngineOption::SslVerifyHost(_) => OptionKey::SslVerifyHost,
            EngineOption::HttpVersion(_) => OptionKey::HttpVersion,
            EngineOption::Verbose(_) => OptionKey::Verbose,
            EngineOption::HttpGet => OptionKey::HttpGet,
            EngineOption::Post => OptionKey::Post,
            EngineOption::Upload => OptionKey::Upload,
            EngineOption::NoBody => OptionKey::NoBody,
            EngineOption::CustomRequest(_) => OptionKey::CustomRequest,
            EngineOption::HttpHeader(_) => OptionKey::HttpHeader,
            EngineOption::InFileSize(_) => OptionKey::InFileSize,
            EngineOption::PostFieldSize(_) => OptionKey::PostFieldSize,
            EngineOption::Resolve(_) => OptionKey::Resolve,
            EngineOption::NoSignal(_) => OptionKey::NoSignal,
            EngineOption::TransferEncoding(_) => OptionKey::TransferEncoding,
            EngineOption::TcpKeepAlive(_) => OptionKey::TcpKeepAlive,
            EngineOption::Timeout(_) => OptionKey::Timeout,
            EngineOption::ConnectTimeout(_) => OptionKey::ConnectTimeout,
            EngineOption::NoProgress(_) => OptionKey::NoProgress,
            EngineOption::HeaderFunction(_) => OptionKey::HeaderFunction,
            EngineOption::HeaderData(_) => OptionKey::HeaderData,
            EngineOption::WriteFunction(_) => OptionKey::WriteFunction,
            EngineOption::WriteData(_) => OptionKey::WriteData,
            EngineOption::ReadFunction(_) => OptionKey::ReadFunction,
            EngineOption::ReadData(_) => OptionKey::ReadData,
            EngineOption::ProgressFunction(_) => OptionKey::ProgressFunction,
            EngineOption::ProgressData(_) => OptionKey::ProgressData,
            EngineOption::DebugFunction(_) => OptionKey::DebugFunction,
            EngineOption::DebugData(_) => OptionKey::DebugData,
        }
    }
}

/// Option identity without its value, used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    Url,
    CaPath,
    SslVerifyPeer,
    SslVerifyHost,
    HttpVersion,
    Verbose,
    HttpGet,
    Post,
    Upload,
    NoBody,
    CustomRequest,
    HttpHeader,
    InFileSize,
    PostFieldSize,
    Resolve,
    NoSignal,
    TransferEncoding,
    TcpKeepAlive,
    Timeout,
    ConnectTimeout,
    NoProgress,
    HeaderFunction,
    HeaderData,
    WriteFunction,
    WriteData,
    ReadFunction,
    ReadData,
    ProgressFunction,
    ProgressData,
    DebugFunction,
    DebugData,
}

impl OptionKey {
    pub fn name(self) -> &'static str {
        match self {
            OptionKey::Url => "URL",
            OptionKey::CaPath => "CAPATH",
            OptionKey::SslVerifyPeer => "SSL_VERIFYPEER",
            OptionKey::SslVerifyHost => "SSL_VERIFYHOST",
            OptionKey::HttpVersion => "HTTP_VERSION",
            OptionKey::Verbose => "VERBOSE",
            OptionKey::HttpGet => "HTTPGET",
            OptionKey::Post => "POST",
            OptionKey::Upload => "UPLOAD",
            OptionKey::NoBody => "NOBODY",
            OptionKey::CustomRequest => "CUSTOMREQUEST",
            OptionKey::HttpHeader => "HTTPHEADER",
            OptionKey::InFileSize => "INFILESIZE",
            OptionKey::PostFieldSize => "POSTFIELDSIZE",
            OptionKey::Resolve => "RESOLVE",
            OptionKey::NoSignal => "NOSIGNAL",
            OptionKey::TransferEncoding => "TRANSFER_ENCODING",
            OptionKey::TcpKeepAlive => "TCP_KEEPALIVE",
            OptionKey::Timeout => "TIMEOUT",
            OptionKey::ConnectTimeout => "CONNECTTIMEOUT",
            OptionKey::NoProgress => "NOPROGRESS",
            OptionKey::HeaderFunction => "HEADERFUNCTION",
            OptionKey::HeaderData => "HEADERDATA",
            OptionKey::WriteFunction => "WRITEFUNCTION",
            OptionKey::WriteData => "WRITEDATA",
            OptionKey::ReadFunction => "READFUNCTION",
            OptionKey::ReadData => "READDATA",
            OptionKey::ProgressFunction => "XFERINFOFUNCTION",
            OptionKey::ProgressData => "XFERINFODATA",
            OptionKey::DebugFunction => "DEBUGFUNCTION",
            OptionKey::DebugData => "DEBUGDATA",
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Post-transfer values that can be queried from a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKey {
    ResponseCode,
    /// Negotiated version as the engine encodes it; see `negotiated_version`.
    HttpVersion,
}

/// Decode the engine's negotiated-version value (1.0 = 1, 1.1 = 2, 2 = 3, 3 = 30).
pub fn negotiated_version(raw: i64) -> Option<&'static str> {
    match raw {
        1 => Some("HTTP/1.0"),
        2 => Some("HTTP/1.1"),
        3 => Some("HTTP/2"),
        30 => Some("HTTP/3"),
        _ => None,
    }
}

/// Opaque transfer handle owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHandle(NonNull<c_void>);

impl EngineHandle {
    pub fn new(raw: NonNull<c_void>) -> Self {
        Self(raw)
    }

    pub fn from_ptr(raw: *mut c_void) -> Option<Self> {
        NonNull::new(raw).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    pub fn id(self) -> HandleId {
        HandleId(self.0.as_ptr() as usize)
    }
}

/// Identity of a live handle. Passed to the engine as callback userdata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(usize);

impl HandleId {
    pub fn from_userdata(userdata: *mut c_void) -> Self {
        HandleId(userdata as usize)
    }

    pub fn as_userdata(self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A native transfer engine addressed through opaque handles.
///
/// Implementations do not need to be reentrant across handles; the runtime
/// serialises `create_handle` and `destroy_handle`. `perform` blocks the
/// calling thread and invokes the registered callbacks on that same thread.
pub trait NativeEngine: Send + Sync {
    /// Process-wide library initialisation. Called at most once successfully.
    fn global_init(&self) -> Result<(), EngineCode>;

    /// Allocate a fresh handle, or `None` when the engine refuses.
    fn create_handle(&self) -> Option<EngineHandle>;

    /// # Safety
    /// `handle` must come from `create_handle` on this engine and must not
    /// have been destroyed. Function and data pointers registered here must
    /// stay valid until the handle is destroyed.
    unsafe fn set_option(&self, handle: EngineHandle, option: EngineOption<'_>)
        -> Result<(), EngineCode>;

    /// Run the configured transfer to completion.
    ///
    /// # Safety
    /// `handle` must be live and must not be performed concurrently.
    unsafe fn perform(&self, handle: EngineHandle) -> Result<(), EngineCode>;

    /// # Safety
    /// `handle` must be live.
    unsafe fn get_info(&self, handle: EngineHandle, key: InfoKey) -> Result<i64, EngineCode>;

    /// # Safety
    /// `handle` must be live; it is dangling once this returns.
    unsafe fn destroy_handle(&self, handle: EngineHandle);

    /// Human-readable text for a result code.
    fn describe(&self, code: EngineCode) -> String {
        format!("native engine error {}", code.0)
    }
}
