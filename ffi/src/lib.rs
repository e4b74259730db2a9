//! libcurl binding for `h3bridge-core`.
//!
//! # Overview
//! `CurlEngine` implements `NativeEngine` directly on the libcurl easy
//! interface through `curl-sys`. Requests get HTTP/3 only when the linked
//! libcurl was built with HTTP/3 support; otherwise the version option is
//! rejected and surfaces as `TransportError::OptionRejected`.
//!
//! # Design
//! - One process-wide `EngineRuntime<CurlEngine>` (`shared_runtime`), since
//!   `curl_global_init` and the handle lock are process-wide concerns.
//!   `CurlEngine` has no public constructor, so every libcurl transport goes
//!   through that runtime.
//! - Handles are boxed `CurlHandle`s, so their address is stable and owned
//!   by this crate; the easy pointer and its option lists live inside.

mod options;

use std::ffi::{c_void, CStr};
use std::os::raw::c_long;
use std::sync::{Arc, LazyLock};

use h3bridge_core::engine::{EngineCode, EngineHandle, EngineOption, InfoKey, NativeEngine};
use h3bridge_core::{EngineRuntime, Http3Transport, TransportConfig};

use options::CurlHandle;

/// Not exported by every `curl-sys` release.
const CURLINFO_HTTP_VERSION: curl_sys::CURLINFO = curl_sys::CURLINFO_LONG + 46;

static RUNTIME: LazyLock<Arc<EngineRuntime<CurlEngine>>> =
    LazyLock::new(|| Arc::new(EngineRuntime::new(CurlEngine { _process: () })));

/// The runtime shared by every libcurl transport in the process.
pub fn shared_runtime() -> Arc<EngineRuntime<CurlEngine>> {
    Arc::clone(&RUNTIME)
}

/// An `Http3Transport` on the shared libcurl runtime.
pub fn transport(config: TransportConfig) -> Http3Transport<CurlEngine> {
    Http3Transport::new(shared_runtime(), config)
}

/// Version string of the linked libcurl, e.g. `libcurl/8.5.0 OpenSSL/3.0.13`.
pub fn libcurl_version() -> String {
    // SAFETY: curl_version returns a static NUL-terminated string.
    let raw = unsafe { curl_sys::curl_version() };
    if raw.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
}

/// `NativeEngine` over the libcurl easy interface.
///
/// Only the shared runtime holds one: libcurl's global init and the handle
/// lock must not be duplicated within a process.
#[derive(Debug)]
pub struct CurlEngine {
    _process: (),
}

fn code(raw: curl_sys::CURLcode) -> Result<(), EngineCode> {
    EngineCode(raw as i32).result()
}

/// # Safety
/// `handle` must come from `CurlEngine::create_handle` and still be live.
unsafe fn curl_handle<'a>(handle: EngineHandle) -> &'a mut CurlHandle {
    unsafe { &mut *(handle.as_ptr() as *mut CurlHandle) }
}

impl NativeEngine for CurlEngine {
    fn global_init(&self) -> Result<(), EngineCode> {
        // SAFETY: the runtime's init gate serialises this call.
        code(unsafe { curl_sys::curl_global_init(curl_sys::CURL_GLOBAL_ALL) })?;
        tracing::info!(version = %libcurl_version(), "libcurl initialised");
        Ok(())
    }

    fn create_handle(&self) -> Option<EngineHandle> {
        // SAFETY: called after global init, under the runtime's handle lock.
        let easy = unsafe { curl_sys::curl_easy_init() };
        if easy.is_null() {
            return None;
        }
        let boxed = Box::into_raw(Box::new(CurlHandle::new(easy)));
        EngineHandle::from_ptr(boxed as *mut c_void)
    }

    unsafe fn set_option(&self, handle: EngineHandle, option: EngineOption<'_>) -> Result<(), EngineCode> {
        code(unsafe { curl_handle(handle).apply(option) })
    }

    unsafe fn perform(&self, handle: EngineHandle) -> Result<(), EngineCode> {
        code(unsafe { curl_sys::curl_easy_perform(curl_handle(handle).easy) })
    }

    unsafe fn get_info(&self, handle: EngineHandle, key: InfoKey) -> Result<i64, EngineCode> {
        let info = match key {
            InfoKey::ResponseCode => curl_sys::CURLINFO_RESPONSE_CODE,
            InfoKey::HttpVersion => CURLINFO_HTTP_VERSION,
        };
        let mut value: c_long = 0;
        code(unsafe {
            curl_sys::curl_easy_getinfo(curl_handle(handle).easy, info, &mut value as *mut c_long)
        })?;
        Ok(i64::from(value))
    }

    unsafe fn destroy_handle(&self, handle: EngineHandle) {
        let mut owned = unsafe { Box::from_raw(handle.as_ptr() as *mut CurlHandle) };
        unsafe { owned.release() };
    }

    fn describe(&self, code: EngineCode) -> String {
        // SAFETY: curl_easy_strerror returns a static string for any code.
        let raw = unsafe { curl_sys::curl_easy_strerror(code.0 as curl_sys::CURLcode) };
        if raw.is_null() {
            return format!("libcurl error {}", code.0);
        }
        unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
    }
}
