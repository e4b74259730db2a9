//! C entry points the native engine calls while a transfer is performing.
//!
//! # Design
//! - Each function has the exact signature the engine expects for its slot
//!   and receives the handle identity as userdata.
//! - The owning `TransferContext` is recovered through the global registry.
//!   A miss means the transfer is already being torn down; the entry point
//!   then returns a code that neither corrupts state nor fails the engine.
//! - Bodies run inside `catch_unwind` so panics never cross into C. A caught
//!   panic is reported with the code that makes the engine stop the transfer.

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::context::{TransferContext, WriteOutcome};
use crate::engine::{
    DebugKind, HandleId, PROGRESS_ABORT, PROGRESS_CONTINUE, READ_ABORT, WRITE_PAUSE,
};
use crate::http::{Progress, ProgressAction};
use crate::registry;

fn context_for(userdata: *mut c_void) -> Option<Arc<TransferContext>> {
    let context = registry::global().lookup(HandleId::from_userdata(userdata));
    if context.is_none() {
        tracing::trace!(handle = %HandleId::from_userdata(userdata), "callback for unbound handle");
    }
    context
}

/// View engine-owned memory as a byte slice. Null or empty yields `&[]`.
///
/// # Safety
/// When non-null, `ptr` must be valid for `len` bytes for the returned lifetime.
unsafe fn engine_bytes<'a>(ptr: *const c_char, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr as *const u8, len) }
    }
}

/// Header slot: one raw header line per call.
///
/// # Safety
/// Called by the engine with `size * nmemb` readable bytes at `data`.
pub unsafe extern "C" fn header_callback(
    data: *mut c_char,
    size: usize,
    nmemb: usize,
    userdata: *mut c_void,
) -> usize {
    let len = size.saturating_mul(nmemb);
    catch_unwind(AssertUnwindSafe(|| {
        if let Some(context) = context_for(userdata) {
            context.on_header(unsafe { engine_bytes(data, len) });
        }
        len
    }))
    .unwrap_or(0)
}

/// Write slot: one response body chunk per call.
///
/// # Safety
/// Called by the engine with `size * nmemb` readable bytes at `data`.
pub unsafe extern "C" fn write_callback(
    data: *mut c_char,
    size: usize,
    nmemb: usize,
    userdata: *mut c_void,
) -> usize {
    let len = size.saturating_mul(nmemb);
    catch_unwind(AssertUnwindSafe(|| match context_for(userdata) {
        Some(context) => match context.on_body(unsafe { engine_bytes(data, len) }) {
            WriteOutcome::Accepted => len,
            WriteOutcome::Pause => WRITE_PAUSE,
        },
        None => len,
    }))
    .unwrap_or(0)
}

/// Read slot: fill the engine's upload buffer from the request body.
///
/// # Safety
/// Called by the engine with `size * nmemb` writable bytes at `buffer`.
pub unsafe extern "C" fn read_callback(
    buffer: *mut c_char,
    size: usize,
    nmemb: usize,
    userdata: *mut c_void,
) -> usize {
    let len = size.saturating_mul(nmemb);
    if buffer.is_null() || len == 0 {
        return 0;
    }
    catch_unwind(AssertUnwindSafe(|| match context_for(userdata) {
        Some(context) => {
            let buf = unsafe { std::slice::from_raw_parts_mut(buffer as *mut u8, len) };
            context.on_read(buf).min(len)
        }
        None => 0,
    }))
    .unwrap_or(READ_ABORT)
}

/// Progress slot: cumulative byte counters.
///
/// # Safety
/// Called by the engine; `userdata` is the registered handle identity.
pub unsafe extern "C" fn progress_callback(
    userdata: *mut c_void,
    download_total: i64,
    download_now: i64,
    upload_total: i64,
    upload_now: i64,
) -> c_int {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(context) = context_for(userdata) else {
            return PROGRESS_CONTINUE;
        };
        let progress = Progress {
            download_total,
            download_now,
            upload_total,
            upload_now,
        };
        match context.on_progress(progress) {
            ProgressAction::Continue => PROGRESS_CONTINUE,
            ProgressAction::Abort => PROGRESS_ABORT,
        }
    }))
    .unwrap_or(PROGRESS_ABORT)
}

/// Debug slot: diagnostic text. Never affects the transfer outcome.
///
/// # Safety
/// Called by the engine with `size` readable bytes at `data`.
pub unsafe extern "C" fn debug_callback(
    _native: *mut c_void,
    kind: c_int,
    data: *mut c_char,
    size: usize,
    userdata: *mut c_void,
) -> c_int {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let (Some(kind), Some(context)) = (DebugKind::from_raw(kind), context_for(userdata))
        else {
            return;
        };
        context.on_debug(kind, unsafe { engine_bytes(data, size) });
    }));
    0
}
