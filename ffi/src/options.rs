//! `EngineOption` to `curl_easy_setopt` translation.
//!
//! Strings are copied by libcurl. Lists are not: every `curl_slist` built here
//! is parked on the owning `CurlHandle` and freed when the handle is
//! destroyed.

use std::ffi::{c_void, CString};
use std::os::raw::c_long;
use std::time::Duration;

use curl_sys::{curl_off_t, curl_slist, CURLcode, CURLoption, CURL};
use h3bridge_core::engine::{EngineOption, HttpVersion};

/// Progress callback with `curl_off_t` arguments. `curl-sys` only carries the
/// older `double` variant.
pub(crate) const CURLOPT_XFERINFOFUNCTION: CURLoption = curl_sys::CURLOPTTYPE_FUNCTIONPOINT + 219;

/// A libcurl easy handle plus the header and resolve lists it references.
pub(crate) struct CurlHandle {
    pub(crate) easy: *mut CURL,
    lists: Vec<*mut curl_slist>,
}

impl CurlHandle {
    pub(crate) fn new(easy: *mut CURL) -> Self {
        Self {
            easy,
            lists: Vec::new(),
        }
    }

    /// # Safety
    /// `self.easy` must be a live easy handle.
    pub(crate) unsafe fn apply(&mut self, option: EngineOption<'_>) -> CURLcode {
        use curl_sys::*;

        unsafe {
            match option {
                EngineOption::Url(url) => self.set_str(CURLOPT_URL, url),
                EngineOption::CaPath(path) => self.set_str(CURLOPT_CAPATH, path),
                EngineOption::SslVerifyPeer(on) => self.set_long(CURLOPT_SSL_VERIFYPEER, on.into()),
                // 2 is the only "verify" value libcurl accepts for the host check.
                EngineOption::SslVerifyHost(on) => {
                    self.set_long(CURLOPT_SSL_VERIFYHOST, if on { 2 } else { 0 })
                }
                EngineOption::HttpVersion(version) => {
                    self.set_long(CURLOPT_HTTP_VERSION, http_version(version))
                }
                EngineOption::Verbose(on) => self.set_long(CURLOPT_VERBOSE, on.into()),
                EngineOption::HttpGet => self.set_long(CURLOPT_HTTPGET, 1),
                EngineOption::Post => self.set_long(CURLOPT_POST, 1),
                EngineOption::Upload => self.set_long(CURLOPT_UPLOAD, 1),
                EngineOption::NoBody => self.set_long(CURLOPT_NOBODY, 1),
                EngineOption::CustomRequest(method) => self.set_str(CURLOPT_CUSTOMREQUEST, method),
                EngineOption::HttpHeader(lines) => self.set_list(CURLOPT_HTTPHEADER, lines),
                EngineOption::InFileSize(size) => self.set_off(CURLOPT_INFILESIZE_LARGE, size),
                EngineOption::PostFieldSize(size) => self.set_off(CURLOPT_POSTFIELDSIZE_LARGE, size),
                EngineOption::Resolve(entries) => self.set_list(CURLOPT_RESOLVE, entries),
                EngineOption::NoSignal(on) => self.set_long(CURLOPT_NOSIGNAL, on.into()),
                EngineOption::TransferEncoding(on) => {
                    self.set_long(CURLOPT_TRANSFER_ENCODING, on.into())
                }
                EngineOption::TcpKeepAlive(on) => self.set_long(CURLOPT_TCP_KEEPALIVE, on.into()),
                EngineOption::Timeout(d) => self.set_long(CURLOPT_TIMEOUT_MS, millis(d)),
                EngineOption::ConnectTimeout(d) => {
                    self.set_long(CURLOPT_CONNECTTIMEOUT_MS, millis(d))
                }
                EngineOption::NoProgress(on) => self.set_long(CURLOPT_NOPROGRESS, on.into()),
                EngineOption::HeaderFunction(f) => {
                    self.set_ptr(CURLOPT_HEADERFUNCTION, f as *const c_void)
                }
                EngineOption::HeaderData(d) => self.set_ptr(CURLOPT_HEADERDATA, d),
                EngineOption::WriteFunction(f) => {
                    self.set_ptr(CURLOPT_WRITEFUNCTION, f as *const c_void)
                }
                EngineOption::WriteData(d) => self.set_ptr(CURLOPT_WRITEDATA, d),
                EngineOption::ReadFunction(f) => self.set_ptr(CURLOPT_READFUNCTION, f as *const c_void),
                EngineOption::ReadData(d) => self.set_ptr(CURLOPT_READDATA, d),
                EngineOption::ProgressFunction(f) => {
                    self.set_ptr(CURLOPT_XFERINFOFUNCTION, f as *const c_void)
                }
                // XFERINFODATA shares its slot with PROGRESSDATA.
                EngineOption::ProgressData(d) => self.set_ptr(CURLOPT_PROGRESSDATA, d),
                EngineOption::DebugFunction(f) => {
                    self.set_ptr(CURLOPT_DEBUGFUNCTION, f as *const c_void)
                }
                EngineOption::DebugData(d) => self.set_ptr(CURLOPT_DEBUGDATA, d),
            }
        }
    }

    unsafe fn set_long(&mut self, option: CURLoption, value: c_long) -> CURLcode {
        unsafe { curl_sys::curl_easy_setopt(self.easy, option, value) }
    }

    unsafe fn set_off(&mut self, option: CURLoption, value: i64) -> CURLcode {
        unsafe { curl_sys::curl_easy_setopt(self.easy, option, value as curl_off_t) }
    }

    unsafe fn set_ptr(&mut self, option: CURLoption, value: *const c_void) -> CURLcode {
        unsafe { curl_sys::curl_easy_setopt(self.easy, option, value) }
    }

    unsafe fn set_str(&mut self, option: CURLoption, value: &str) -> CURLcode {
        let Ok(value) = CString::new(value) else {
            return curl_sys::CURLE_BAD_FUNCTION_ARGUMENT;
        };
        unsafe { curl_sys::curl_easy_setopt(self.easy, option, value.as_ptr()) }
    }

    unsafe fn set_list(&mut self, option: CURLoption, items: &[String]) -> CURLcode {
        let mut list: *mut curl_slist = std::ptr::null_mut();
        for item in items {
            let Ok(item) = CString::new(item.as_str()) else {
                unsafe { curl_sys::curl_slist_free_all(list) };
                return curl_sys::CURLE_BAD_FUNCTION_ARGUMENT;
            };
            let next = unsafe { curl_sys::curl_slist_append(list, item.as_ptr()) };
            if next.is_null() {
                unsafe { curl_sys::curl_slist_free_all(list) };
                return curl_sys::CURLE_OUT_OF_MEMORY;
            }
            list = next;
        }
        let code = unsafe { curl_sys::curl_easy_setopt(self.easy, option, list) };
        if code == curl_sys::CURLE_OK {
            if !list.is_null() {
                self.lists.push(list);
            }
        } else {
            unsafe { curl_sys::curl_slist_free_all(list) };
        }
        code
    }

    /// Clean up the easy handle, then the lists it referenced.
    ///
    /// # Safety
    /// Must be called exactly once; `self.easy` is dangling afterwards.
    pub(crate) unsafe fn release(&mut self) {
        unsafe {
            curl_sys::curl_easy_cleanup(self.easy);
            for list in self.lists.drain(..) {
                curl_sys::curl_slist_free_all(list);
            }
        }
    }
}

fn http_version(version: HttpVersion) -> c_long {
    let raw = match version {
        HttpVersion::Http11 => curl_sys::CURL_HTTP_VERSION_1_1,
        HttpVersion::Http2 => curl_sys::CURL_HTTP_VERSION_2_0,
        HttpVersion::Http3 => curl_sys::CURL_HTTP_VERSION_3,
    };
    raw as c_long
}

fn millis(d: Duration) -> c_long {
    d.as_millis().min(c_long::MAX as u128) as c_long
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_versions_use_libcurl_values() {
        assert_eq!(http_version(HttpVersion::Http11), 2);
        assert_eq!(http_version(HttpVersion::Http2), 3);
        assert_eq!(http_version(HttpVersion::Http3), 30);
    }

    #[test]
    fn progress_slot_is_the_off_t_variant() {
        assert_eq!(CURLOPT_XFERINFOFUNCTION, 20_219);
        assert_ne!(CURLOPT_XFERINFOFUNCTION, curl_sys::CURLOPT_PROGRESSFUNCTION);
    }

    #[test]
    fn timeouts_are_clamped_milliseconds() {
        assert_eq!(millis(Duration::from_secs(64)), 64_000);
        assert_eq!(millis(Duration::from_millis(1)), 1);
        assert!(millis(Duration::MAX) > 0);
    }
}
