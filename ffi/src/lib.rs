/*
 * lib.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Ferrocurl, an HTTP(S) transfer library.
 *
 * Ferrocurl is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Ferrocurl is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Ferrocurl.  If not, see <http://www.gnu.org/licenses/>.
 */

//! C FFI for ferrocurl core. Easy handles and multi handles are opaque pointers.
//! Functions returning `c_int` return 0 on success or the error's stable code; the message of
//! the last failure on the calling thread is available from `ferrocurl_last_error`.
//! All string parameters are UTF-8 NUL-terminated.

use libc::{c_char, c_int, c_long, c_uint, c_void, size_t};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::ptr;
use std::time::Duration;

use ferrocurl_core::{
    Error, InfoId, Multi, OptionId, OptionKind, OptionValue, TransferCallback,
    TransferHandle, TransferId, UserData,
};

/// C callback: `size_t (*)(char *ptr, size_t size, size_t nmemb, void *userdata)`.
/// Must return `size * nmemb` to continue; anything else aborts the transfer.
pub type FerrocurlCallback = unsafe extern "C" fn(*mut c_char, size_t, size_t, *mut c_void) -> size_t;

/// Singly linked list of strings, used for request headers and returned header lists.
#[repr(C)]
pub struct FerrocurlSlist {
    pub data: *mut c_char,
    pub next: *mut FerrocurlSlist,
}

/// Opaque easy handle. While added to a multi handle its transfer lives in the multi.
pub struct FerrocurlEasy {
    handle: Option<TransferHandle>,
    attached: Option<(*const Multi, TransferId)>,
}

/// Opaque multi handle.
pub struct FerrocurlMulti {
    multi: Multi,
    easies: HashMap<TransferId, *mut FerrocurlEasy>,
}

/// Caller's `void *` carried as option user data. Only handed back to the caller's callbacks.
#[derive(Clone, Copy)]
struct SendableUserData(*mut c_void);
unsafe impl Send for SendableUserData {}
unsafe impl Sync for SendableUserData {}

fn ptr_to_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string()) }
}

thread_local! {
    static LAST_ERROR: std::cell::RefCell<Option<CString>> = std::cell::RefCell::new(None);
}

fn set_last_error(err: &Error) {
    set_last_error_message(&err.to_string());
}

fn set_last_error_message(message: &str) {
    let msg = CString::new(message).unwrap_or_else(|_| CString::from(c"(error)"));
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(msg));
}

fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}

/// Record the outcome of a call and turn it into a return code.
fn report(result: Result<(), Error>) -> c_int {
    match result {
        Ok(()) => {
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(&e);
            e.code()
        }
    }
}

const BAD_ARGUMENT: c_int = 43;

fn bad_argument(what: &str) -> c_int {
    set_last_error_message(what);
    BAD_ARGUMENT
}

impl FerrocurlEasy {
    fn handle_mut(&mut self) -> Result<&mut TransferHandle, Error> {
        match (&mut self.handle, self.attached) {
            (Some(h), None) => Ok(h),
            (_, Some((_, id))) => Err(Error::TransferBusy(id.0)),
            (None, None) => Err(Error::UnknownTransfer(0)),
        }
    }

    /// Read access, also while the transfer sits finished or queued in a multi handle.
    unsafe fn with_handle<R>(&self, f: impl FnOnce(&TransferHandle) -> Result<R, Error>) -> Result<R, Error> {
        if let Some(h) = &self.handle {
            return f(h);
        }
        match self.attached {
            Some((multi, id)) => match (*multi).handle(id) {
                Some(h) => f(h),
                None => Err(Error::TransferBusy(id.0)),
            },
            None => Err(Error::UnknownTransfer(0)),
        }
    }
}

fn string_list(mut node: *const FerrocurlSlist) -> Vec<String> {
    let mut out = Vec::new();
    while !node.is_null() {
        unsafe {
            if let Some(s) = ptr_to_str((*node).data) {
                out.push(s);
            }
            node = (*node).next;
        }
    }
    out
}

fn slist_from(items: &[String]) -> *mut FerrocurlSlist {
    let mut head: *mut FerrocurlSlist = ptr::null_mut();
    for item in items.iter().rev() {
        let data = CString::new(item.as_str()).unwrap_or_default().into_raw();
        head = Box::into_raw(Box::new(FerrocurlSlist { data, next: head }));
    }
    head
}

fn c_callback(cb: FerrocurlCallback) -> TransferCallback {
    TransferCallback::new(move |data: &[u8], user_data: Option<&UserData>| {
        let userdata = user_data
            .and_then(|u| u.downcast_ref::<SendableUserData>())
            .map(|u| u.0)
            .unwrap_or(ptr::null_mut());
        unsafe { cb(data.as_ptr() as *mut c_char, 1, data.len(), userdata) }
    })
}

/// Version string (static, do not free).
#[no_mangle]
pub extern "C" fn ferrocurl_version() -> *const c_char {
    c"0.1.0".as_ptr()
}

/// Last error message from a failed call on this thread. Valid until the next FFI call. Do not free.
#[no_mangle]
pub extern "C" fn ferrocurl_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(ptr::null())
    })
}

/// Static description of a return code. Do not free.
#[no_mangle]
pub extern "C" fn ferrocurl_easy_strerror(code: c_int) -> *const c_char {
    let s: &'static CStr = match code {
        0 => c"no error",
        1 => c"unsupported URL scheme",
        3 => c"malformed URL",
        6 => c"could not resolve host",
        7 => c"could not connect to host",
        8 => c"HTTP protocol error",
        23 => c"transfer aborted by callback",
        28 => c"operation timed out",
        35 => c"TLS handshake failed",
        42 => c"transfer cancelled",
        43 => c"invalid option value",
        47 => c"too many redirects",
        48 => c"unknown option",
        49 => c"info not available",
        50 => c"unknown info",
        51 => c"info requested with the wrong kind",
        52 => c"transport is closed",
        55 => c"failed sending request",
        56 => c"failed receiving data",
        100 => c"unknown transfer",
        101 => c"transfer is in progress",
        102 => c"configuration error",
        _ => c"unknown error",
    };
    s.as_ptr()
}

/// Free a string returned by `ferrocurl_easy_getinfo_cstr`. No-op if ptr is NULL.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------- String lists ----------

/// Append a copy of `data` to `list` (which may be NULL). Returns the list head, or NULL when
/// `data` is NULL or not UTF-8 (the existing list is left untouched).
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_slist_append(list: *mut FerrocurlSlist, data: *const c_char) -> *mut FerrocurlSlist {
    let Some(s) = ptr_to_str(data) else {
        set_last_error_message("slist item is NULL or not UTF-8");
        return ptr::null_mut();
    };
    let Ok(s) = CString::new(s) else {
        return ptr::null_mut();
    };
    let node = Box::into_raw(Box::new(FerrocurlSlist {
        data: s.into_raw(),
        next: ptr::null_mut(),
    }));
    if list.is_null() {
        return node;
    }
    let mut last = list;
    while !(*last).next.is_null() {
        last = (*last).next;
    }
    (*last).next = node;
    list
}

/// Free every node and string of a list. No-op if list is NULL.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_slist_free_all(list: *mut FerrocurlSlist) {
    let mut node = list;
    while !node.is_null() {
        let boxed = Box::from_raw(node);
        if !boxed.data.is_null() {
            let _ = CString::from_raw(boxed.data);
        }
        node = boxed.next;
    }
}

// ---------- Easy handles ----------

/// Create an easy handle. Free with `ferrocurl_easy_cleanup`.
#[no_mangle]
pub extern "C" fn ferrocurl_easy_init() -> *mut FerrocurlEasy {
    Box::into_raw(Box::new(FerrocurlEasy {
        handle: Some(TransferHandle::new()),
        attached: None,
    }))
}

/// Free an easy handle. It must first be removed from any multi handle. No-op if NULL.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_cleanup(easy: *mut FerrocurlEasy) {
    if easy.is_null() {
        return;
    }
    if (*easy).attached.is_some() {
        set_last_error_message("easy handle is still added to a multi handle");
        return;
    }
    let _ = Box::from_raw(easy);
}

/// Forget all options and the last transfer's info.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_reset(easy: *mut FerrocurlEasy) -> c_int {
    if easy.is_null() {
        return bad_argument("easy handle is NULL");
    }
    report((*easy).handle_mut().map(|h| h.reset()))
}

/// Perform the transfer, blocking until it completes or fails.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_perform(easy: *mut FerrocurlEasy) -> c_int {
    if easy.is_null() {
        return bad_argument("easy handle is NULL");
    }
    report((*easy).handle_mut().and_then(|h| h.perform()))
}

unsafe fn setopt(easy: *mut FerrocurlEasy, option: c_uint, value: OptionValue) -> c_int {
    if easy.is_null() {
        return bad_argument("easy handle is NULL");
    }
    report((*easy).handle_mut().and_then(|h| h.set_option_raw(option, value)))
}

/// Restore the default of an option whose kind is `kind`, as passed with a NULL value.
unsafe fn unsetopt(easy: *mut FerrocurlEasy, option: c_uint, kind: OptionKind) -> c_int {
    if easy.is_null() {
        return bad_argument("easy handle is NULL");
    }
    let result = OptionId::from_raw(option).and_then(|id| {
        if id.kind() != kind {
            return Err(Error::InvalidOptionValue {
                option: id,
                reason: format!("expected {}, got {}", id.kind(), kind),
            });
        }
        (*easy).handle_mut().map(|h| h.options_mut().unset(id))
    });
    report(result)
}

#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_setopt_long(easy: *mut FerrocurlEasy, option: c_uint, value: c_long) -> c_int {
    setopt(easy, option, OptionValue::Long(value as i64))
}

#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_setopt_int64(easy: *mut FerrocurlEasy, option: c_uint, value: i64) -> c_int {
    setopt(easy, option, OptionValue::Int64(value))
}

/// Set a string option; the string is copied. NULL restores the default.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_setopt_cstr(
    easy: *mut FerrocurlEasy,
    option: c_uint,
    value: *const c_char,
) -> c_int {
    if value.is_null() {
        return unsetopt(easy, option, OptionKind::Str);
    }
    match ptr_to_str(value) {
        Some(s) => setopt(easy, option, OptionValue::Str(s)),
        None => bad_argument("string option is not UTF-8"),
    }
}

/// Set a string list option; the list is copied. NULL restores the default.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_setopt_slist(
    easy: *mut FerrocurlEasy,
    option: c_uint,
    list: *const FerrocurlSlist,
) -> c_int {
    if list.is_null() {
        return unsetopt(easy, option, OptionKind::List);
    }
    setopt(easy, option, OptionValue::List(string_list(list)))
}

/// Set the opaque pointer handed to callbacks. The pointer is never dereferenced here.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_setopt_void(
    easy: *mut FerrocurlEasy,
    option: c_uint,
    value: *mut c_void,
) -> c_int {
    setopt(easy, option, OptionValue::Pointer(UserData::new(SendableUserData(value))))
}

/// Set a write or header callback. NULL restores the default.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_setopt_func(
    easy: *mut FerrocurlEasy,
    option: c_uint,
    cb: Option<FerrocurlCallback>,
) -> c_int {
    match cb {
        Some(cb) => setopt(easy, option, OptionValue::Callback(c_callback(cb))),
        None => unsetopt(easy, option, OptionKind::Callback),
    }
}

/// Set a binary option (request body); `len` bytes are copied. NULL restores the default.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_setopt_blob(
    easy: *mut FerrocurlEasy,
    option: c_uint,
    data: *const u8,
    len: size_t,
) -> c_int {
    if data.is_null() {
        return unsetopt(easy, option, OptionKind::Blob);
    }
    let bytes = std::slice::from_raw_parts(data, len).to_vec();
    setopt(easy, option, OptionValue::Blob(bytes))
}

unsafe fn getinfo<T>(
    easy: *const FerrocurlEasy,
    info: c_uint,
    out: *mut T,
    read: impl FnOnce(&TransferHandle, InfoId) -> Result<T, Error>,
) -> c_int {
    if easy.is_null() || out.is_null() {
        return bad_argument("easy handle or output pointer is NULL");
    }
    let result = InfoId::from_raw(info).and_then(|id| (*easy).with_handle(|h| read(h, id)));
    match result {
        Ok(v) => {
            *out = v;
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(&e);
            e.code()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_getinfo_long(easy: *const FerrocurlEasy, info: c_uint, out: *mut c_long) -> c_int {
    getinfo(easy, info, out, |h, id| h.info_long(id).map(|v| v as c_long))
}

#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_getinfo_int64(easy: *const FerrocurlEasy, info: c_uint, out: *mut i64) -> c_int {
    getinfo(easy, info, out, |h, id| h.info_int64(id))
}

#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_getinfo_double(easy: *const FerrocurlEasy, info: c_uint, out: *mut f64) -> c_int {
    getinfo(easy, info, out, |h, id| h.info_double(id))
}

/// String info. `*out` is newly allocated (free with `ferrocurl_free_string`), or NULL when
/// the value is empty (e.g. no Content-Type).
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_getinfo_cstr(
    easy: *const FerrocurlEasy,
    info: c_uint,
    out: *mut *mut c_char,
) -> c_int {
    getinfo(easy, info, out, |h, id| {
        let value = h.info_str(id)?;
        if value.is_empty() {
            return Ok(ptr::null_mut());
        }
        Ok(CString::new(value).map(CString::into_raw).unwrap_or(ptr::null_mut()))
    })
}

/// List info. `*out` is a newly allocated list (free with `ferrocurl_slist_free_all`), NULL when empty.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_easy_getinfo_slist(
    easy: *const FerrocurlEasy,
    info: c_uint,
    out: *mut *mut FerrocurlSlist,
) -> c_int {
    getinfo(easy, info, out, |h, id| h.info_list(id).map(|items| slist_from(&items)))
}

// ---------- Multi handles ----------

/// Create a multi handle with default limits. Returns NULL on error.
#[no_mangle]
pub extern "C" fn ferrocurl_multi_init() -> *mut FerrocurlMulti {
    match Multi::new() {
        Ok(multi) => {
            clear_last_error();
            Box::into_raw(Box::new(FerrocurlMulti {
                multi,
                easies: HashMap::new(),
            }))
        }
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

/// Add an easy handle. It starts on a later `ferrocurl_multi_perform`.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_multi_add_handle(multi: *mut FerrocurlMulti, easy: *mut FerrocurlEasy) -> c_int {
    if multi.is_null() || easy.is_null() {
        return bad_argument("multi or easy handle is NULL");
    }
    let m = &mut *multi;
    let e = &mut *easy;
    if let Err(err) = e.handle_mut() {
        return report(Err(err));
    }
    let Some(handle) = e.handle.take() else {
        return bad_argument("easy handle has no transfer");
    };
    let id = m.multi.add(handle);
    e.attached = Some((&m.multi as *const Multi, id));
    m.easies.insert(id, easy);
    report(Ok(()))
}

/// Take an easy handle back. Fails with the transfer-busy code while it is in flight.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_multi_remove_handle(multi: *mut FerrocurlMulti, easy: *mut FerrocurlEasy) -> c_int {
    if multi.is_null() || easy.is_null() {
        return bad_argument("multi or easy handle is NULL");
    }
    let m = &mut *multi;
    let e = &mut *easy;
    let Some((owner, id)) = e.attached else {
        return report(Err(Error::UnknownTransfer(0)));
    };
    if owner != &m.multi as *const Multi {
        return report(Err(Error::UnknownTransfer(id.0)));
    }
    match m.multi.remove(id) {
        Ok(handle) => {
            e.handle = Some(handle);
            e.attached = None;
            m.easies.remove(&id);
            report(Ok(()))
        }
        Err(err) => report(Err(err)),
    }
}

/// Drive every transfer as far as it can go without blocking. `*running` (if not NULL)
/// receives the number of transfers not yet finished.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_multi_perform(multi: *mut FerrocurlMulti, running: *mut c_int) -> c_int {
    if multi.is_null() {
        return bad_argument("multi handle is NULL");
    }
    let m = &mut *multi;
    let result = m.multi.perform();
    if !running.is_null() {
        *running = m.multi.pending() as c_int;
    }
    report(result.map(|_| ()))
}

/// Block until a transfer can make progress or `timeout_ms` elapses. `*ready` (if not NULL)
/// receives 1 when woken by activity, 0 on timeout.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_multi_wait(multi: *mut FerrocurlMulti, timeout_ms: c_long, ready: *mut c_int) -> c_int {
    if multi.is_null() {
        return bad_argument("multi handle is NULL");
    }
    let m = &mut *multi;
    let timeout = Duration::from_millis(timeout_ms.max(0) as u64);
    match m.multi.wait(timeout) {
        Ok(woken) => {
            if !ready.is_null() {
                *ready = woken as c_int;
            }
            report(Ok(()))
        }
        Err(e) => report(Err(e)),
    }
}

/// Next finished transfer, in completion order. Returns its easy handle and stores its result
/// code in `*result` (if not NULL); NULL when no completion is pending.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_multi_info_read(multi: *mut FerrocurlMulti, result: *mut c_int) -> *mut FerrocurlEasy {
    if multi.is_null() {
        return ptr::null_mut();
    }
    let m = &mut *multi;
    while let Some(done) = m.multi.info_read() {
        let Some(easy) = m.easies.get(&done.id).copied() else {
            continue;
        };
        if !result.is_null() {
            *result = match &done.result {
                Ok(()) => 0,
                Err(e) => e.code(),
            };
        }
        return easy;
    }
    ptr::null_mut()
}

/// Free a multi handle. Transfers still in flight are cancelled; every added easy handle is
/// detached and stays valid for the caller to clean up. No-op if NULL.
#[no_mangle]
pub unsafe extern "C" fn ferrocurl_multi_cleanup(multi: *mut FerrocurlMulti) {
    if multi.is_null() {
        return;
    }
    let mut m = Box::from_raw(multi);
    let ids: Vec<TransferId> = m.easies.keys().copied().collect();
    for id in &ids {
        let _ = m.multi.cancel(*id);
    }
    // Cancelled transfers resolve on their next poll.
    while m.multi.running() > 0 {
        match m.multi.perform() {
            Ok(0) if m.multi.running() > 0 => break,
            Ok(_) => {}
            Err(err) => {
                set_last_error(&err);
                break;
            }
        }
    }
    for id in ids {
        let Some(easy) = m.easies.remove(&id) else {
            continue;
        };
        let e = &mut *easy;
        e.attached = None;
        match m.multi.remove(id) {
            Ok(handle) => e.handle = Some(handle),
            // The transfer is dropped with the multi; the easy handle is left without one.
            Err(err) => set_last_error(&err),
        }
    }
}
