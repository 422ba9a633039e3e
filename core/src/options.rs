/*
 * options.rs
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

//! Typed option registry: the setopt side of a transfer handle.
//!
//! Every option identifier has exactly one accepted value kind. Values are validated when they
//! are set, never at execution time, and a value of the wrong kind is rejected rather than
//! coerced. Raw identifiers use a kind-offset numbering so that a C caller can pass them
//! through unchanged:
//!
//! - `0 + n`: long (integer, booleans as 0/1)
//! - `10000 + n`: object (string, string list, blob, opaque pointer)
//! - `20000 + n`: function (callback)
//! - `30000 + n`: 64-bit integer

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::uri;

const LONG: u32 = 0;
const OBJECT: u32 = 10_000;
const FUNCTION: u32 = 20_000;
const INT64: u32 = 30_000;

/// Option identifiers accepted by [`OptionRegistry::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OptionId {
    NoBody = LONG + 44,
    FollowRedirects = LONG + 52,
    TlsVerify = LONG + 64,
    MaxRedirects = LONG + 68,
    TimeoutMs = LONG + 155,
    ConnectTimeoutMs = LONG + 156,
    MaxRetries = LONG + 300,
    UserData = OBJECT + 1,
    Url = OBJECT + 2,
    UserPwd = OBJECT + 5,
    UserAgent = OBJECT + 18,
    Headers = OBJECT + 23,
    Method = OBJECT + 36,
    PostFields = OBJECT + 165,
    UnixSocketPath = OBJECT + 231,
    WriteCallback = FUNCTION + 11,
    HeaderCallback = FUNCTION + 79,
    PostFieldSize = INT64 + 120,
}

/// All option identifiers, in raw-id order.
pub const ALL_OPTIONS: [OptionId; 18] = [
    OptionId::NoBody,
    OptionId::FollowRedirects,
    OptionId::TlsVerify,
    OptionId::MaxRedirects,
    OptionId::TimeoutMs,
    OptionId::ConnectTimeoutMs,
    OptionId::MaxRetries,
    OptionId::UserData,
    OptionId::Url,
    OptionId::UserPwd,
    OptionId::UserAgent,
    OptionId::Headers,
    OptionId::Method,
    OptionId::PostFields,
    OptionId::UnixSocketPath,
    OptionId::WriteCallback,
    OptionId::HeaderCallback,
    OptionId::PostFieldSize,
];

/// The single value kind an option accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Long,
    Int64,
    Str,
    List,
    Blob,
    Callback,
    Pointer,
}

impl OptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OptionKind::Long => "long",
            OptionKind::Int64 => "64-bit integer",
            OptionKind::Str => "string",
            OptionKind::List => "string list",
            OptionKind::Blob => "blob",
            OptionKind::Callback => "callback",
            OptionKind::Pointer => "pointer",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OptionId {
    /// Look up an option by its raw numeric identifier.
    pub fn from_raw(raw: u32) -> Result<OptionId> {
        ALL_OPTIONS
            .iter()
            .copied()
            .find(|id| id.raw() == raw)
            .ok_or(Error::UnknownOption(raw))
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn kind(self) -> OptionKind {
        match self {
            OptionId::NoBody
            | OptionId::FollowRedirects
            | OptionId::TlsVerify
            | OptionId::MaxRedirects
            | OptionId::TimeoutMs
            | OptionId::ConnectTimeoutMs
            | OptionId::MaxRetries => OptionKind::Long,
            OptionId::Url
            | OptionId::UserPwd
            | OptionId::UserAgent
            | OptionId::Method
            | OptionId::UnixSocketPath => OptionKind::Str,
            OptionId::Headers => OptionKind::List,
            OptionId::PostFields => OptionKind::Blob,
            OptionId::UserData => OptionKind::Pointer,
            OptionId::WriteCallback | OptionId::HeaderCallback => OptionKind::Callback,
            OptionId::PostFieldSize => OptionKind::Int64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OptionId::NoBody => "NO_BODY",
            OptionId::FollowRedirects => "FOLLOW_REDIRECTS",
            OptionId::TlsVerify => "TLS_VERIFY",
            OptionId::MaxRedirects => "MAX_REDIRECTS",
            OptionId::TimeoutMs => "TIMEOUT_MS",
            OptionId::ConnectTimeoutMs => "CONNECT_TIMEOUT_MS",
            OptionId::MaxRetries => "MAX_RETRIES",
            OptionId::UserData => "USER_DATA",
            OptionId::Url => "URL",
            OptionId::UserPwd => "USERPWD",
            OptionId::UserAgent => "USER_AGENT",
            OptionId::Headers => "HEADERS",
            OptionId::Method => "METHOD",
            OptionId::PostFields => "POST_FIELDS",
            OptionId::UnixSocketPath => "UNIX_SOCKET_PATH",
            OptionId::WriteCallback => "WRITE_CALLBACK",
            OptionId::HeaderCallback => "HEADER_CALLBACK",
            OptionId::PostFieldSize => "POST_FIELD_SIZE",
        }
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque caller data handed back to every callback invocation.
#[derive(Clone)]
pub struct UserData(Arc<dyn Any + Send + Sync>);

impl UserData {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &UserData) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for UserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserData({:p})", Arc::as_ptr(&self.0))
    }
}

type CallbackFn = dyn FnMut(&[u8], Option<&UserData>) -> usize + Send;

/// Streaming callback: receives a chunk and the handle's user data, returns the number of
/// bytes consumed. Returning less than the chunk length aborts the transfer.
pub struct TransferCallback(Box<CallbackFn>);

impl TransferCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(&[u8], Option<&UserData>) -> usize + Send + 'static,
    {
        Self(Box::new(f))
    }

    pub fn call(&mut self, data: &[u8], user_data: Option<&UserData>) -> usize {
        (self.0)(data, user_data)
    }

    fn same_as(&self, other: &TransferCallback) -> bool {
        std::ptr::addr_eq(&*self.0 as *const CallbackFn, &*other.0 as *const CallbackFn)
    }
}

impl fmt::Debug for TransferCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferCallback({:p})", &*self.0 as *const CallbackFn)
    }
}

/// A typed option value.
#[derive(Debug)]
pub enum OptionValue {
    Long(i64),
    Int64(i64),
    Str(String),
    List(Vec<String>),
    Blob(Vec<u8>),
    Callback(TransferCallback),
    Pointer(UserData),
}

impl OptionValue {
    pub fn kind(&self) -> OptionKind {
        match self {
            OptionValue::Long(_) => OptionKind::Long,
            OptionValue::Int64(_) => OptionKind::Int64,
            OptionValue::Str(_) => OptionKind::Str,
            OptionValue::List(_) => OptionKind::List,
            OptionValue::Blob(_) => OptionKind::Blob,
            OptionValue::Callback(_) => OptionKind::Callback,
            OptionValue::Pointer(_) => OptionKind::Pointer,
        }
    }
}

impl PartialEq for OptionValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OptionValue::Long(a), OptionValue::Long(b)) => a == b,
            (OptionValue::Int64(a), OptionValue::Int64(b)) => a == b,
            (OptionValue::Str(a), OptionValue::Str(b)) => a == b,
            (OptionValue::List(a), OptionValue::List(b)) => a == b,
            (OptionValue::Blob(a), OptionValue::Blob(b)) => a == b,
            (OptionValue::Callback(a), OptionValue::Callback(b)) => a.same_as(b),
            (OptionValue::Pointer(a), OptionValue::Pointer(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Per-handle option store.
#[derive(Debug, Default)]
pub struct OptionRegistry {
    values: HashMap<OptionId, OptionValue>,
}

impl OptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a value. The previous value for `id` is replaced.
    pub fn set(&mut self, id: OptionId, value: OptionValue) -> Result<()> {
        if value.kind() != id.kind() {
            return Err(Error::invalid_option(
                id,
                format!("expected {}, got {}", id.kind(), value.kind()),
            ));
        }
        validate(id, &value)?;
        self.values.insert(id, value);
        Ok(())
    }

    /// Like [`set`](Self::set) but with a raw identifier, as passed through the C interface.
    pub fn set_raw(&mut self, raw: u32, value: OptionValue) -> Result<()> {
        let id = OptionId::from_raw(raw)?;
        self.set(id, value)
    }

    pub fn get(&self, id: OptionId) -> Option<&OptionValue> {
        self.values.get(&id)
    }

    /// Restore the default for one option.
    pub fn unset(&mut self, id: OptionId) {
        self.values.remove(&id);
    }

    /// Restore defaults for every option.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn long(&self, id: OptionId) -> Option<i64> {
        match self.values.get(&id) {
            Some(OptionValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn flag(&self, id: OptionId, default: bool) -> bool {
        self.long(id).map(|v| v != 0).unwrap_or(default)
    }

    pub fn int64(&self, id: OptionId) -> Option<i64> {
        match self.values.get(&id) {
            Some(OptionValue::Int64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, id: OptionId) -> Option<&str> {
        match self.values.get(&id) {
            Some(OptionValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn list(&self, id: OptionId) -> &[String] {
        match self.values.get(&id) {
            Some(OptionValue::List(l)) => l.as_slice(),
            _ => &[],
        }
    }

    pub fn blob(&self, id: OptionId) -> Option<&[u8]> {
        match self.values.get(&id) {
            Some(OptionValue::Blob(b)) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn user_data(&self) -> Option<UserData> {
        match self.values.get(&OptionId::UserData) {
            Some(OptionValue::Pointer(p)) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn callback_mut(&mut self, id: OptionId) -> Option<&mut TransferCallback> {
        match self.values.get_mut(&id) {
            Some(OptionValue::Callback(cb)) => Some(cb),
            _ => None,
        }
    }
}

fn has_line_break(s: &str) -> bool {
    s.contains('\r') || s.contains('\n') || s.contains('\0')
}

pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Per-option checks beyond the value kind.
fn validate(id: OptionId, value: &OptionValue) -> Result<()> {
    match (id, value) {
        (OptionId::Url, OptionValue::Str(s)) => {
            uri::parse_url(s).map_err(|reason| Error::invalid_option(id, reason))?;
        }
        (OptionId::Method, OptionValue::Str(s)) => {
            if !is_token(s) {
                return Err(Error::invalid_option(id, format!("{:?} is not a method token", s)));
            }
        }
        (OptionId::Headers, OptionValue::List(lines)) => {
            for line in lines {
                validate_header_line(line).map_err(|reason| Error::invalid_option(id, reason))?;
            }
        }
        (OptionId::UserAgent | OptionId::UserPwd, OptionValue::Str(s)) => {
            if has_line_break(s) {
                return Err(Error::invalid_option(id, "value contains a line break"));
            }
        }
        (OptionId::UnixSocketPath, OptionValue::Str(s)) => {
            if s.is_empty() {
                return Err(Error::invalid_option(id, "empty path"));
            }
        }
        (OptionId::TimeoutMs | OptionId::ConnectTimeoutMs | OptionId::MaxRetries, OptionValue::Long(v)) => {
            if *v < 0 {
                return Err(Error::invalid_option(id, format!("{} is negative", v)));
            }
        }
        (OptionId::MaxRedirects, OptionValue::Long(v)) => {
            if *v < -1 {
                return Err(Error::invalid_option(id, format!("{} is below -1", v)));
            }
        }
        (OptionId::PostFieldSize, OptionValue::Int64(v)) => {
            if *v < -1 {
                return Err(Error::invalid_option(id, format!("{} is below -1", v)));
            }
        }
        _ => {}
    }
    Ok(())
}

/// `Name: value`, or `Name:` to suppress a default header.
fn validate_header_line(line: &str) -> std::result::Result<(), String> {
    if has_line_break(line) {
        return Err(format!("header {:?} contains a line break", line));
    }
    let colon = line
        .find(':')
        .ok_or_else(|| format!("header {:?} has no colon", line))?;
    if !is_token(&line[..colon]) {
        return Err(format!("header name {:?} is not a token", &line[..colon]));
    }
    Ok(())
}
