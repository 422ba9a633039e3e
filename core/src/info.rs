/*
 * info.rs
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

//! Read-only transfer information: the getinfo side of a transfer handle.
//!
//! A `TransferInfo` is replaced at the start of every execution and filled in as the transfer
//! progresses. Raw identifiers carry their value kind in the high bits.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

const STRING: u32 = 0x10_0000;
const LONG: u32 = 0x20_0000;
const DOUBLE: u32 = 0x30_0000;
const LIST: u32 = 0x40_0000;
const INT64: u32 = 0x60_0000;
const KIND_MASK: u32 = 0xf0_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum InfoId {
    EffectiveUrl = STRING + 1,
    ContentType = STRING + 18,
    ResponseCode = LONG + 2,
    HeaderSize = LONG + 11,
    RedirectCount = LONG + 20,
    NumConnects = LONG + 26,
    TotalTimeMs = LONG + 60,
    ConnectTimeMs = LONG + 61,
    TotalTime = DOUBLE + 3,
    ResponseHeaders = LIST + 60,
    SizeDownload = INT64 + 8,
    ContentLength = INT64 + 15,
}

pub const ALL_INFO: [InfoId; 12] = [
    InfoId::EffectiveUrl,
    InfoId::ContentType,
    InfoId::ResponseCode,
    InfoId::HeaderSize,
    InfoId::RedirectCount,
    InfoId::NumConnects,
    InfoId::TotalTimeMs,
    InfoId::ConnectTimeMs,
    InfoId::TotalTime,
    InfoId::ResponseHeaders,
    InfoId::SizeDownload,
    InfoId::ContentLength,
];

impl InfoId {
    pub fn from_raw(raw: u32) -> Result<InfoId> {
        ALL_INFO
            .iter()
            .copied()
            .find(|id| *id as u32 == raw)
            .ok_or(Error::UnknownInfo(raw))
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Kind name of the value this identifier yields.
    pub fn kind(self) -> &'static str {
        match self.raw() & KIND_MASK {
            STRING => "string",
            LONG => "long",
            DOUBLE => "double",
            LIST => "string list",
            _ => "64-bit integer",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InfoId::EffectiveUrl => "EFFECTIVE_URL",
            InfoId::ContentType => "CONTENT_TYPE",
            InfoId::ResponseCode => "RESPONSE_CODE",
            InfoId::HeaderSize => "HEADER_SIZE",
            InfoId::RedirectCount => "REDIRECT_COUNT",
            InfoId::NumConnects => "NUM_CONNECTS",
            InfoId::TotalTimeMs => "TOTAL_TIME_MS",
            InfoId::ConnectTimeMs => "CONNECT_TIME_MS",
            InfoId::TotalTime => "TOTAL_TIME",
            InfoId::ResponseHeaders => "RESPONSE_HEADERS",
            InfoId::SizeDownload => "SIZE_DOWNLOAD",
            InfoId::ContentLength => "CONTENT_LENGTH",
        }
    }
}

impl fmt::Display for InfoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Long(i64),
    Int64(i64),
    Double(f64),
    Str(String),
    List(Vec<String>),
}

/// Everything recorded about the most recent execution of a handle.
#[derive(Debug, Clone, Default)]
pub struct TransferInfo {
    /// Final status code, 0 until a status line has been parsed.
    pub response_code: u16,
    pub effective_url: String,
    pub content_type: Option<String>,
    /// Declared Content-Length of the final response, -1 when absent.
    pub content_length: i64,
    pub redirect_count: u32,
    /// Header bytes received across all responses, including redirects.
    pub header_size: u64,
    /// Body bytes delivered for the final response.
    pub size_download: u64,
    /// Fresh connections opened (pool hits do not count).
    pub num_connects: u32,
    pub connect_time: Duration,
    pub total_time: Duration,
    /// Header lines of the final response, without line terminators.
    pub response_headers: Vec<String>,
}

impl TransferInfo {
    pub(crate) fn new(url: &str) -> Self {
        Self {
            effective_url: url.to_string(),
            content_length: -1,
            ..Self::default()
        }
    }

    pub fn get(&self, id: InfoId) -> InfoValue {
        match id {
            InfoId::EffectiveUrl => InfoValue::Str(self.effective_url.clone()),
            InfoId::ContentType => InfoValue::Str(self.content_type.clone().unwrap_or_default()),
            InfoId::ResponseCode => InfoValue::Long(self.response_code as i64),
            InfoId::HeaderSize => InfoValue::Long(self.header_size as i64),
            InfoId::RedirectCount => InfoValue::Long(self.redirect_count as i64),
            InfoId::NumConnects => InfoValue::Long(self.num_connects as i64),
            InfoId::TotalTimeMs => InfoValue::Long(self.total_time.as_millis() as i64),
            InfoId::ConnectTimeMs => InfoValue::Long(self.connect_time.as_millis() as i64),
            InfoId::TotalTime => InfoValue::Double(self.total_time.as_secs_f64()),
            InfoId::ResponseHeaders => InfoValue::List(self.response_headers.clone()),
            InfoId::SizeDownload => InfoValue::Int64(self.size_download as i64),
            InfoId::ContentLength => InfoValue::Int64(self.content_length),
        }
    }
}

/// Typed accessors over an optional record; `None` means no execution has happened yet.
pub(crate) fn lookup(info: Option<&TransferInfo>, id: InfoId) -> Result<InfoValue> {
    info.map(|i| i.get(id)).ok_or(Error::InfoNotAvailable(id))
}

pub(crate) fn lookup_long(info: Option<&TransferInfo>, id: InfoId) -> Result<i64> {
    match lookup(info, id)? {
        InfoValue::Long(v) => Ok(v),
        _ => Err(Error::BadInfoKind { info: id, requested: "long" }),
    }
}

pub(crate) fn lookup_int64(info: Option<&TransferInfo>, id: InfoId) -> Result<i64> {
    match lookup(info, id)? {
        InfoValue::Int64(v) => Ok(v),
        _ => Err(Error::BadInfoKind { info: id, requested: "64-bit integer" }),
    }
}

pub(crate) fn lookup_double(info: Option<&TransferInfo>, id: InfoId) -> Result<f64> {
    match lookup(info, id)? {
        InfoValue::Double(v) => Ok(v),
        _ => Err(Error::BadInfoKind { info: id, requested: "double" }),
    }
}

pub(crate) fn lookup_str(info: Option<&TransferInfo>, id: InfoId) -> Result<String> {
    match lookup(info, id)? {
        InfoValue::Str(v) => Ok(v),
        _ => Err(Error::BadInfoKind { info: id, requested: "string" }),
    }
}

pub(crate) fn lookup_list(info: Option<&TransferInfo>, id: InfoId) -> Result<Vec<String>> {
    match lookup(info, id)? {
        InfoValue::List(v) => Ok(v),
        _ => Err(Error::BadInfoKind { info: id, requested: "string list" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn not_available_before_first_transfer() {
        for id in ALL_INFO {
            let err = lookup(None, id).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InfoNotAvailable);
        }
    }

    #[test]
    fn typed_lookup_checks_kind() {
        let mut info = TransferInfo::new("http://example.test/");
        info.response_code = 204;
        assert_eq!(lookup_long(Some(&info), InfoId::ResponseCode).unwrap(), 204);
        assert_eq!(lookup_int64(Some(&info), InfoId::ContentLength).unwrap(), -1);
        let err = lookup_str(Some(&info), InfoId::ResponseCode).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadInfoKind);
        assert_eq!(
            lookup_str(Some(&info), InfoId::EffectiveUrl).unwrap(),
            "http://example.test/"
        );
    }

    #[test]
    fn kinds_follow_raw_bits() {
        for id in ALL_INFO {
            assert_eq!(InfoId::from_raw(id.raw()).unwrap(), id);
            let kind = match id.get_sample() {
                InfoValue::Long(_) => "long",
                InfoValue::Int64(_) => "64-bit integer",
                InfoValue::Double(_) => "double",
                InfoValue::Str(_) => "string",
                InfoValue::List(_) => "string list",
            };
            assert_eq!(id.kind(), kind, "{}", id);
        }
        assert!(matches!(InfoId::from_raw(7), Err(Error::UnknownInfo(7))));
    }

    impl InfoId {
        fn get_sample(self) -> InfoValue {
            TransferInfo::default().get(self)
        }
    }
}
