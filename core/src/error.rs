/*
 * error.rs
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

//! Transfer, transport and option errors.
//!
//! Every failed transfer ends with exactly one `Error`; `Error::kind()` gives the
//! copyable discriminant stored in `TransferState::Failed`, and `Error::code()`
//! gives the stable number surfaced through the C interface.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::info::InfoId;
use crate::options::OptionId;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a connect attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectErrorKind {
    Timeout,
    Refused,
    Dns,
    Other,
}

impl fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectErrorKind::Timeout => "timed out",
            ConnectErrorKind::Refused => "refused",
            ConnectErrorKind::Dns => "name resolution failed",
            ConnectErrorKind::Other => "failed",
        };
        f.write_str(s)
    }
}

/// Errors from option handling, transports, the connection pool or the request engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connect to {target} {kind}: {message}")]
    Connect {
        kind: ConnectErrorKind,
        target: String,
        message: String,
    },

    #[error("TLS handshake with {host} failed: {message}")]
    TlsHandshake { host: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transport is closed")]
    ClosedTransport,

    #[error("HTTP protocol error: {0}")]
    Protocol(String),

    #[error("failed to send request: {0}")]
    RequestWrite(String),

    #[error("maximum redirects followed ({count})")]
    TooManyRedirects { count: u32 },

    #[error("transfer aborted by callback")]
    Aborted,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("invalid value for option {option}: {reason}")]
    InvalidOptionValue { option: OptionId, reason: String },

    #[error("unknown option {0}")]
    UnknownOption(u32),

    #[error("info {0} not available before the first transfer")]
    InfoNotAvailable(InfoId),

    #[error("unknown info {0}")]
    UnknownInfo(u32),

    #[error("info {info} is not of kind {requested}")]
    BadInfoKind { info: InfoId, requested: &'static str },

    #[error("malformed URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("unknown transfer {0}")]
    UnknownTransfer(u64),

    #[error("transfer {0} is in progress")]
    TransferBusy(u64),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Copyable discriminant of [`Error`], used in terminal transfer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connect(ConnectErrorKind),
    TlsHandshake,
    Io,
    ClosedTransport,
    Protocol,
    RequestWrite,
    TooManyRedirects,
    Aborted,
    Cancelled,
    InvalidOptionValue,
    UnknownOption,
    InfoNotAvailable,
    UnknownInfo,
    BadInfoKind,
    InvalidUrl,
    UnsupportedScheme,
    TimedOut,
    UnknownTransfer,
    TransferBusy,
    Config,
}

impl Error {
    pub(crate) fn connect(kind: ConnectErrorKind, target: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Connect {
            kind,
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn invalid_option(option: OptionId, reason: impl Into<String>) -> Self {
        Error::InvalidOptionValue {
            option,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connect { kind, .. } => ErrorKind::Connect(*kind),
            Error::TlsHandshake { .. } => ErrorKind::TlsHandshake,
            Error::Io(_) => ErrorKind::Io,
            Error::ClosedTransport => ErrorKind::ClosedTransport,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::RequestWrite(_) => ErrorKind::RequestWrite,
            Error::TooManyRedirects { .. } => ErrorKind::TooManyRedirects,
            Error::Aborted => ErrorKind::Aborted,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::InvalidOptionValue { .. } => ErrorKind::InvalidOptionValue,
            Error::UnknownOption(_) => ErrorKind::UnknownOption,
            Error::InfoNotAvailable(_) => ErrorKind::InfoNotAvailable,
            Error::UnknownInfo(_) => ErrorKind::UnknownInfo,
            Error::BadInfoKind { .. } => ErrorKind::BadInfoKind,
            Error::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            Error::UnsupportedScheme(_) => ErrorKind::UnsupportedScheme,
            Error::TimedOut(_) => ErrorKind::TimedOut,
            Error::UnknownTransfer(_) => ErrorKind::UnknownTransfer,
            Error::TransferBusy(_) => ErrorKind::TransferBusy,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Stable numeric code for the C interface. 0 is reserved for success.
    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    /// Transport-level failures that may be retried on a fresh connection.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Error::Connect { .. } | Error::Io(_) | Error::ClosedTransport)
    }
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::UnsupportedScheme => 1,
            ErrorKind::InvalidUrl => 3,
            ErrorKind::Connect(ConnectErrorKind::Dns) => 6,
            ErrorKind::Connect(_) => 7,
            ErrorKind::Protocol => 8,
            ErrorKind::RequestWrite => 55,
            ErrorKind::Io => 56,
            ErrorKind::ClosedTransport => 52,
            ErrorKind::TooManyRedirects => 47,
            ErrorKind::Aborted => 23,
            ErrorKind::Cancelled => 42,
            ErrorKind::TimedOut => 28,
            ErrorKind::TlsHandshake => 35,
            ErrorKind::InvalidOptionValue => 43,
            ErrorKind::UnknownOption => 48,
            ErrorKind::InfoNotAvailable => 49,
            ErrorKind::UnknownInfo => 50,
            ErrorKind::BadInfoKind => 51,
            ErrorKind::UnknownTransfer => 100,
            ErrorKind::TransferBusy => 101,
            ErrorKind::Config => 102,
        }
    }
}
