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

//! Ferrocurl core: a small HTTP(S) transfer engine behind a typed option/info surface.
//!
//! - [`options`]: typed option registry (the setopt side).
//! - [`info`]: per-execution transfer info (the getinfo side).
//! - [`transport`] and [`pool`]: sockets, TLS and keep-alive connection reuse.
//! - [`handle`]: one transfer, performed synchronously.
//! - [`multi`]: many transfers multiplexed on one thread.
//! - [`client`]: request-in, response-out convenience API.

pub mod client;
pub mod config;
mod engine;
pub mod error;
pub mod handle;
pub mod info;
pub mod multi;
pub mod net;
pub mod options;
pub mod pool;
pub mod protocol;
pub mod share;
pub mod transport;
pub mod uri;

pub use client::Client;
pub use config::{Config, EngineDefaults, MultiConfig};
pub use error::{ConnectErrorKind, Error, ErrorKind, Result};
pub use handle::{CancelToken, TransferHandle, TransferState};
pub use info::{InfoId, InfoValue, TransferInfo};
pub use multi::{Completion, Multi, SchedulerId, TransferId};
pub use options::{OptionId, OptionKind, OptionRegistry, OptionValue, TransferCallback, UserData};
pub use pool::{ConnectionKey, ConnectionPool, PoolConfig};
pub use protocol::http::{Method, RequestBuilder, Response};
pub use share::Share;
pub use transport::{Connector, SystemConnector, Transport};
