/*
 * mod.rs
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

//! HTTP/1.1 client protocol: response push parser, request head encoding and the buffered
//! response type.
//!
//! - Buffers: `bytes` crate (BytesMut for the parse buffer and encoded heads, Bytes for bodies).
//! - Responses are push-parsed; the transfer engine implements `H1ResponseHandler`.
//! - TLS offers ALPN `http/1.1` only.

mod request;
mod response;

pub mod h1;

pub use h1::H1ResponseHandler;
pub use request::{Method, RequestBuilder};
pub use response::Response;

pub(crate) use request::RequestHead;
pub(crate) use response::split_header_lines;
