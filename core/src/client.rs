/*
 * client.rs
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

//! Convenience client: one request in, one buffered response out.
//!
//! A `Client` keeps a runtime and connection pool across calls, so consecutive requests to the
//! same server reuse connections. With a Unix socket path every request goes over that socket
//! (the URL still supplies the Host header and request target), which is how local daemons
//! such as Docker's are reached.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::config::{Config, EngineDefaults};
use crate::error::Result;
use crate::handle::TransferHandle;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::protocol::http::{split_header_lines, Method, RequestBuilder, Response};
use crate::share::Share;

/// Socket path of a default local Docker daemon.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

#[derive(Debug, Clone)]
pub struct Client {
    share: Share,
    defaults: EngineDefaults,
    unix_socket: Option<PathBuf>,
}

impl Client {
    pub fn new() -> Result<Client> {
        Client::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Result<Client> {
        Ok(Client {
            share: Share::new(config.multi.pool)?,
            defaults: config.engine.clone(),
            unix_socket: None,
        })
    }

    /// A client whose requests all go over the Unix socket at `path`.
    pub fn unix(path: impl Into<PathBuf>) -> Result<Client> {
        let mut client = Client::with_config(&Config::default())?;
        client.unix_socket = Some(path.into());
        Ok(client)
    }

    /// Run on an existing runtime, pool and connector.
    pub fn with_share(share: Share) -> Client {
        Client {
            share,
            defaults: EngineDefaults::default(),
            unix_socket: None,
        }
    }

    pub fn unix_socket_path(&self) -> Option<&Path> {
        self.unix_socket.as_deref()
    }

    pub fn pool(&self) -> &ConnectionPool {
        self.share.pool()
    }

    pub fn pool_config(&self) -> PoolConfig {
        self.share.pool().config()
    }

    /// A handle configured for `request`, ready to perform on this client's pool.
    pub fn handle(&self, request: &RequestBuilder) -> Result<TransferHandle> {
        let mut handle = TransferHandle::with_share(self.share.clone());
        handle.set_defaults(self.defaults.clone());
        handle.set_url(&request.url)?;
        match (&request.method, &request.body) {
            (Method::Get, None) | (Method::Post, Some(_)) => {}
            (method, _) => handle.set_method(method.as_str())?,
        }
        if let Some(body) = &request.body {
            handle.set_post_fields(body.clone())?;
        }
        if !request.headers.is_empty() {
            handle.set_headers(request.header_lines())?;
        }
        if let Some(path) = &self.unix_socket {
            handle.set_unix_socket_path(path)?;
        }
        Ok(handle)
    }

    /// Perform `request` synchronously and buffer the final response.
    pub fn respond(&self, request: &RequestBuilder) -> Result<Response> {
        let mut handle = self.handle(request)?;
        let body = Arc::new(Mutex::new(Vec::new()));
        let sink = body.clone();
        handle.set_write_callback(move |data, _| match sink.lock() {
            Ok(mut buf) => {
                buf.extend_from_slice(data);
                data.len()
            }
            Err(_) => 0,
        })?;
        handle.perform()?;

        let (code, headers) = match handle.info() {
            Some(info) => (info.response_code, split_header_lines(&info.response_headers)),
            None => (0, Vec::new()),
        };
        let body = match body.lock() {
            Ok(mut buf) => Bytes::from(std::mem::take(&mut *buf)),
            Err(_) => Bytes::new(),
        };
        Ok(Response { code, headers, body })
    }
}
