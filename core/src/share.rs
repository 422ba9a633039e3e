/*
 * share.rs
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

//! Execution context shared by the handles of one scheduler: a current-thread tokio runtime,
//! the connection pool and the connector.
//!
//! The three travel together because pooled sockets are registered with the reactor of the
//! runtime that opened them. A standalone handle creates its own `Share` on first perform; a
//! `Multi` or `Client` owns one and runs every transfer on it.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::error::Result;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::transport::{Connector, SystemConnector};

#[derive(Clone)]
pub struct Share {
    runtime: Arc<Runtime>,
    pool: Arc<ConnectionPool>,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Share {
    /// New runtime and empty pool, connecting through the operating system.
    pub fn new(pool_config: PoolConfig) -> Result<Share> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Share {
            runtime: Arc::new(runtime),
            pool: Arc::new(ConnectionPool::new(pool_config)),
            connector: Arc::new(SystemConnector),
        })
    }

    /// Replace the pool, e.g. one built with a manual clock.
    pub fn with_pool(mut self, pool: Arc<ConnectionPool>) -> Share {
        self.pool = pool;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Share {
        self.connector = connector;
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub(crate) fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    /// Drive `future` to completion on the calling thread.
    ///
    /// Panics when called from inside another tokio runtime.
    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
