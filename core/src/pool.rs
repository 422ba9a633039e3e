/*
 * pool.rs
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

//! Connection pool: idle transports keyed by (scheme, host, port, TLS verification, socket path).
//!
//! `acquire` hands out the most recently released live transport for a key, or `None` when the
//! caller must connect. `release` only keeps transports whose previous transfer ended cleanly.
//! Idle entries older than the TTL, or beyond the per-key idle limit, are closed; the least
//! recently released go first. Ownership moves in and out of the pool, so a transport is never
//! held by two transfers. Access is serialized by a mutex so one pool can be shared between
//! handles running on different threads.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::transport::Transport;
use crate::uri::{Scheme, Target};

/// Transport-pool equivalence class.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ConnectionKey {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub tls_verify: bool,
    pub unix_socket: Option<PathBuf>,
}

impl ConnectionKey {
    pub fn new(target: &Target, tls_verify: bool, unix_socket: Option<PathBuf>) -> Self {
        Self {
            scheme: target.scheme,
            host: target.host.to_ascii_lowercase(),
            port: target.port,
            // Verification mode only distinguishes TLS connections.
            tls_verify: tls_verify || !target.scheme.is_tls(),
            unix_socket,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)?;
        if let Some(path) = &self.unix_socket {
            write!(f, " via {}", path.display())?;
        }
        Ok(())
    }
}

/// Time source for idle expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle transports older than this are closed instead of reused.
    pub idle_ttl: Duration,
    /// Idle transports kept per key; 0 disables pooling.
    pub max_idle_per_key: usize,
}

impl PoolConfig {
    pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(118);
    pub const DEFAULT_MAX_IDLE_PER_KEY: usize = 5;
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Self::DEFAULT_IDLE_TTL,
            max_idle_per_key: Self::DEFAULT_MAX_IDLE_PER_KEY,
        }
    }
}

struct IdleEntry {
    transport: Transport,
    released_at: Instant,
}

pub struct ConnectionPool {
    config: PoolConfig,
    clock: Arc<dyn Clock>,
    /// Per key, oldest release at the front.
    idle: Mutex<HashMap<ConnectionKey, VecDeque<IdleEntry>>>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: PoolConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            idle: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionKey, VecDeque<IdleEntry>>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the most recently released live transport for `key`. `None` tells the caller to
    /// open a new one. Expired and dead entries met along the way are closed.
    pub fn acquire(&self, key: &ConnectionKey) -> Option<Transport> {
        let now = self.clock.now();
        let mut idle = self.lock();
        let entries = idle.get_mut(key)?;
        expire(entries, now, self.config.idle_ttl, key);
        let mut found = None;
        while let Some(mut entry) = entries.pop_back() {
            if entry.transport.is_alive() {
                found = Some(entry.transport);
                break;
            }
            tracing::warn!("pool: dropping dead transport {} for {}", entry.transport.id(), key);
            entry.transport.close();
        }
        if entries.is_empty() {
            idle.remove(key);
        }
        match &found {
            Some(t) => tracing::debug!("pool: reusing transport {} for {}", t.id(), key),
            None => tracing::debug!("pool: no idle transport for {}", key),
        }
        found
    }

    /// Return a transport after a transfer. Unless `reusable` is true the transport is closed.
    pub fn release(&self, key: &ConnectionKey, mut transport: Transport, reusable: bool) {
        if !reusable || transport.is_closed() || self.config.max_idle_per_key == 0 {
            transport.close();
            return;
        }
        let now = self.clock.now();
        let mut idle = self.lock();
        let entries = idle.entry(key.clone()).or_default();
        expire(entries, now, self.config.idle_ttl, key);
        tracing::debug!("pool: keeping transport {} for {}", transport.id(), key);
        entries.push_back(IdleEntry {
            transport,
            released_at: now,
        });
        while entries.len() > self.config.max_idle_per_key {
            if let Some(mut oldest) = entries.pop_front() {
                tracing::debug!("pool: over idle limit, closing transport {}", oldest.transport.id());
                oldest.transport.close();
            }
        }
    }

    /// Close every idle transport past its TTL. Returns how many were closed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut idle = self.lock();
        let mut closed = 0;
        for (key, entries) in idle.iter_mut() {
            closed += expire(entries, now, self.config.idle_ttl, key);
        }
        idle.retain(|_, entries| !entries.is_empty());
        closed
    }

    pub fn idle_count(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    pub fn idle_count_for(&self, key: &ConnectionKey) -> usize {
        self.lock().get(key).map(VecDeque::len).unwrap_or(0)
    }

    /// Close everything.
    pub fn clear(&self) {
        let mut idle = self.lock();
        for entries in idle.values_mut() {
            for entry in entries.iter_mut() {
                entry.transport.close();
            }
        }
        idle.clear();
    }
}

fn expire(entries: &mut VecDeque<IdleEntry>, now: Instant, ttl: Duration, key: &ConnectionKey) -> usize {
    let mut closed = 0;
    while let Some(front) = entries.front() {
        if now.saturating_duration_since(front.released_at) < ttl {
            break;
        }
        if let Some(mut entry) = entries.pop_front() {
            tracing::debug!("pool: idle transport {} for {} expired", entry.transport.id(), key);
            entry.transport.close();
            closed += 1;
        }
    }
    closed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(host: &str) -> ConnectionKey {
        ConnectionKey {
            scheme: Scheme::Http,
            host: host.to_string(),
            port: 80,
            tls_verify: true,
            unix_socket: None,
        }
    }

    /// Transport over an in-memory pipe whose peer is kept open so the liveness check sees it alive.
    fn live_transport(peers: &mut Vec<tokio::io::DuplexStream>) -> Transport {
        let (client, server) = tokio::io::duplex(64);
        peers.push(server);
        Transport::new(Box::new(client))
    }

    #[test]
    fn released_transport_is_next_acquired() {
        let mut peers = Vec::new();
        let pool = ConnectionPool::new(PoolConfig::default());
        let k = key("a.test");
        assert!(pool.acquire(&k).is_none());

        let first = live_transport(&mut peers);
        let second = live_transport(&mut peers);
        let second_id = second.id();
        pool.release(&k, first, true);
        pool.release(&k, second, true);
        assert_eq!(pool.idle_count_for(&k), 2);

        let got = pool.acquire(&k).unwrap();
        assert_eq!(got.id(), second_id);
        assert_eq!(pool.idle_count_for(&k), 1);
        assert!(pool.acquire(&key("b.test")).is_none());
    }

    #[test]
    fn unclean_release_closes() {
        let mut peers = Vec::new();
        let pool = ConnectionPool::new(PoolConfig::default());
        let k = key("a.test");
        pool.release(&k, live_transport(&mut peers), false);
        assert_eq!(pool.idle_count(), 0);
        assert!(pool.acquire(&k).is_none());
    }

    #[test]
    fn expired_transports_are_never_returned() {
        let mut peers = Vec::new();
        let clock = Arc::new(ManualClock::new());
        let config = PoolConfig {
            idle_ttl: Duration::from_secs(10),
            max_idle_per_key: 5,
        };
        let pool = ConnectionPool::with_clock(config, clock.clone());
        let k = key("a.test");

        pool.release(&k, live_transport(&mut peers), true);
        clock.advance(Duration::from_secs(9));
        let t = pool.acquire(&k).unwrap();
        pool.release(&k, t, true);

        clock.advance(Duration::from_secs(10));
        assert!(pool.acquire(&k).is_none());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn evict_expired_sweeps_all_keys() {
        let mut peers = Vec::new();
        let clock = Arc::new(ManualClock::new());
        let config = PoolConfig {
            idle_ttl: Duration::from_secs(5),
            max_idle_per_key: 5,
        };
        let pool = ConnectionPool::with_clock(config, clock.clone());
        pool.release(&key("a.test"), live_transport(&mut peers), true);
        clock.advance(Duration::from_secs(3));
        pool.release(&key("b.test"), live_transport(&mut peers), true);
        clock.advance(Duration::from_secs(3));
        assert_eq!(pool.evict_expired(), 1);
        assert_eq!(pool.idle_count_for(&key("a.test")), 0);
        assert_eq!(pool.idle_count_for(&key("b.test")), 1);
    }

    #[test]
    fn idle_limit_evicts_least_recently_released() {
        let mut peers = Vec::new();
        let config = PoolConfig {
            idle_ttl: Duration::from_secs(60),
            max_idle_per_key: 2,
        };
        let pool = ConnectionPool::new(config);
        let k = key("a.test");
        let ts: Vec<Transport> = (0..3).map(|_| live_transport(&mut peers)).collect();
        let ids: Vec<u64> = ts.iter().map(Transport::id).collect();
        for t in ts {
            pool.release(&k, t, true);
        }
        assert_eq!(pool.idle_count_for(&k), 2);
        assert_eq!(pool.acquire(&k).unwrap().id(), ids[2]);
        assert_eq!(pool.acquire(&k).unwrap().id(), ids[1]);
        assert!(pool.acquire(&k).is_none());
    }

    #[test]
    fn dead_transport_is_skipped() {
        let mut peers = Vec::new();
        let pool = ConnectionPool::new(PoolConfig::default());
        let k = key("a.test");
        let alive = live_transport(&mut peers);
        let alive_id = alive.id();
        pool.release(&k, alive, true);
        let (client, server) = tokio::io::duplex(64);
        pool.release(&k, Transport::new(Box::new(client)), true);
        drop(server);
        assert_eq!(pool.acquire(&k).unwrap().id(), alive_id);
    }

    #[test]
    fn key_ignores_verify_for_plain_http() {
        let t = Target {
            scheme: Scheme::Http,
            host: "Example.Test".to_string(),
            port: 80,
            path: "/".to_string(),
        };
        assert_eq!(ConnectionKey::new(&t, false, None), ConnectionKey::new(&t, true, None));
        let tls = Target {
            scheme: Scheme::Https,
            port: 443,
            ..t
        };
        assert_ne!(ConnectionKey::new(&tls, false, None), ConnectionKey::new(&tls, true, None));
    }
}
