/*
 * transport.rs
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

//! Socket transport: one live byte stream (plain TCP, TLS over TCP, or a Unix-domain socket).
//!
//! A `Transport` is owned by exactly one transfer at a time; it moves into the connection pool
//! on clean completion and back out on the next acquire. Once closed, every I/O call fails with
//! `Error::ClosedTransport`.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::error::{ConnectErrorKind, Error, Result};
use crate::net::http_client_config;
use crate::pool::ConnectionKey;

/// Any bidirectional byte stream a transport can run over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

pub struct Transport {
    id: u64,
    stream: Option<Box<dyn Stream>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("closed", &self.stream.is_none())
            .finish()
    }
}

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

impl Transport {
    pub fn new(stream: Box<dyn Stream>) -> Self {
        Self {
            id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
            stream: Some(stream),
        }
    }

    /// Process-unique identifier, stable for the transport's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream_mut(&mut self) -> Result<&mut Box<dyn Stream>> {
        self.stream.as_mut().ok_or(Error::ClosedTransport)
    }

    /// Read into `buf`. `Ok(0)` means the peer closed the stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.stream_mut()?.read(buf).await?;
        Ok(n)
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream_mut()?.write_all(buf).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.stream_mut()?.flush().await?;
        Ok(())
    }

    /// Drop the underlying stream. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("transport {} closed", self.id);
        }
    }

    /// Cheap liveness check for an idle transport: a non-blocking read that must find nothing.
    /// End of stream, an error, or unsolicited bytes all mean the transport cannot be reused.
    pub fn is_alive(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        matches!(Pin::new(stream.as_mut()).poll_read(&mut cx, &mut buf), Poll::Pending)
    }
}

/// Opens transports for a connection key. The engine only ever talks to this trait.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, key: &ConnectionKey, connect_timeout: Option<Duration>) -> Result<Transport>;
}

/// Connector over the operating system's sockets, with rustls for https.
///
/// Name resolution uses the blocking system resolver on the calling thread so that no helper
/// threads are started.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConnector;

impl SystemConnector {
    async fn open(&self, key: &ConnectionKey) -> Result<Transport> {
        #[cfg(unix)]
        if let Some(path) = &key.unix_socket {
            let target = path.display().to_string();
            let stream = tokio::net::UnixStream::connect(path)
                .await
                .map_err(|e| Error::connect(classify(&e), target, e))?;
            return wrap_tls(key, stream).await;
        }
        #[cfg(not(unix))]
        if key.unix_socket.is_some() {
            return Err(Error::connect(
                ConnectErrorKind::Other,
                key.to_string(),
                "unix sockets are not supported on this platform",
            ));
        }

        let target = format!("{}:{}", key.host, key.port);
        let addrs: Vec<SocketAddr> = (key.host.as_str(), key.port)
            .to_socket_addrs()
            .map_err(|e| Error::connect(ConnectErrorKind::Dns, target.clone(), e))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::connect(ConnectErrorKind::Dns, target, "no addresses"));
        }

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(tcp) => {
                    let _ = tcp.set_nodelay(true);
                    tracing::debug!("connected to {} ({})", target, addr);
                    return wrap_tls(key, tcp).await;
                }
                Err(e) => {
                    tracing::debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        let e = last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no addresses"));
        Err(Error::connect(classify(&e), target, e))
    }
}

#[async_trait]
impl Connector for SystemConnector {
    async fn connect(&self, key: &ConnectionKey, connect_timeout: Option<Duration>) -> Result<Transport> {
        match connect_timeout {
            Some(d) => timeout(d, self.open(key))
                .await
                .map_err(|_| Error::connect(ConnectErrorKind::Timeout, key.to_string(), format!("after {:?}", d)))?,
            None => self.open(key).await,
        }
    }
}

fn classify(e: &io::Error) -> ConnectErrorKind {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ConnectErrorKind::Refused,
        io::ErrorKind::TimedOut => ConnectErrorKind::Timeout,
        io::ErrorKind::NotFound => ConnectErrorKind::Refused,
        _ => ConnectErrorKind::Other,
    }
}

async fn wrap_tls<S>(key: &ConnectionKey, stream: S) -> Result<Transport>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if !key.scheme.is_tls() {
        return Ok(Transport::new(Box::new(stream)));
    }
    let server_name = ServerName::try_from(key.host.clone()).map_err(|_| Error::TlsHandshake {
        host: key.host.clone(),
        message: "invalid server name".to_string(),
    })?;
    let connector = TlsConnector::from(http_client_config(key.tls_verify));
    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::TlsHandshake {
            host: key.host.clone(),
            message: e.to_string(),
        })?;
    Ok(Transport::new(Box::new(tls)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn closed_transport_rejects_io() {
        runtime().block_on(async {
            let (client, _server) = tokio::io::duplex(64);
            let mut t = Transport::new(Box::new(client));
            t.close();
            t.close();
            assert!(t.is_closed());
            let mut buf = [0u8; 4];
            assert!(matches!(t.read(&mut buf).await, Err(Error::ClosedTransport)));
            assert!(matches!(t.write_all(b"x").await, Err(Error::ClosedTransport)));
            assert!(!t.is_alive());
        });
    }

    #[test]
    fn liveness_of_idle_transport() {
        runtime().block_on(async {
            let (client, mut server) = tokio::io::duplex(64);
            let mut t = Transport::new(Box::new(client));
            assert!(t.is_alive());
            server.write_all(b"junk").await.unwrap();
            assert!(!t.is_alive());

            let (client, server) = tokio::io::duplex(64);
            let mut t = Transport::new(Box::new(client));
            drop(server);
            assert!(!t.is_alive());
        });
    }

    #[test]
    fn refused_connect_is_classified() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let key = ConnectionKey {
            scheme: crate::uri::Scheme::Http,
            host: "127.0.0.1".to_string(),
            port,
            tls_verify: true,
            unix_socket: None,
        };
        let err = runtime()
            .block_on(SystemConnector.connect(&key, Some(Duration::from_secs(2))))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connect(ConnectErrorKind::Refused));
    }
}
