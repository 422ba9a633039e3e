/*
 * engine.rs
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

//! Request engine: drives one execution of a handle through
//! Idle → Connecting → SendingRequest → ReceivingHeaders → ReceivingBody → Complete,
//! following redirects and retrying transport failures on fresh connections.
//!
//! Failed is reached by returning an error from `execute`; the handle records it. Any transport
//! held when an error is returned is closed, never pooled.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use url::Url;

use crate::config::EngineDefaults;
use crate::error::{Error, Result};
use crate::handle::{Phase, Progress};
use crate::info::TransferInfo;
use crate::options::{OptionId, OptionRegistry, UserData};
use crate::pool::ConnectionKey;
use crate::protocol::http::h1::{BodyMode, H1ResponseHandler, ParseState, ResponseParser, Version};
use crate::protocol::http::{Method, RequestHead};
use crate::share::Share;
use crate::transport::Transport;
use crate::uri::{self, Target};

const READ_BUF_SIZE: usize = 16 * 1024;

/// What one request/response exchange leads to.
enum Next {
    Done,
    Redirect(Url, u16),
}

/// Why an exchange failed. A stale failure happened on a reused connection before any
/// response byte arrived, so the request may be sent again on a fresh one.
enum Failure {
    Stale(Error),
    Fatal(Error),
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        Failure::Fatal(e)
    }
}

/// Options resolved for one execution. Redirects update it in place.
#[derive(Debug)]
struct Plan {
    url: Url,
    method: String,
    /// No response body is expected (HEAD).
    no_body: bool,
    headers: Vec<String>,
    body: Option<Bytes>,
    follow: bool,
    max_redirects: i64,
    max_retries: u32,
    tls_verify: bool,
    connect_timeout: Option<Duration>,
    user_agent: String,
    authorization: Option<String>,
    unix_socket: Option<PathBuf>,
}

impl Plan {
    fn from_options(options: &OptionRegistry, defaults: &EngineDefaults) -> Result<Plan> {
        let url = options
            .string(OptionId::Url)
            .ok_or_else(|| Error::invalid_option(OptionId::Url, "no URL set"))?;
        let url = uri::parse_url(url).map_err(|reason| Error::InvalidUrl {
            url: url.to_string(),
            reason,
        })?;

        let body = match options.blob(OptionId::PostFields) {
            Some(blob) => {
                let len = match options.int64(OptionId::PostFieldSize) {
                    None | Some(-1) => blob.len(),
                    Some(n) if n as u64 > blob.len() as u64 => {
                        return Err(Error::invalid_option(
                            OptionId::PostFieldSize,
                            format!("{} exceeds the {} bytes of POST_FIELDS", n, blob.len()),
                        ))
                    }
                    Some(n) => n as usize,
                };
                Some(Bytes::copy_from_slice(&blob[..len]))
            }
            None => None,
        };

        let no_body_flag = options.flag(OptionId::NoBody, false);
        let method = match options.string(OptionId::Method) {
            Some(m) => m.to_string(),
            None if no_body_flag => "HEAD".to_string(),
            None if body.is_some() => "POST".to_string(),
            None => "GET".to_string(),
        };
        let no_body = no_body_flag || method == "HEAD";

        let connect_timeout = match options.long(OptionId::ConnectTimeoutMs) {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms as u64)),
            None => Some(defaults.connect_timeout),
        };

        let authorization = options
            .string(OptionId::UserPwd)
            .map(|cred| format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(cred)));

        Ok(Plan {
            url,
            method,
            no_body,
            headers: options.list(OptionId::Headers).to_vec(),
            body,
            follow: options.flag(OptionId::FollowRedirects, false),
            max_redirects: options.long(OptionId::MaxRedirects).unwrap_or(defaults.max_redirects),
            max_retries: options
                .long(OptionId::MaxRetries)
                .map(|n| n as u32)
                .unwrap_or(defaults.max_retries),
            tls_verify: options.flag(OptionId::TlsVerify, true),
            connect_timeout,
            user_agent: options
                .string(OptionId::UserAgent)
                .unwrap_or(&defaults.user_agent)
                .to_string(),
            authorization,
            unix_socket: options.string(OptionId::UnixSocketPath).map(PathBuf::from),
        })
    }

    fn idempotent(&self) -> bool {
        Method::parse(&self.method).is_idempotent()
    }

    /// Follow a redirect: 303 turns anything but HEAD into GET, 301 and 302 turn POST into GET.
    /// Credentials are not sent to a different host.
    fn redirect_to(&mut self, url: Url, code: u16) {
        let to_get = match code {
            303 => self.method != "HEAD",
            301 | 302 => self.method == "POST",
            _ => false,
        };
        if to_get {
            self.method = "GET".to_string();
            self.body = None;
        }
        if url.host_str() != self.url.host_str() {
            self.authorization = None;
        }
        self.url = url;
    }
}

/// Response facts gathered while the header block is parsed.
#[derive(Default)]
struct Head {
    version: Option<Version>,
    code: u16,
    fields: Vec<(String, String)>,
    lines: Vec<String>,
}

impl Head {
    fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn tokens(&self, name: &str) -> Vec<String> {
        self.values(name)
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    fn keep_alive(&self) -> bool {
        let connection = self.tokens("connection");
        match self.version {
            Some(Version::Http11) => !connection.iter().any(|t| t == "close"),
            _ => connection.iter().any(|t| t == "keep-alive"),
        }
    }

    fn content_length(&self) -> Result<Option<u64>> {
        let mut length = None;
        for value in self.values("content-length") {
            let n = value
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::Protocol(format!("invalid Content-Length {:?}", value)))?;
            if length.is_some_and(|l| l != n) {
                return Err(Error::Protocol("conflicting Content-Length values".to_string()));
            }
            length = Some(n);
        }
        Ok(length)
    }

    /// Framing precedence: no-body responses, chunked, Content-Length, then until close.
    fn body_mode(&self, no_body: bool) -> Result<BodyMode> {
        if no_body || self.code < 200 || self.code == 204 || self.code == 304 {
            return Ok(BodyMode::Empty);
        }
        let codings = self.tokens("transfer-encoding");
        if let Some(last) = codings.last() {
            return Ok(if last == "chunked" { BodyMode::Chunked } else { BodyMode::UntilClose });
        }
        Ok(match self.content_length()? {
            Some(n) => BodyMode::Length(n),
            None => BodyMode::UntilClose,
        })
    }

    fn location(&self) -> Option<&str> {
        self.values("location").next().filter(|l| !l.is_empty())
    }
}

/// Bridges parser events to the caller's callbacks and the info record.
struct Sink<'a> {
    options: &'a mut OptionRegistry,
    user_data: Option<&'a UserData>,
    info: &'a mut TransferInfo,
    head: Head,
    deliver_body: bool,
}

impl Sink<'_> {
    fn emit_header(&mut self, raw: &[u8]) -> Result<()> {
        self.info.header_size += raw.len() as u64;
        if let Some(cb) = self.options.callback_mut(OptionId::HeaderCallback) {
            if cb.call(raw, self.user_data) < raw.len() {
                return Err(Error::Aborted);
            }
        }
        Ok(())
    }
}

fn trim_eol(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches(['\r', '\n']).to_string()
}

impl H1ResponseHandler for Sink<'_> {
    fn status(&mut self, raw: &[u8], version: Version, code: u16, _reason: &str) -> Result<()> {
        self.head = Head {
            version: Some(version),
            code,
            ..Head::default()
        };
        self.info.response_code = code;
        self.emit_header(raw)
    }

    fn header(&mut self, raw: &[u8], name: &str, value: &str) -> Result<()> {
        self.head.fields.push((name.to_string(), value.to_string()));
        self.head.lines.push(trim_eol(raw));
        self.emit_header(raw)
    }

    fn end_headers(&mut self, raw: &[u8]) -> Result<()> {
        self.emit_header(raw)
    }

    fn body_chunk(&mut self, data: &[u8]) -> Result<()> {
        if !self.deliver_body || data.is_empty() {
            return Ok(());
        }
        self.info.size_download += data.len() as u64;
        if let Some(cb) = self.options.callback_mut(OptionId::WriteCallback) {
            if cb.call(data, self.user_data) < data.len() {
                return Err(Error::Aborted);
            }
        }
        Ok(())
    }

    fn trailer(&mut self, raw: &[u8], _name: &str, _value: &str) -> Result<()> {
        self.emit_header(raw)
    }
}

pub(crate) struct Engine<'a> {
    pub(crate) options: &'a mut OptionRegistry,
    pub(crate) info: &'a mut TransferInfo,
    pub(crate) progress: &'a Progress,
    pub(crate) share: &'a Share,
    pub(crate) defaults: &'a EngineDefaults,
    pub(crate) user_data: Option<UserData>,
    pub(crate) started: Instant,
}

impl Engine<'_> {
    pub(crate) async fn execute(&mut self) -> Result<()> {
        self.progress.enter(Phase::Connecting)?;
        let mut plan = Plan::from_options(self.options, self.defaults)?;
        self.info.effective_url = plan.url.to_string();
        loop {
            match self.exchange(&plan).await? {
                Next::Done => return Ok(()),
                Next::Redirect(url, code) => {
                    self.info.redirect_count += 1;
                    tracing::debug!("{} redirect {} -> {}", code, plan.url, url);
                    plan.redirect_to(url, code);
                    self.info.effective_url = plan.url.to_string();
                    self.progress.enter(Phase::Connecting)?;
                }
            }
        }
    }

    /// One request/response on one transport, retried on fresh connections when allowed.
    async fn exchange(&mut self, plan: &Plan) -> Result<Next> {
        let target = Target::from_url(&plan.url)?;
        let key = ConnectionKey::new(&target, plan.tls_verify, plan.unix_socket.clone());
        let head = RequestHead {
            method: &plan.method,
            target: &target,
            headers: &plan.headers,
            user_agent: Some(&plan.user_agent),
            authorization: plan.authorization.as_deref(),
            content_length: plan.body.as_ref().map(Bytes::len),
        }
        .encode();
        let idempotent = plan.idempotent();
        let mut attempts = 0u32;
        let mut allow_reuse = true;

        loop {
            self.progress.enter(Phase::Connecting)?;
            let (mut transport, reused) = self.obtain(&key, plan, allow_reuse, &mut attempts).await?;

            if let Err(e) = self.send(&mut transport, &head, plan.body.as_deref()).await {
                transport.close();
                if matches!(e, Error::Cancelled) {
                    return Err(e);
                }
                if idempotent && e.is_transient() && attempts < plan.max_retries {
                    attempts += 1;
                    allow_reuse = false;
                    tracing::warn!("request write to {} failed ({}), retrying", key, e);
                    continue;
                }
                return Err(Error::RequestWrite(e.to_string()));
            }

            match self.receive(&mut transport, plan, reused).await {
                Ok((next, reusable)) => {
                    // Leaving ReceivingBody is a transition too; a late cancel must not pool.
                    if let Err(e) = self.progress.check() {
                        transport.close();
                        return Err(e);
                    }
                    self.share.pool().release(&key, transport, reusable);
                    return Ok(next);
                }
                Err(Failure::Stale(e)) if idempotent && attempts < plan.max_retries => {
                    transport.close();
                    attempts += 1;
                    allow_reuse = false;
                    tracing::warn!("reused connection to {} went stale ({}), retrying", key, e);
                }
                Err(Failure::Stale(e)) | Err(Failure::Fatal(e)) => {
                    transport.close();
                    return Err(e);
                }
            }
        }
    }

    /// Pool hit, or a fresh connect with connect failures retried.
    async fn obtain(
        &mut self,
        key: &ConnectionKey,
        plan: &Plan,
        allow_reuse: bool,
        attempts: &mut u32,
    ) -> Result<(Transport, bool)> {
        if allow_reuse {
            if let Some(transport) = self.share.pool().acquire(key) {
                return Ok((transport, true));
            }
        }
        loop {
            match self.share.connector().connect(key, plan.connect_timeout).await {
                Ok(transport) => {
                    self.info.num_connects += 1;
                    if self.info.connect_time.is_zero() {
                        self.info.connect_time = self.started.elapsed();
                    }
                    return Ok((transport, false));
                }
                Err(e @ Error::Connect { .. }) if *attempts < plan.max_retries => {
                    *attempts += 1;
                    tracing::warn!("{}, retrying", e);
                    self.progress.check()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&mut self, transport: &mut Transport, head: &[u8], body: Option<&[u8]>) -> Result<()> {
        self.progress.enter(Phase::SendingRequest)?;
        transport.write_all(head).await?;
        if let Some(body) = body {
            if !body.is_empty() {
                transport.write_all(body).await?;
            }
        }
        transport.flush().await
    }

    /// Read and parse one final response. Returns what to do next and whether the transport
    /// may go back to the pool.
    async fn receive(
        &mut self,
        transport: &mut Transport,
        plan: &Plan,
        reused: bool,
    ) -> std::result::Result<(Next, bool), Failure> {
        self.progress.enter(Phase::ReceivingHeaders)?;
        let mut parser = ResponseParser::new();
        let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
        let mut chunk = vec![0u8; READ_BUF_SIZE];
        let mut received_any = false;
        let mut decided: Option<(Next, bool)> = None;
        let mut sink = Sink {
            options: &mut *self.options,
            user_data: self.user_data.as_ref(),
            info: &mut *self.info,
            head: Head::default(),
            deliver_body: false,
        };

        loop {
            parser.receive(&mut buf, &mut sink)?;

            if parser.state() == ParseState::HeadersComplete {
                let code = sink.head.code;
                if code < 200 && code != 101 {
                    parser.reset();
                    continue;
                }
                let mode = sink.head.body_mode(plan.no_body)?;
                let mut keep_alive = sink.head.keep_alive() && mode != BodyMode::UntilClose;
                let redirect = match sink.head.location() {
                    Some(location) if plan.follow && matches!(code, 301 | 302 | 303 | 307 | 308) => {
                        Some(uri::resolve_location(&plan.url, location)?)
                    }
                    _ => None,
                };
                match redirect {
                    Some(url) => {
                        let count = sink.info.redirect_count;
                        if plan.max_redirects >= 0 && i64::from(count) >= plan.max_redirects {
                            return Err(Failure::Fatal(Error::TooManyRedirects { count }));
                        }
                        if mode == BodyMode::UntilClose {
                            return Ok((Next::Redirect(url, code), false));
                        }
                        decided = Some((Next::Redirect(url, code), keep_alive));
                    }
                    None => {
                        if code == 101 {
                            keep_alive = false;
                        }
                        sink.info.content_length = match mode {
                            BodyMode::Chunked | BodyMode::UntilClose => -1,
                            _ => sink.head.content_length()?.map(|n| n as i64).unwrap_or(-1),
                        };
                        sink.info.content_type = sink.head.values("content-type").next().map(str::to_string);
                        sink.info.response_headers = std::mem::take(&mut sink.head.lines);
                        sink.deliver_body = true;
                        decided = Some((Next::Done, keep_alive));
                        if code == 101 {
                            return Ok((Next::Done, false));
                        }
                    }
                }
                self.progress.enter(Phase::ReceivingBody)?;
                parser.set_body_mode(mode);
                continue;
            }

            if parser.is_done() {
                break;
            }

            self.progress.check()?;
            let n = match transport.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) if reused && !received_any => return Err(Failure::Stale(e)),
                Err(e) => return Err(Failure::Fatal(e)),
            };
            if n == 0 {
                if reused && !received_any {
                    return Err(Failure::Stale(Error::Protocol(
                        "connection closed before any response".to_string(),
                    )));
                }
                parser.finish_on_close()?;
                if let Some((_, keep_alive)) = decided.as_mut() {
                    *keep_alive = false;
                }
                break;
            }
            received_any = true;
            buf.extend_from_slice(&chunk[..n]);
        }

        let (next, keep_alive) =
            decided.ok_or_else(|| Error::Protocol("response ended before headers".to_string()))?;
        Ok((next, keep_alive && buf.is_empty()))
    }
}
