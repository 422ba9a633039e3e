/*
 * parser.rs
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

//! HTTP/1.x response push parser: status line, headers, body (Content-Length, chunked or
//! read-until-close).
//!
//! The parser never reads from the network. The engine appends received bytes to a `BytesMut`
//! and calls `receive`; every complete token is consumed from the buffer and passed to the
//! handler. Handler errors stop parsing and are returned unchanged.

use bytes::Buf;
use bytes::BytesMut;

use crate::error::{Error, Result};

/// Upper bound on status line plus header block, per response.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Upper bound on one chunk-size line, extensions and terminator included.
pub const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// Callbacks for response events. Raw lines include their line terminator.
pub trait H1ResponseHandler {
    fn status(&mut self, raw: &[u8], version: Version, code: u16, reason: &str) -> Result<()>;
    fn header(&mut self, raw: &[u8], name: &str, value: &str) -> Result<()>;
    /// The empty line ending the header block.
    fn end_headers(&mut self, raw: &[u8]) -> Result<()>;
    fn body_chunk(&mut self, data: &[u8]) -> Result<()>;
    fn trailer(&mut self, raw: &[u8], name: &str, value: &str) -> Result<()>;
}

/// How the body following a header block is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    StatusLine,
    Headers,
    /// Headers done; the caller must call `set_body_mode` (or `reset` for an interim response).
    HeadersComplete,
    Body,
    BodyUntilClose,
    ChunkSize,
    ChunkData,
    ChunkDataEnd,
    ChunkTrailer,
    Done,
}

pub struct ResponseParser {
    state: ParseState,
    head_size: usize,
    remaining: u64,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StatusLine,
            head_size: 0,
            remaining: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == ParseState::Done
    }

    /// Back to the status line, for the response that follows an interim (1xx) one.
    pub fn reset(&mut self) {
        self.state = ParseState::StatusLine;
        self.head_size = 0;
        self.remaining = 0;
    }

    /// Length of the next line including its terminator (LF, optionally preceded by CR).
    fn find_line(buf: &[u8]) -> Option<usize> {
        buf.iter().position(|b| *b == b'\n').map(|i| i + 1)
    }

    fn strip_eol(line: &[u8]) -> &[u8] {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        line.strip_suffix(b"\r").unwrap_or(line)
    }

    /// Take one head line, enforcing the header size limit.
    fn head_line(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>> {
        match Self::find_line(buf) {
            Some(n) => {
                self.head_size += n;
                if self.head_size > MAX_HEAD_SIZE {
                    return Err(Error::Protocol("response header too large".to_string()));
                }
                Ok(Some(buf.split_to(n)))
            }
            None => {
                if self.head_size + buf.len() > MAX_HEAD_SIZE {
                    return Err(Error::Protocol("response header too large".to_string()));
                }
                Ok(None)
            }
        }
    }

    /// Consume and parse as much as possible from `buf`. Incomplete lines stay in the buffer.
    pub fn receive<H: H1ResponseHandler>(&mut self, buf: &mut BytesMut, handler: &mut H) -> Result<()> {
        while !buf.is_empty() {
            match self.state {
                ParseState::StatusLine => {
                    let Some(line) = self.head_line(buf)? else {
                        return Ok(());
                    };
                    let text = std::str::from_utf8(Self::strip_eol(&line))
                        .map_err(|_| Error::Protocol("status line is not valid UTF-8".to_string()))?;
                    let (version, code, reason) = parse_status_line(text)?;
                    handler.status(&line, version, code, reason)?;
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some(line) = self.head_line(buf)? else {
                        return Ok(());
                    };
                    let content = Self::strip_eol(&line);
                    if content.is_empty() {
                        handler.end_headers(&line)?;
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    let (name, value) = parse_field(content)?;
                    handler.header(&line, name, value)?;
                }
                ParseState::HeadersComplete | ParseState::Done => return Ok(()),
                ParseState::Body => {
                    let to_read = (self.remaining.min(buf.len() as u64)) as usize;
                    let chunk = buf.split_to(to_read);
                    self.remaining -= to_read as u64;
                    handler.body_chunk(&chunk)?;
                    if self.remaining == 0 {
                        self.state = ParseState::Done;
                    }
                }
                ParseState::BodyUntilClose => {
                    let chunk = buf.split_to(buf.len());
                    handler.body_chunk(&chunk)?;
                }
                ParseState::ChunkSize => {
                    let found = Self::find_line(buf);
                    if found.unwrap_or(buf.len()) > MAX_CHUNK_LINE {
                        return Err(Error::Protocol("chunk size line too long".to_string()));
                    }
                    let Some(n) = found else {
                        return Ok(());
                    };
                    let line = buf.split_to(n);
                    self.remaining = parse_chunk_size(Self::strip_eol(&line))?;
                    self.state = if self.remaining == 0 {
                        ParseState::ChunkTrailer
                    } else {
                        ParseState::ChunkData
                    };
                }
                ParseState::ChunkData => {
                    let to_read = (self.remaining.min(buf.len() as u64)) as usize;
                    let chunk = buf.split_to(to_read);
                    self.remaining -= to_read as u64;
                    handler.body_chunk(&chunk)?;
                    if self.remaining == 0 {
                        self.state = ParseState::ChunkDataEnd;
                    }
                }
                ParseState::ChunkDataEnd => {
                    if buf.starts_with(b"\r\n") {
                        buf.advance(2);
                    } else if buf.starts_with(b"\n") {
                        buf.advance(1);
                    } else if buf[..] == b"\r"[..] {
                        return Ok(());
                    } else {
                        return Err(Error::Protocol("missing CRLF after chunk data".to_string()));
                    }
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => {
                    let Some(line) = self.head_line(buf)? else {
                        return Ok(());
                    };
                    let content = Self::strip_eol(&line);
                    if content.is_empty() {
                        self.state = ParseState::Done;
                    } else {
                        let (name, value) = parse_field(content)?;
                        handler.trailer(&line, name, value)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Choose body framing once the header block is complete.
    pub fn set_body_mode(&mut self, mode: BodyMode) {
        if self.state != ParseState::HeadersComplete {
            return;
        }
        self.state = match mode {
            BodyMode::Empty | BodyMode::Length(0) => ParseState::Done,
            BodyMode::Length(n) => {
                self.remaining = n;
                ParseState::Body
            }
            BodyMode::Chunked => ParseState::ChunkSize,
            BodyMode::UntilClose => ParseState::BodyUntilClose,
        };
    }

    /// The peer closed the stream. Only a close-delimited body may end this way.
    pub fn finish_on_close(&mut self) -> Result<()> {
        match self.state {
            ParseState::BodyUntilClose | ParseState::Done => {
                self.state = ParseState::Done;
                Ok(())
            }
            ParseState::StatusLine if self.head_size == 0 => {
                Err(Error::Protocol("connection closed before any response".to_string()))
            }
            _ => Err(Error::Protocol("connection closed before response was complete".to_string())),
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_status_line(line: &str) -> Result<(Version, u16, &str)> {
    let bad = || Error::Protocol(format!("malformed status line {:?}", line));
    let mut parts = line.splitn(3, ' ');
    let version = match parts.next() {
        Some("HTTP/1.1") => Version::Http11,
        Some("HTTP/1.0") => Version::Http10,
        _ => return Err(bad()),
    };
    let code = parts
        .next()
        .filter(|c| c.len() == 3 && c.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|c| c.parse::<u16>().ok())
        .filter(|c| *c >= 100)
        .ok_or_else(bad)?;
    Ok((version, code, parts.next().unwrap_or("")))
}

fn parse_field(line: &[u8]) -> Result<(&str, &str)> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::Protocol("header line is not valid UTF-8".to_string()))?;
    let colon = text
        .find(':')
        .ok_or_else(|| Error::Protocol(format!("header line without colon {:?}", text)))?;
    let name = &text[..colon];
    if !crate::options::is_token(name) {
        return Err(Error::Protocol(format!("invalid header name {:?}", name)));
    }
    Ok((name, text[colon + 1..].trim_matches(|c| c == ' ' || c == '\t')))
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::Protocol("chunk size is not valid UTF-8".to_string()))?;
    let hex = text.split(';').next().unwrap_or(text).trim();
    if hex.is_empty() {
        return Err(Error::Protocol("empty chunk size".to_string()));
    }
    u64::from_str_radix(hex, 16).map_err(|_| Error::Protocol(format!("invalid chunk size {:?}", hex)))
}
