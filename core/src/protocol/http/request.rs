/*
 * request.rs
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

//! HTTP request: method, URL, headers, optional body, and the HTTP/1.1 request head encoder.
//!
//! `RequestBuilder` is the input to `Client::respond`; the transfer engine encodes heads with
//! `RequestHead` from a handle's options.

use bytes::{BufMut, BytesMut};

use crate::uri::Target;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Trace,
    Other(String),
}

impl Method {
    pub fn parse(s: &str) -> Method {
        match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            "TRACE" => Method::Trace,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Trace => "TRACE",
            Method::Other(s) => s,
        }
    }

    /// Methods whose requests may be sent again after a failed attempt.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Method::Get | Method::Head | Method::Put | Method::Delete | Method::Options | Method::Trace
        )
    }
}

/// Mutable request builder: method, URL, headers, body.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    pub method: Method,
    pub url: String,
    /// Header fields in send order. Duplicate names are sent as separate lines.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RequestBuilder {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        let mut r = Self::new(Method::Post, url);
        r.body = Some(body);
        r
    }

    /// Add a header. An empty value removes the default header of that name.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(&mut self, data: Vec<u8>) -> &mut Self {
        self.body = Some(data);
        self
    }

    /// Header lists in the `Name: value` form the HEADERS option takes.
    pub(crate) fn header_lines(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(n, v)| if v.is_empty() { format!("{}:", n) } else { format!("{}: {}", n, v) })
            .collect()
    }
}

/// Everything needed to write one HTTP/1.1 request head.
pub(crate) struct RequestHead<'a> {
    pub method: &'a str,
    pub target: &'a Target,
    /// Caller header lines, `Name: value` or `Name:` to suppress a default.
    pub headers: &'a [String],
    pub user_agent: Option<&'a str>,
    pub authorization: Option<&'a str>,
    pub content_length: Option<usize>,
}

fn line_name(line: &str) -> &str {
    line.split(':').next().unwrap_or(line).trim()
}

fn line_value(line: &str) -> &str {
    line.split_once(':').map(|(_, v)| v.trim()).unwrap_or("")
}

impl RequestHead<'_> {
    /// A caller line with this name replaces (or, when empty, removes) the default.
    fn overridden(&self, name: &str) -> bool {
        self.headers.iter().any(|l| line_name(l).eq_ignore_ascii_case(name))
    }

    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(256);
        out.put_slice(self.method.as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.target.path.as_bytes());
        out.put_slice(b" HTTP/1.1\r\n");

        let host = self.target.host_header();
        let content_length = self.content_length.map(|n| n.to_string());
        let defaults = [
            ("Host", Some(host.as_str())),
            ("Authorization", self.authorization),
            ("User-Agent", self.user_agent),
            ("Accept", Some("*/*")),
            ("Content-Length", content_length.as_deref()),
        ];
        for (name, value) in defaults {
            if let Some(value) = value {
                if !self.overridden(name) {
                    put_field(&mut out, name, value);
                }
            }
        }
        for line in self.headers {
            let value = line_value(line);
            if !value.is_empty() {
                put_field(&mut out, line_name(line), value);
            }
        }
        out.put_slice(b"\r\n");
        out
    }
}

fn put_field(out: &mut BytesMut, name: &str, value: &str) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value.as_bytes());
    out.put_slice(b"\r\n");
}
