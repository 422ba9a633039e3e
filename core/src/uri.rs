/*
 * uri.rs
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

//! URL handling for transfers: parsing, request targets, Host header values and redirect
//! resolution. Location values from servers are percent-encoded where they contain bytes that
//! are not valid in a URL (spaces, controls, non-ASCII) before being resolved.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::error::{Error, Result};

/// Bytes a server may leave raw in a Location header that must be encoded before resolution.
const LOCATION_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn is_tls(self) -> bool {
        self == Scheme::Https
    }
}

/// Parse an absolute URL with a host. Returns a human-readable reason on failure.
pub fn parse_url(s: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(s).map_err(|e| e.to_string())?;
    if url.cannot_be_a_base() || url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err("URL has no host".to_string());
    }
    Ok(url)
}

/// Where a request goes: scheme, host, port and the origin-form target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path and query, e.g. `/a?b=1`.
    pub path: String,
}

impl Target {
    pub fn from_url(url: &Url) -> Result<Target> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        };
        let host = match url.host() {
            Some(url::Host::Ipv6(addr)) => addr.to_string(),
            Some(h) => h.to_string(),
            None => {
                return Err(Error::InvalidUrl {
                    url: url.to_string(),
                    reason: "no host".to_string(),
                })
            }
        };
        let port = url.port().unwrap_or(scheme.default_port());
        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(q) = url.query() {
            path.push('?');
            path.push_str(q);
        }
        Ok(Target {
            scheme,
            host,
            port,
            path,
        })
    }

    /// Host header value: the port is included only when it is not the scheme default.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

/// Resolve a Location header value against the URL that produced it.
pub fn resolve_location(base: &Url, location: &str) -> Result<Url> {
    let encoded = utf8_percent_encode(location.trim(), LOCATION_UNSAFE).to_string();
    let next = base.join(&encoded).map_err(|e| Error::InvalidUrl {
        url: location.to_string(),
        reason: e.to_string(),
    })?;
    if next.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(Error::InvalidUrl {
            url: location.to_string(),
            reason: "redirect target has no host".to_string(),
        });
    }
    Ok(next)
}
