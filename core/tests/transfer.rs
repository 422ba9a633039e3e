/*
 * transfer.rs
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

//! Synchronous transfers against a loopback server.

mod common;

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use common::{serve, serve_fixed, After};
use ferrocurl_core::{
    ConnectErrorKind, ErrorKind, InfoId, OptionId, OptionValue, PoolConfig, Share, TransferHandle,
    TransferState, UserData,
};

fn collect_body(handle: &mut TransferHandle) -> Arc<Mutex<Vec<u8>>> {
    let body = Arc::new(Mutex::new(Vec::new()));
    let sink = body.clone();
    handle
        .set_write_callback(move |data, _| {
            sink.lock().unwrap().extend_from_slice(data);
            data.len()
        })
        .unwrap();
    body
}

#[test]
fn follows_redirect_to_final_response() {
    let server = serve(|req, stream| {
        let reply: &[u8] = match req.path.as_str() {
            "/a" => b"HTTP/1.1 301 Moved Permanently\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n",
            _ => b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
        };
        stream.write_all(reply).unwrap();
        After::KeepOpen
    });
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/a")).unwrap();
    h.set_method("GET").unwrap();
    h.set_follow_redirects(true).unwrap();
    h.set_max_redirects(5).unwrap();
    let body = collect_body(&mut h);

    h.perform().unwrap();

    assert_eq!(h.state(), TransferState::Complete);
    assert_eq!(h.info_long(InfoId::ResponseCode).unwrap(), 200);
    assert!(h.info_str(InfoId::EffectiveUrl).unwrap().ends_with("/b"));
    assert_eq!(h.info_long(InfoId::RedirectCount).unwrap(), 1);
    assert_eq!(&body.lock().unwrap()[..], b"ok");
    assert_eq!(h.info_long(InfoId::NumConnects).unwrap(), 1);
    assert_eq!(server.connection_count(), 1);
    let paths: Vec<String> = server.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/a", "/b"]);
}

#[test]
fn zero_max_redirects_fails_on_first_redirect() {
    let server = serve_fixed("HTTP/1.1 302 Found\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n");
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/a")).unwrap();
    h.set_follow_redirects(true).unwrap();
    h.set_max_redirects(0).unwrap();

    let err = h.perform().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TooManyRedirects);
    assert_eq!(h.state(), TransferState::Failed(ErrorKind::TooManyRedirects));
    assert_eq!(h.info_long(InfoId::ResponseCode).unwrap(), 302);
    assert_eq!(h.info_long(InfoId::RedirectCount).unwrap(), 0);
    assert!(h.error_message().unwrap().contains("redirects"));
}

#[test]
fn redirect_not_followed_by_default() {
    let server = serve_fixed("HTTP/1.1 302 Found\r\nLocation: /b\r\nContent-Length: 4\r\n\r\nmove");
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/a")).unwrap();
    let body = collect_body(&mut h);
    h.perform().unwrap();
    assert_eq!(h.info_long(InfoId::ResponseCode).unwrap(), 302);
    assert_eq!(&body.lock().unwrap()[..], b"move");
}

#[test]
fn cancel_during_body_closes_transport() {
    let server = serve(|_, stream| {
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n0123456789")
            .unwrap();
        thread::sleep(Duration::from_secs(2));
        After::Close
    });
    let share = Share::new(PoolConfig::default()).unwrap();
    let mut h = TransferHandle::with_share(share.clone());
    h.set_url(&server.url("/")).unwrap();
    let token = h.cancel_token();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.set_write_callback(move |data, _| {
        sink.lock().unwrap().extend_from_slice(data);
        token.cancel();
        data.len()
    })
    .unwrap();

    let err = h.perform().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.state(), TransferState::Failed(ErrorKind::Cancelled));
    assert_eq!(share.pool().idle_count(), 0);
    assert!(!seen.lock().unwrap().is_empty());
}

#[test]
fn cancel_on_final_body_chunk_is_not_complete() {
    let server = serve_fixed("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    let share = Share::new(PoolConfig::default()).unwrap();
    let mut h = TransferHandle::with_share(share.clone());
    h.set_url(&server.url("/")).unwrap();
    let token = h.cancel_token();
    let cancel = token.clone();
    h.set_write_callback(move |data, _| {
        cancel.cancel();
        data.len()
    })
    .unwrap();

    let err = h.perform().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.state(), TransferState::Failed(ErrorKind::Cancelled));
    assert_eq!(share.pool().idle_count(), 0);
    assert!(!token.is_cancelled());

    h.set_write_callback(|data, _| data.len()).unwrap();
    h.perform().unwrap();
    assert_eq!(h.state(), TransferState::Complete);
    assert_eq!(server.connection_count(), 2);
}

#[test]
fn keep_alive_reuses_connection_across_performs() {
    let server = serve_fixed("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    let share = Share::new(PoolConfig::default()).unwrap();
    let mut h = TransferHandle::with_share(share.clone());
    h.set_url(&server.url("/")).unwrap();

    h.perform().unwrap();
    assert_eq!(h.info_long(InfoId::NumConnects).unwrap(), 1);
    assert_eq!(share.pool().idle_count(), 1);

    h.perform().unwrap();
    assert_eq!(h.info_long(InfoId::NumConnects).unwrap(), 0);
    assert_eq!(h.info_int64(InfoId::SizeDownload).unwrap(), 5);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(share.pool().idle_count(), 1);
}

#[test]
fn connection_close_is_not_pooled() {
    let server = serve(|_, stream| {
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
        After::Close
    });
    let share = Share::new(PoolConfig::default()).unwrap();
    let mut h = TransferHandle::with_share(share.clone());
    h.set_url(&server.url("/")).unwrap();
    h.perform().unwrap();
    assert_eq!(share.pool().idle_count(), 0);
    h.perform().unwrap();
    assert_eq!(server.connection_count(), 2);
}

#[test]
fn chunked_body_is_decoded() {
    let server = serve_fixed(
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Type: text/plain\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
    );
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/")).unwrap();
    let body = collect_body(&mut h);
    h.perform().unwrap();
    assert_eq!(&body.lock().unwrap()[..], b"Wikipedia");
    assert_eq!(h.info_int64(InfoId::ContentLength).unwrap(), -1);
    assert_eq!(h.info_int64(InfoId::SizeDownload).unwrap(), 9);
    assert_eq!(h.info_str(InfoId::ContentType).unwrap(), "text/plain");
}

#[test]
fn close_delimited_http10_body() {
    let server = serve(|_, stream| {
        stream.write_all(b"HTTP/1.0 200 OK\r\n\r\nuntil close").unwrap();
        After::Close
    });
    let share = Share::new(PoolConfig::default()).unwrap();
    let mut h = TransferHandle::with_share(share.clone());
    h.set_url(&server.url("/")).unwrap();
    let body = collect_body(&mut h);
    h.perform().unwrap();
    assert_eq!(&body.lock().unwrap()[..], b"until close");
    assert_eq!(share.pool().idle_count(), 0);
}

#[test]
fn short_write_callback_aborts() {
    let server = serve_fixed("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/")).unwrap();
    h.set_write_callback(|_, _| 0).unwrap();
    let err = h.perform().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert_eq!(h.state(), TransferState::Failed(ErrorKind::Aborted));
}

#[test]
fn timeout_elapses() {
    let server = serve(|_, _| {
        thread::sleep(Duration::from_secs(2));
        After::Close
    });
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/slow")).unwrap();
    h.set_timeout(Duration::from_millis(200)).unwrap();
    let err = h.perform().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert_eq!(h.state(), TransferState::Failed(ErrorKind::TimedOut));
}

#[test]
fn timeout_on_reused_connection_is_not_retried() {
    let server = serve(|req, stream| {
        if req.path == "/slow" {
            thread::sleep(Duration::from_secs(2));
            return After::Close;
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
        After::KeepOpen
    });
    let share = Share::new(PoolConfig::default()).unwrap();
    let mut h = TransferHandle::with_share(share.clone());
    h.set_url(&server.url("/fast")).unwrap();
    h.perform().unwrap();
    assert_eq!(share.pool().idle_count(), 1);

    h.set_url(&server.url("/slow")).unwrap();
    h.set_timeout(Duration::from_millis(200)).unwrap();
    let started = Instant::now();
    let err = h.perform().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(server.connection_count(), 1);
    assert_eq!(share.pool().idle_count(), 0);
}

#[test]
fn header_callback_sees_raw_lines() {
    let server = serve_fixed("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nX-Test: yes\r\n\r\nok");
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/")).unwrap();
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    h.set_header_callback(move |data, user| {
        assert_eq!(user.and_then(|u| u.downcast_ref::<&str>()).copied(), Some("tag"));
        sink.lock().unwrap().push(String::from_utf8_lossy(data).into_owned());
        data.len()
    })
    .unwrap();
    h.set_user_data(UserData::new("tag")).unwrap();
    h.perform().unwrap();

    let lines = lines.lock().unwrap().clone();
    assert_eq!(lines, vec!["HTTP/1.1 200 OK\r\n", "Content-Length: 2\r\n", "X-Test: yes\r\n", "\r\n"]);
    let total: usize = lines.iter().map(String::len).sum();
    assert_eq!(h.info_long(InfoId::HeaderSize).unwrap(), total as i64);
    assert_eq!(
        h.info_list(InfoId::ResponseHeaders).unwrap(),
        vec!["Content-Length: 2".to_string(), "X-Test: yes".to_string()]
    );
}

#[test]
fn interim_response_is_skipped() {
    let server = serve_fixed("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nx");
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/")).unwrap();
    let body = collect_body(&mut h);
    h.perform().unwrap();
    assert_eq!(h.info_long(InfoId::ResponseCode).unwrap(), 200);
    assert_eq!(&body.lock().unwrap()[..], b"x");
}

#[test]
fn post_request_head_and_body() {
    let server = serve_fixed("HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n");
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/items?x=1")).unwrap();
    h.set_post_fields(b"name=ferro".to_vec()).unwrap();
    h.set_headers(["Accept:", "X-Trace: 42"]).unwrap();
    h.set_option(OptionId::UserPwd, OptionValue::Str("user:pass".into())).unwrap();
    h.set_option(OptionId::UserAgent, OptionValue::Str("agent-under-test/1".into())).unwrap();
    h.perform().unwrap();
    assert_eq!(h.info_long(InfoId::ResponseCode).unwrap(), 201);

    let req = &server.requests()[0];
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/items?x=1");
    assert_eq!(req.body, b"name=ferro");
    assert_eq!(req.header("Content-Length"), Some("10"));
    assert_eq!(req.header("Accept"), None);
    assert_eq!(req.header("X-Trace"), Some("42"));
    assert_eq!(req.header("User-Agent"), Some("agent-under-test/1"));
    assert_eq!(req.header("Authorization"), Some("Basic dXNlcjpwYXNz"));
    assert_eq!(req.header("Host"), Some(server.addr.to_string().as_str()));
}

#[test]
fn no_body_sends_head() {
    let server = serve_fixed("HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n");
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/")).unwrap();
    h.set_option(OptionId::NoBody, OptionValue::Long(1)).unwrap();
    h.perform().unwrap();
    assert_eq!(server.requests()[0].method, "HEAD");
    assert_eq!(h.info_int64(InfoId::ContentLength).unwrap(), 100);
    assert_eq!(h.info_int64(InfoId::SizeDownload).unwrap(), 0);
}

#[test]
fn info_reset_on_each_execution() {
    let server = serve(|req, stream| {
        let reply: &[u8] = match req.path.as_str() {
            "/start" => b"HTTP/1.1 307 Temporary Redirect\r\nLocation: /end\r\nContent-Length: 0\r\n\r\n",
            _ => b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
        };
        stream.write_all(reply).unwrap();
        After::KeepOpen
    });
    let mut h = TransferHandle::new();
    assert_eq!(h.info_long(InfoId::RedirectCount).unwrap_err().kind(), ErrorKind::InfoNotAvailable);
    h.set_url(&server.url("/start")).unwrap();
    h.set_follow_redirects(true).unwrap();
    h.perform().unwrap();
    h.perform().unwrap();
    assert_eq!(h.info_long(InfoId::RedirectCount).unwrap(), 1);
    assert!(h.info_double(InfoId::TotalTime).unwrap() >= 0.0);
    assert_eq!(h.info_double(InfoId::ResponseCode).unwrap_err().kind(), ErrorKind::BadInfoKind);
}

#[test]
fn refused_connect_reports_subtype() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut h = TransferHandle::new();
    h.set_url(&format!("http://127.0.0.1:{}/", port)).unwrap();
    h.set_option(OptionId::MaxRetries, OptionValue::Long(2)).unwrap();
    let err = h.perform().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect(ConnectErrorKind::Refused));
    assert_eq!(h.info_long(InfoId::NumConnects).unwrap(), 0);
}

#[test]
fn malformed_response_is_protocol_error() {
    let server = serve(|_, stream| {
        stream.write_all(b"NOT HTTP AT ALL\r\n\r\n").unwrap();
        After::Close
    });
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/")).unwrap();
    let err = h.perform().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}
