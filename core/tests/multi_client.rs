/*
 * multi_client.rs
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

//! Multiplexed transfers and the convenience client against a loopback server.

mod common;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{serve, serve_fixed, After};
use ferrocurl_core::{
    Client, ErrorKind, InfoId, Method, Multi, MultiConfig, PoolConfig, RequestBuilder, TransferHandle,
    TransferState,
};

fn handle_for(url: &str, bodies: &Arc<Mutex<Vec<Vec<u8>>>>) -> TransferHandle {
    let mut h = TransferHandle::new();
    h.set_url(url).unwrap();
    let slot = {
        let mut all = bodies.lock().unwrap();
        all.push(Vec::new());
        all.len() - 1
    };
    let bodies = bodies.clone();
    h.set_write_callback(move |data, _| {
        bodies.lock().unwrap()[slot].extend_from_slice(data);
        data.len()
    })
    .unwrap();
    h
}

#[test]
fn multi_runs_all_transfers_with_connect_cap() {
    let server = serve_fixed("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    let mut multi = Multi::with_config(MultiConfig {
        max_connecting: 1,
        pool: PoolConfig::default(),
    })
    .unwrap();
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let ids: Vec<_> = (0..3)
        .map(|i| multi.add(handle_for(&server.url(&format!("/{}", i)), &bodies)))
        .collect();

    multi.run().unwrap();

    let mut completed = Vec::new();
    while let Some(done) = multi.info_read() {
        assert!(done.result.is_ok(), "{:?}", done.result);
        completed.push(done.id);
    }
    completed.sort();
    assert_eq!(completed, ids);
    for id in &ids {
        assert_eq!(multi.state(*id).unwrap(), TransferState::Complete);
        let h = multi.remove(*id).unwrap();
        assert_eq!(h.info_long(InfoId::ResponseCode).unwrap(), 200);
    }
    for body in bodies.lock().unwrap().iter() {
        assert_eq!(&body[..], b"hello");
    }
    assert!(multi.pool().idle_count() >= 1);
    assert_eq!(multi.pending(), 0);
}

#[test]
fn multi_perform_and_wait_loop() {
    let server = serve(|req, stream| {
        if req.path == "/slow" {
            std::thread::sleep(Duration::from_millis(100));
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
        After::KeepOpen
    });
    let mut multi = Multi::new().unwrap();
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let slow = multi.add(handle_for(&server.url("/slow"), &bodies));
    let fast = multi.add(handle_for(&server.url("/fast"), &bodies));

    let mut finished = 0;
    let mut rounds = 0;
    while finished < 2 && rounds < 1000 {
        finished += multi.perform().unwrap();
        if finished < 2 {
            multi.wait(Duration::from_millis(500)).unwrap();
        }
        rounds += 1;
    }
    assert_eq!(finished, 2);
    assert_eq!(multi.state(slow).unwrap(), TransferState::Complete);
    assert_eq!(multi.state(fast).unwrap(), TransferState::Complete);
    assert_eq!(multi.info_read().map(|c| c.id), Some(fast));
    assert_eq!(multi.info_read().map(|c| c.id), Some(slow));
}

#[test]
fn multi_failure_is_reported_in_completion() {
    let server = serve_fixed("HTTP/1.1 302 Found\r\nLocation: /again\r\nContent-Length: 0\r\n\r\n");
    let mut multi = Multi::new().unwrap();
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/")).unwrap();
    h.set_follow_redirects(true).unwrap();
    h.set_max_redirects(2).unwrap();
    let id = multi.add(h);
    multi.run().unwrap();
    let done = multi.info_read().unwrap();
    assert_eq!(done.id, id);
    assert_eq!(done.result.unwrap_err().kind(), ErrorKind::TooManyRedirects);
    assert_eq!(multi.state(id).unwrap(), TransferState::Failed(ErrorKind::TooManyRedirects));
    let h = multi.remove(id).unwrap();
    assert_eq!(h.info_long(InfoId::RedirectCount).unwrap(), 2);
}

#[test]
fn multi_cancel_mid_body_closes_transport() {
    let server = serve(|_, stream| {
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n0123456789")
            .unwrap();
        std::thread::sleep(Duration::from_secs(2));
        After::Close
    });
    let mut multi = Multi::new().unwrap();
    let got_body = Arc::new(AtomicBool::new(false));
    let mut h = TransferHandle::new();
    h.set_url(&server.url("/")).unwrap();
    let flag = got_body.clone();
    h.set_write_callback(move |data, _| {
        flag.store(true, Ordering::SeqCst);
        data.len()
    })
    .unwrap();
    let id = multi.add(h);

    let mut rounds = 0;
    while !got_body.load(Ordering::SeqCst) && rounds < 100 {
        multi.perform().unwrap();
        if !got_body.load(Ordering::SeqCst) {
            multi.wait(Duration::from_millis(100)).unwrap();
        }
        rounds += 1;
    }
    assert!(got_body.load(Ordering::SeqCst));
    assert_eq!(multi.state(id).unwrap(), TransferState::ReceivingBody);

    multi.cancel(id).unwrap();
    multi.perform().unwrap();

    let done = multi.info_read().unwrap();
    assert_eq!(done.id, id);
    assert_eq!(done.result.unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(multi.state(id).unwrap(), TransferState::Failed(ErrorKind::Cancelled));
    assert_eq!(multi.pool().idle_count(), 0);
    assert_eq!(multi.pending(), 0);
}

#[test]
fn client_get_and_post() {
    let server = serve(|req, stream| {
        let body = if req.method == "POST" { req.body.clone() } else { b"pong".to_vec() };
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .unwrap();
        stream.write_all(&body).unwrap();
        After::KeepOpen
    });
    let client = Client::new().unwrap();

    let res = client.respond(&RequestBuilder::get(server.url("/_ping"))).unwrap();
    assert_eq!(res.code, 200);
    assert!(res.is_success());
    assert_eq!(res.header("content-type"), Some("application/json"));
    assert_eq!(res.text(), "pong");

    let mut req = RequestBuilder::post(server.url("/containers/create"), b"{\"Image\":\"x\"}".to_vec());
    req.header("Content-Type", "application/json");
    let res = client.respond(&req).unwrap();
    assert_eq!(&res.body[..], b"{\"Image\":\"x\"}");

    let del = RequestBuilder::new(Method::Delete, server.url("/containers/1"));
    client.respond(&del).unwrap();

    let methods: Vec<String> = server.requests().into_iter().map(|r| r.method).collect();
    assert_eq!(methods, vec!["GET", "POST", "DELETE"]);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(client.pool().idle_count(), 1);
}

#[cfg(unix)]
#[test]
fn client_over_unix_socket() {
    use std::os::unix::net::UnixListener;

    let dir = std::env::temp_dir().join(format!("ferrocurl-unix-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("daemon.sock");
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).unwrap();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        let req = common::read_request(&mut stream, &mut buf).unwrap();
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nversion")
            .unwrap();
        req
    });

    let client = Client::unix(&path).unwrap();
    assert_eq!(client.unix_socket_path(), Some(path.as_path()));
    let res = client.respond(&RequestBuilder::get("http://localhost/version")).unwrap();
    assert_eq!(res.code, 200);
    assert_eq!(res.text(), "version");

    let req = server.join().unwrap();
    assert_eq!(req.path, "/version");
    assert_eq!(req.header("Host"), Some("localhost"));
    let _ = std::fs::remove_dir_all(&dir);
}
