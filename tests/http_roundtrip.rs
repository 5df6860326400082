//! End-to-end HTTP/1.x exchanges over a real loopback connection,
//! driving the full worker `select` loop rather than calling session
//! internals directly.

use ews::{Config, RouteStatus, Server, Session, SessionState};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

fn start_server(port: u16) -> Server {
    let config = Config {
        http_listen_port: port,
        http_listen_backlog: 16,
        idle_timeout: 2_000,
        max_http_clients: 4,
        ..Config::default()
    };
    let mut server = Server::init(config).expect("init");
    server.start().expect("start");
    server
}

fn connect(port: u16) -> TcpStream {
    // The worker needs a moment to actually be in its select() loop.
    std::thread::sleep(Duration::from_millis(50));
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

fn read_all(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[test]
fn unregistered_path_falls_back_to_404() {
    let server = start_server(18_080);
    let mut stream = connect(18_080);
    stream
        .write_all(b"GET /nope HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();
    let resp = read_all(&mut stream);
    assert!(resp.starts_with("HTTP/1.1 404"));
    assert!(resp.contains("404 Not Found"));
    assert!(resp.ends_with("<h1>Not Found</h1>"));
    drop(server);
}

#[test]
fn content_length_response_with_http10_closes_by_default() {
    let server = start_server(18_081);
    server.route_append("/hello", |sess: &mut Session, state: SessionState| {
        match state {
            SessionState::RequestBegin => RouteStatus::Found,
            SessionState::RequestHeader | SessionState::RequestBody => RouteStatus::Next,
            SessionState::ResponseBegin => {
                sess.status(200, "OK");
                RouteStatus::Next
            }
            SessionState::ResponseHeader => {
                sess.header("Content-Length", "5");
                RouteStatus::Next
            }
            SessionState::ResponseBody => {
                let _ = sess.send(b"hello");
                RouteStatus::Done
            }
            _ => RouteStatus::Done,
        }
    });

    let mut stream = connect(18_081);
    stream
        .write_all(b"GET /hello HTTP/1.0\r\n\r\n")
        .unwrap();
    let resp = read_all(&mut stream);
    assert!(resp.starts_with("HTTP/1.0 200"));
    assert!(resp.ends_with("hello"));
    drop(server);
}

#[test]
fn chunked_response_with_keepalive_connection_close() {
    let server = start_server(18_082);
    server.route_append("/chunked", |sess: &mut Session, state: SessionState| {
        match state {
            SessionState::RequestBegin => RouteStatus::Found,
            SessionState::RequestHeader | SessionState::RequestBody => RouteStatus::Next,
            SessionState::ResponseBegin => {
                sess.status(200, "OK");
                RouteStatus::Next
            }
            SessionState::ResponseHeader => {
                sess.header("Transfer-Encoding", "chunked");
                sess.header("Connection", "close");
                RouteStatus::Next
            }
            SessionState::ResponseBody => {
                let _ = sess.send(b"part");
                RouteStatus::Done
            }
            _ => RouteStatus::Done,
        }
    });

    let mut stream = connect(18_082);
    stream
        .write_all(b"GET /chunked HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let resp = read_all(&mut stream);
    assert!(resp.starts_with("HTTP/1.1 200"));
    assert!(resp.contains("4\r\npart\r\n"));
    drop(server);
}

#[test]
fn unsupported_version_gets_505() {
    let server = start_server(18_083);
    let mut stream = connect(18_083);
    stream
        .write_all(b"GET / HTTP/2.0\r\n\r\n")
        .unwrap();
    let resp = read_all(&mut stream);
    assert!(resp.starts_with("HTTP/1.0 505"));
    assert!(resp.ends_with("<h1>HTTP Version Not Supported</h1>"));
    drop(server);
}

#[test]
fn dot_segments_and_percent_decoding_normalize_before_routing() {
    let server = start_server(18_084);
    server.route_append("/a/b", |sess: &mut Session, state: SessionState| match state {
        SessionState::RequestBegin => RouteStatus::Found,
        SessionState::RequestHeader | SessionState::RequestBody => RouteStatus::Next,
        SessionState::ResponseBegin => {
            sess.status(200, "OK");
            RouteStatus::Next
        }
        SessionState::ResponseHeader => {
            sess.header("Content-Length", "2");
            RouteStatus::Next
        }
        SessionState::ResponseBody => {
            let _ = sess.send(b"ok");
            RouteStatus::Done
        }
        _ => RouteStatus::Done,
    });

    let mut stream = connect(18_084);
    stream
        .write_all(b"GET /..//a/./b HTTP/1.0\r\n\r\n")
        .unwrap();
    let resp = read_all(&mut stream);
    assert!(resp.starts_with("HTTP/1.0 200"));
    assert!(resp.ends_with("ok"));
    drop(server);
}
