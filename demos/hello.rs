//! Minimal embedder: a couple of routes registered against a `Server`,
//! run to completion on Ctrl-C.

use ews::{Config, RouteStatus, Server, Session, SessionState};
use std::sync::{Arc, Mutex};

fn hello(sess: &mut Session, state: SessionState) -> RouteStatus {
    match state {
        SessionState::RequestBegin => RouteStatus::Found,
        SessionState::RequestHeader | SessionState::RequestBody => RouteStatus::Next,
        SessionState::ResponseBegin => {
            sess.status(200, "OK");
            RouteStatus::Next
        }
        SessionState::ResponseHeader => {
            sess.header("Content-Type", "text/plain");
            sess.header("Content-Length", "13");
            RouteStatus::Next
        }
        SessionState::ResponseBody => {
            let _ = sess.send(b"Hello, world!");
            RouteStatus::Done
        }
        _ => RouteStatus::Done,
    }
}

fn main() {
    env_logger::init();

    let config = Config {
        http_listen_port: 8080,
        ..Config::default()
    };
    let mut server = Server::init(config).expect("server init");
    server.route_append("/hello", hello);
    server.start().expect("server start");

    let server = Arc::new(Mutex::new(server));
    Server::install_signal_shutdown(Arc::clone(&server)).expect("signal handler");

    log::info!("serving on :8080, press ctrl-c to stop");
    loop {
        std::thread::park();
    }
}
