//! The HTTP/1.x session engine: a six-state machine driven by the
//! worker's read/write dispatch, walking the registered route list and
//! calling into a [`crate::route::RouteHandler`] at each state.
//!
//! State values encode phase in the high nibble and step in the low
//! nibble (`REQUEST_BEGIN = 0x00` .. `RESPONSE_BODY = 0x12`,
//! `FINALIZE = 0x3F`), matching `original_source/src/http.h`'s
//! `ews_sess_state_t` exactly — `want_read`/`want_write` test the high
//! nibble, and the ingress/egress dispatch in `do_read`/`do_write` tests
//! the low nibble.

use crate::fnmatch;
use crate::path;
use crate::route::{RouteList, RouteStatus};
use crate::socket::{SockFlags, Socket};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use bitflags::bitflags;

/// Per-connection read buffer. Unlike the per-request `HttpBlock`, this
/// (along with `bufpos`/`buflen`) survives across a keep-alive
/// connection's requests — bytes for the next pipelined request can
/// already be sitting past the one just finished.
pub const SESSION_BUFSIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    RequestBegin = 0x00,
    RequestHeader = 0x01,
    RequestBody = 0x02,
    ResponseBegin = 0x10,
    ResponseHeader = 0x11,
    ResponseBody = 0x12,
    Finalize = 0x3F,
}

impl SessionState {
    fn ingress_step(self) -> u8 {
        self as u8 & 0x0f
    }

    fn phase(self) -> u8 {
        self as u8 & 0x30
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::RequestBegin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http09,
    Http10,
    Http11,
}

impl Default for HttpVersion {
    fn default() -> Self {
        HttpVersion::Http09
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Other,
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl Method {
    fn parse(s: &str) -> Self {
        match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            "CONNECT" => Method::Connect,
            "TRACE" => Method::Trace,
            _ => Method::Other,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct HttpFlags: u32 {
        const KEEPALIVE         = 1 << 0;
        const REQUEST_CHUNKED   = 1 << 1;
        const RESPONSE_CHUNKED  = 1 << 2;
    }
}

/// Everything scrubbed at `finalize()`, i.e. everything scoped to a
/// single request/response exchange rather than the whole connection.
#[derive(Default)]
struct HttpBlock {
    version: HttpVersion,
    route_idx: Option<usize>,
    state: SessionState,
    prev_state: SessionState,
    state_count: usize,
    flags: HttpFlags,
    method: Method,
    path: String,
    query: Option<String>,
    header_name: String,
    header_value: String,
    request_content_length: Option<u64>,
    request_remaining: u64,
    response_length: Option<u64>,
}

/// One HTTP/1.x connection: a socket slot plus the session state
/// machine driving it. Holds a shared, lockable handle on the route
/// list rather than a route list of its own, since routes are mutable
/// server-wide state (`route_append`/`route_clear` can run at any time,
/// from any thread) while every other field here is exclusively owned
/// by the single worker thread.
pub struct Session {
    pub sock: Socket,
    buf: Box<[u8; SESSION_BUFSIZE]>,
    bufpos: usize,
    buflen: usize,
    block: HttpBlock,
    routes: Arc<Mutex<RouteList>>,
}

impl Session {
    pub fn new(sock: Socket, routes: Arc<Mutex<RouteList>>) -> Self {
        Self {
            sock,
            buf: Box::new([0u8; SESSION_BUFSIZE]),
            bufpos: 0,
            buflen: 0,
            block: HttpBlock::default(),
            routes,
        }
    }

    pub fn method(&self) -> Method {
        self.block.method
    }

    pub fn path(&self) -> &str {
        &self.block.path
    }

    pub fn query(&self) -> Option<&str> {
        self.block.query.as_deref()
    }

    pub fn header_name(&self) -> &str {
        &self.block.header_name
    }

    pub fn header_value(&self) -> &str {
        &self.block.header_value
    }

    pub fn state(&self) -> SessionState {
        self.block.state
    }

    pub fn state_count(&self) -> usize {
        self.block.state_count
    }

    pub fn version(&self) -> HttpVersion {
        self.block.version
    }

    // -- socket event wiring, called by the worker each tick --

    pub fn on_connect(&mut self) {
        let _ = self.sock.set_block(false);
        self.sock.flags.insert(SockFlags::CONNECTED);
    }

    pub fn on_close(&mut self) {
        self.finalize();
        self.sock.close();
    }

    pub fn want_read(&self) -> bool {
        self.block.state.phase() == SessionState::RequestBegin.phase()
    }

    pub fn want_write(&self) -> bool {
        self.block.state.phase() == SessionState::ResponseBegin.phase()
    }

    pub fn do_read(&mut self) {
        loop {
            let start = self.bufpos + self.buflen;
            if start >= SESSION_BUFSIZE {
                break;
            }
            let n = match self.sock.recv(&mut self.buf[start..]) {
                Ok(0) => {
                    self.sock.mark_pend_close();
                    return;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(_) => return,
            };
            self.buflen += n;

            while self.buflen > 0 {
                let stop = match self.block.state.ingress_step() {
                    0 => self.request_begin(),
                    1 => self.request_header(),
                    2 => self.request_body(),
                    _ => true,
                };
                if stop {
                    if self.sock.is_pend_close() {
                        return;
                    }
                    break;
                }
            }

            if self.buflen == SESSION_BUFSIZE {
                self.sock.mark_pend_close();
                return;
            }
            if self.bufpos > 0 {
                self.buf.copy_within(self.bufpos..self.bufpos + self.buflen, 0);
                self.bufpos = 0;
            }
            if self.sock.transport.avail(self.sock.fd) == 0 {
                break;
            }
        }
    }

    pub fn do_write(&mut self) {
        match self.block.state.ingress_step() {
            0 => self.response_begin(),
            1 => self.response_header(),
            2 => self.response_body(),
            _ => {}
        }
    }

    // -- ingress parsing --

    fn request_begin(&mut self) -> bool {
        let window = &self.buf[self.bufpos..self.bufpos + self.buflen];
        let line_len = match fnmatch::find(window, "\r\n") {
            Some(len) => len,
            None => {
                if self.bufpos == 0 && self.buflen >= SESSION_BUFSIZE - 1 {
                    self.error(414, "URI Too Long");
                    self.sock.mark_pend_close();
                }
                return true;
            }
        };

        let line = self.buf[self.bufpos..self.bufpos + line_len].to_vec();
        self.bufpos += line_len + 2;
        self.buflen -= line_len + 2;

        let text = String::from_utf8_lossy(&line).into_owned();
        let mut parts = text.split_ascii_whitespace();

        let method_str = match parts.next() {
            Some(m) => m.to_ascii_uppercase(),
            None => {
                self.error(400, "Bad Request");
                self.sock.mark_pend_close();
                return true;
            }
        };
        let raw_target = match parts.next() {
            Some(t) => t,
            None => {
                self.error(400, "Bad Request");
                self.sock.mark_pend_close();
                return true;
            }
        };
        let version_str = parts.next().map(|v| v.to_ascii_uppercase());

        self.block.method = Method::parse(&method_str);

        let mut target_buf = raw_target.as_bytes().to_vec();
        let normalized = path::normalize(&mut target_buf);
        self.block.path = String::from_utf8_lossy(&target_buf[..normalized.path_len]).into_owned();
        self.block.query = normalized
            .query
            .map(|(a, b)| String::from_utf8_lossy(&target_buf[a..b]).into_owned());

        match version_str.as_deref() {
            None => self.block.version = HttpVersion::Http09,
            Some("HTTP/1.1") => {
                self.block.version = HttpVersion::Http11;
                self.block.flags.insert(HttpFlags::KEEPALIVE);
            }
            Some("HTTP/1.0") => self.block.version = HttpVersion::Http10,
            Some(_) => {
                // Respond over HTTP/1.0 rather than leaving `version` at
                // its `Http09` default, which would make `error()` treat
                // this as a response-less 0.9 exchange and send nothing
                // back at all.
                self.block.version = HttpVersion::Http10;
                self.error(505, "HTTP Version Not Supported");
                self.sock.mark_pend_close();
                return true;
            }
        }

        log::trace!("#{} {} {}", self.sock.fd, method_str, self.block.path);

        let patterns: Vec<(usize, &'static str)> = {
            let routes = self.routes.lock().unwrap();
            routes.patterns().collect()
        };

        for (idx, pattern) in patterns {
            if !fnmatch::fnmatch(pattern, &self.block.path) {
                continue;
            }
            self.block.route_idx = Some(idx);
            match self.call_handler() {
                RouteStatus::Found => break,
                RouteStatus::NotFound => continue,
                _ => return true,
            }
        }

        if self.block.version == HttpVersion::Http09 {
            self.block.state = SessionState::ResponseBegin;
        } else {
            self.block.state = SessionState::RequestHeader;
        }
        false
    }

    fn request_header(&mut self) -> bool {
        let window = &self.buf[self.bufpos..self.bufpos + self.buflen];
        let line_len = match fnmatch::find(window, "\r\n") {
            Some(len) => len,
            None => {
                if self.bufpos == 0 && self.buflen >= SESSION_BUFSIZE - 1 {
                    self.error(431, "Request Header Fields Too Large");
                    self.sock.mark_pend_close();
                }
                return true;
            }
        };

        let line = self.buf[self.bufpos..self.bufpos + line_len].to_vec();
        self.bufpos += line_len + 2;
        self.buflen -= line_len + 2;

        if line.is_empty() {
            self.block.state = SessionState::ResponseBegin;
            return false;
        }

        let sep = match fnmatch::find(&line, ": ") {
            Some(s) if s >= 1 => s,
            _ => {
                self.error(400, "Invalid Header");
                self.sock.mark_pend_close();
                return true;
            }
        };
        let name = String::from_utf8_lossy(&line[..sep]).into_owned();
        let value = String::from_utf8_lossy(&line[sep + 2..])
            .trim()
            .to_string();

        if name.eq_ignore_ascii_case("content-length") {
            self.block.request_content_length = value.parse::<u64>().ok();
            self.block.request_remaining = self.block.request_content_length.unwrap_or(0);
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            self.block.flags.insert(HttpFlags::REQUEST_CHUNKED);
        } else if name.eq_ignore_ascii_case("connection") {
            if value.to_ascii_lowercase().contains("close") {
                self.block.flags.remove(HttpFlags::KEEPALIVE);
            } else if value.to_ascii_lowercase().contains("keep-alive") {
                self.block.flags.insert(HttpFlags::KEEPALIVE);
            }
        }

        self.block.header_name = name;
        self.block.header_value = value;
        self.call_handler();
        false
    }

    fn request_body(&mut self) -> bool {
        self.call_handler();
        true
    }

    fn response_begin(&mut self) {
        self.call_handler();
    }

    fn response_header(&mut self) {
        self.call_handler();
    }

    fn response_body(&mut self) {
        self.call_handler();
    }

    /// Copy up to `buf.len()` bytes of request body already sitting in
    /// the connection buffer. Only legal during `REQUEST_BODY`.
    pub fn recv(&mut self, buf: &mut [u8]) -> usize {
        if self.block.state != SessionState::RequestBody {
            return 0;
        }
        let n = self.buflen.min(buf.len());
        buf[..n].copy_from_slice(&self.buf[self.bufpos..self.bufpos + n]);
        self.bufpos += n;
        self.buflen -= n;
        self.block.request_remaining = self.block.request_remaining.saturating_sub(n as u64);
        n
    }

    /// Skip up to `len` bytes of request body without copying them out.
    pub fn discard(&mut self, len: usize) -> usize {
        if self.block.state != SessionState::RequestBody {
            return 0;
        }
        let n = self.buflen.min(len);
        self.bufpos += n;
        self.buflen -= n;
        self.block.request_remaining = self.block.request_remaining.saturating_sub(n as u64);
        n
    }

    // -- dispatch to the matched route, with the transition legality
    // rules from the original's call_handler --

    fn call_handler(&mut self) -> RouteStatus {
        if self.block.state != self.block.prev_state {
            self.block.state_count = 0;
        } else {
            self.block.state_count += 1;
        }

        let idx = match self.block.route_idx {
            Some(idx) => idx,
            None => return RouteStatus::Error,
        };
        let state = self.block.state;
        let routes = Arc::clone(&self.routes);
        let status = {
            let guard = routes.lock().unwrap();
            let route = guard.get(idx);
            route.handler.call(self, state)
        };
        self.block.prev_state = state;

        match status {
            RouteStatus::Error => {
                self.sock.mark_pend_close();
                if (self.block.state as u8) > (SessionState::RequestBegin as u8) {
                    self.error(500, "Internal Server Error");
                    return RouteStatus::Error;
                }
                status
            }
            RouteStatus::Close => {
                self.sock.mark_pend_close();
                if (self.block.state as u8) > (SessionState::RequestBegin as u8) {
                    self.finalize();
                    return RouteStatus::Close;
                }
                status
            }
            RouteStatus::NotFound | RouteStatus::Found => {
                if self.block.state != SessionState::RequestBegin {
                    log::trace!("NOT_FOUND/FOUND status outside request-begin");
                    self.error(500, "Internal Server Error");
                    return RouteStatus::Error;
                }
                status
            }
            RouteStatus::Next => {
                match self.block.state {
                    SessionState::ResponseBegin => self.block.state = SessionState::ResponseHeader,
                    SessionState::ResponseHeader => {
                        let _ = self.raw_send(b"\r\n");
                        self.block.state = SessionState::ResponseBody;
                    }
                    SessionState::ResponseBody => self.block.state = SessionState::Finalize,
                    _ => {}
                }
                status
            }
            RouteStatus::Done => {
                self.finalize();
                status
            }
            RouteStatus::More => match self.block.state {
                SessionState::ResponseHeader | SessionState::ResponseBody => status,
                _ => {
                    log::trace!("MORE status outside response header/body");
                    self.sock.mark_pend_close();
                    if (self.block.state as u8) > (SessionState::RequestBegin as u8) {
                        self.error(500, "Internal Server Error");
                        return RouteStatus::Error;
                    }
                    status
                }
            },
        }
    }

    fn finalize(&mut self) {
        if self.block.state == SessionState::RequestBegin {
            return;
        }
        if let Some(idx) = self.block.route_idx {
            self.block.state = SessionState::Finalize;
            self.block.state_count = 0;
            let routes = Arc::clone(&self.routes);
            let guard = routes.lock().unwrap();
            let route = guard.get(idx);
            let _ = route.handler.call(self, SessionState::Finalize);
        }
        if !self.block.flags.contains(HttpFlags::KEEPALIVE) {
            self.sock.shutdown();
        }
        self.block = HttpBlock::default();
    }

    // -- session ops the handler contract is built on --

    pub fn raw_send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.sock.send(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.finalize();
                Err(e)
            }
        }
    }

    fn raw_sendf(&mut self, args: fmt::Arguments) -> io::Result<usize> {
        self.raw_send(std::fmt::format(args).as_bytes())
    }

    pub fn status(&mut self, code: u16, msg: &str) {
        if self.block.version == HttpVersion::Http09 {
            return;
        }
        if (self.block.state as u8) > (SessionState::ResponseBegin as u8) {
            log::debug!("#{} status sent twice", self.sock.fd);
            self.sock.mark_pend_close();
            self.finalize();
            return;
        }
        let version = match self.block.version {
            HttpVersion::Http11 => "HTTP/1.1",
            _ => "HTTP/1.0",
        };
        let _ = self.raw_sendf(format_args!("{version} {code} {msg}\r\n"));
        self.block.state = SessionState::ResponseHeader;
    }

    pub fn error(&mut self, code: u16, msg: &str) {
        if (self.block.state as u8) <= (SessionState::ResponseBegin as u8)
            && self.block.version != HttpVersion::Http09
        {
            let body = format!("<h1>{msg}</h1>");
            self.status(code, msg);
            let _ = self.raw_sendf(format_args!(
                "Content-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            ));
            let _ = self.raw_send(body.as_bytes());
        }
        self.block.flags.remove(HttpFlags::KEEPALIVE);
        self.finalize();
    }

    pub fn header(&mut self, name: &str, value: &str) {
        if self.block.state != SessionState::ResponseHeader {
            log::debug!("#{} header sent outside response-header", self.sock.fd);
            self.error(500, "Internal Server Error");
            return;
        }
        if name.eq_ignore_ascii_case("connection") {
            if value.to_ascii_lowercase().contains("close") {
                self.block.flags.remove(HttpFlags::KEEPALIVE);
            } else if value.to_ascii_lowercase().contains("keep-alive") {
                self.block.flags.insert(HttpFlags::KEEPALIVE);
            }
        } else if name.eq_ignore_ascii_case("content-length") {
            self.block.response_length = value.trim().parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            self.block.flags.insert(HttpFlags::RESPONSE_CHUNKED);
        }
        let _ = self.raw_sendf(format_args!("{name}: {value}\r\n"));
    }

    pub fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.block.state != SessionState::ResponseBody {
            log::debug!("#{} body sent outside response-body", self.sock.fd);
            self.error(500, "Internal Server Error");
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }

        let mut payload = buf;
        let mut total = 0usize;

        if self.block.flags.contains(HttpFlags::RESPONSE_CHUNKED) {
            let header = format!("{:X}\r\n", payload.len());
            total += self.raw_send(header.as_bytes())?;
        } else if let Some(remaining) = self.block.response_length {
            payload = &payload[..payload.len().min(remaining as usize)];
        }

        let n = match self.sock.send(payload) {
            Ok(n) => n,
            Err(e) => {
                self.finalize();
                return Err(e);
            }
        };
        total += n;

        if self.block.flags.contains(HttpFlags::RESPONSE_CHUNKED) {
            total += self.raw_send(b"\r\n")?;
        } else if let Some(remaining) = self.block.response_length {
            self.block.response_length = Some(remaining.saturating_sub(n as u64));
        }

        Ok(total)
    }

    pub fn sendf(&mut self, args: fmt::Arguments) -> io::Result<usize> {
        self.send(std::fmt::format(args).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteList;
    use crate::socket::Socket;

    fn new_session() -> Session {
        Session::new(Socket::free(), Arc::new(Mutex::new(RouteList::new())))
    }

    #[test]
    fn fresh_session_starts_at_request_begin() {
        let sess = new_session();
        assert_eq!(sess.state(), SessionState::RequestBegin);
        assert!(sess.want_read());
        assert!(!sess.want_write());
    }

    #[test]
    fn want_write_only_in_response_phase() {
        let mut sess = new_session();
        sess.block.state = SessionState::ResponseHeader;
        assert!(!sess.want_read());
        assert!(sess.want_write());
    }

    #[test]
    fn finalize_on_fresh_session_is_a_noop() {
        let mut sess = new_session();
        sess.finalize();
        assert_eq!(sess.state(), SessionState::RequestBegin);
    }

    #[test]
    fn method_parses_known_verbs() {
        assert_eq!(Method::parse("GET"), Method::Get);
        assert_eq!(Method::parse("PUT"), Method::Put);
        assert_eq!(Method::parse("WOMBAT"), Method::Other);
    }
}
