//! TCP listener setup and accept. Mirrors `original_source/src/listener.c`'s
//! `listener_init` (socket/`SO_REUSEADDR`/bind/listen) and its `do_read`
//! (mutex-guarded linear first-fit scan of the client slot array, then
//! `accept`).

use crate::error::{EwsError, EwsResult};
use crate::http::Session;
use crate::route::RouteList;
use crate::socket::{accept_into, SockFlags, Socket};
use libc::c_int;
use std::io;
use std::mem::{size_of, MaybeUninit};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

pub struct Listener {
    pub sock: Socket,
    /// The port actually bound — differs from the requested port when
    /// `0` was passed to let the OS pick an ephemeral one (used by
    /// tests driving a real loopback connection).
    pub port: u16,
}

impl Listener {
    pub fn bind(port: u16, backlog: i32) -> EwsResult<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(EwsError::Bind {
                port,
                source: io::Error::last_os_error(),
            });
        }

        unsafe {
            let opt: c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &opt as *const _ as *const _,
                size_of::<c_int>() as libc::socklen_t,
            );

            let addr = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: port.to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from(Ipv4Addr::UNSPECIFIED).to_be(),
                },
                sin_zero: [0; 8],
            };
            if libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_in>() as libc::socklen_t,
            ) < 0
            {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(EwsError::Bind { port, source: err });
            }

            if libc::listen(fd, backlog) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(EwsError::Listen {
                    backlog,
                    source: err,
                });
            }
        }

        let bound_port = unsafe {
            let mut addr = MaybeUninit::<libc::sockaddr_in>::zeroed();
            let mut len = size_of::<libc::sockaddr_in>() as libc::socklen_t;
            if libc::getsockname(fd, addr.as_mut_ptr() as *mut libc::sockaddr, &mut len) == 0 {
                u16::from_be(addr.assume_init().sin_port)
            } else {
                port
            }
        };

        let mut sock = Socket::free();
        sock.fd = fd;
        sock.flags.insert(SockFlags::TYPE_LISTEN | SockFlags::IN_USE);
        let _ = sock.set_block(false);

        log::info!("listening on 0.0.0.0:{bound_port}");
        Ok(Self {
            sock,
            port: bound_port,
        })
    }

    pub fn want_read(&self) -> bool {
        true
    }

    /// Accept as many pending connections as there are free client
    /// slots, in linear first-fit order — grounded on `listener.c`'s
    /// `do_read`, which the original guards with its single server-wide
    /// mutex while it scans the fixed client array.
    pub fn do_read(
        &mut self,
        clients: &Mutex<Vec<Session>>,
        routes: &Arc<Mutex<RouteList>>,
        idle_timeout: u32,
    ) {
        loop {
            let slot = {
                let guard = clients.lock().unwrap();
                guard.iter().position(|c| !c.sock.is_in_use())
            };
            let idx = match slot {
                Some(idx) => idx,
                None => {
                    log::debug!("no free client slots, dropping pending connection");
                    return;
                }
            };

            let (fd, addr) = match accept_into(self.sock.fd) {
                Ok(Some(pair)) => pair,
                Ok(None) => return,
                Err(e) => {
                    log::error!("accept failed: {e}");
                    return;
                }
            };

            let mut sock = Socket::free();
            sock.fd = fd;
            sock.addr = Some(addr);
            sock.flags
                .insert(SockFlags::TYPE_CLIENT | SockFlags::IN_USE);

            let mut sess = Session::new(sock, Arc::clone(routes));
            sess.sock.idle_timeout = idle_timeout;
            sess.sock.last_active = crate::time::ms();
            sess.on_connect();
            log::info!("#{fd} accepted from {addr}");

            let mut guard = clients.lock().unwrap();
            guard[idx] = sess;
        }
    }
}
