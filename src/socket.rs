//! Socket abstraction: a bitflag-tagged slot plus a pluggable transport
//! vtable (`Transport`) the worker drives each tick via the owning
//! listener's or session's own want_read/want_write/do_read/do_write.
//! Plaintext TCP is implemented here; TLS is an opaque extension point
//! behind `Transport` and is out of scope for this core.

use bitflags::bitflags;
use libc::c_int;
use std::io;
use std::mem::MaybeUninit;
use std::net::SocketAddr;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SockFlags: u32 {
        const TYPE_LISTEN    = 0;
        const TYPE_CLIENT    = 1 << 0;

        const PROTO_HTTP     = 0;
        const PROTO_RESERVED = 1 << 1;

        const IN_USE         = 1 << 8;
        const TLS            = 1 << 9;
        const CONNECTED      = 1 << 10;
        const SHUTDOWN       = 1 << 11;
        const PEND_CLOSE     = 1 << 12;
    }
}

/// send/recv/avail/set_block/shutdown/close over a raw fd. A plaintext
/// and an (opaque, unimplemented) TLS provider can both satisfy this.
pub trait Transport: Send {
    fn send(&self, fd: c_int, buf: &[u8]) -> io::Result<usize>;
    fn recv(&self, fd: c_int, buf: &mut [u8]) -> io::Result<usize>;
    fn avail(&self, fd: c_int) -> usize;
    fn set_block(&self, fd: c_int, block: bool) -> io::Result<()>;
    fn shutdown(&self, fd: c_int) -> io::Result<()>;
}

/// Plaintext TCP transport. Treats `WouldBlock` as the sole transient,
/// non-fatal failure — anything else (including a connection reset)
/// is a real error the caller should act on. This is the equality-check
/// reading of `original_source/src/socket.c`'s `errno == ECONNRESET`
/// branch (that file has it as an assignment, `errno = ECONNRESET`,
/// which makes the `EAGAIN` branch unreachable; the intended semantics
/// are implemented here via `ErrorKind`, not the typo).
pub struct PlaintextTransport;

impl Transport for PlaintextTransport {
    fn send(&self, fd: c_int, buf: &[u8]) -> io::Result<usize> {
        unsafe {
            let ret = libc::send(fd, buf.as_ptr() as *const _, buf.len(), 0);
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Err(err);
                }
                if err.raw_os_error() == Some(libc::ECONNRESET) {
                    log::info!("#{fd} connection reset by peer");
                }
                return Err(err);
            }
            Ok(ret as usize)
        }
    }

    fn recv(&self, fd: c_int, buf: &mut [u8]) -> io::Result<usize> {
        unsafe {
            let ret = libc::recv(fd, buf.as_mut_ptr() as *mut _, buf.len(), 0);
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Err(err);
                }
                if err.raw_os_error() == Some(libc::ECONNRESET) {
                    log::info!("#{fd} connection reset by peer");
                }
                return Err(err);
            }
            Ok(ret as usize)
        }
    }

    fn avail(&self, _fd: c_int) -> usize {
        0
    }

    fn set_block(&self, fd: c_int, block: bool) -> io::Result<()> {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            let flags = if block {
                flags & !libc::O_NONBLOCK
            } else {
                flags | libc::O_NONBLOCK
            };
            if libc::fcntl(fd, libc::F_SETFL, flags) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    fn shutdown(&self, fd: c_int) -> io::Result<()> {
        log::debug!("#{fd} shutdown");
        unsafe {
            if libc::shutdown(fd, libc::SHUT_WR) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

/// A client or listener socket slot. `fd < 0` marks a free slot; the
/// worker adds it to the `select` read/write sets based on the owner's
/// (listener's or session's) own want_read/want_write, and dispatches
/// do_read/do_write on it directly — there's exactly one session shape
/// in this core, so a vtable over "the event owner" would be
/// indirection with nothing to dispatch between.
pub struct Socket {
    pub fd: c_int,
    pub addr: Option<SocketAddr>,
    pub flags: SockFlags,
    pub last_active: u32,
    pub idle_timeout: u32,
    pub transport: PlaintextTransport,
}

impl Socket {
    pub fn free() -> Self {
        Self {
            fd: -1,
            addr: None,
            flags: SockFlags::empty(),
            last_active: 0,
            idle_timeout: 0,
            transport: PlaintextTransport,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.flags.contains(SockFlags::IN_USE)
    }

    pub fn is_connected(&self) -> bool {
        self.flags.contains(SockFlags::CONNECTED)
    }

    pub fn is_pend_close(&self) -> bool {
        self.flags.contains(SockFlags::PEND_CLOSE)
    }

    pub fn mark_pend_close(&mut self) {
        self.flags.insert(SockFlags::PEND_CLOSE);
    }

    /// Close the underlying fd and reset the slot back to free, mirroring
    /// `original_source/src/socket.c`'s `ews_sock_close` (`close` + zero
    /// the struct).
    pub fn close(&mut self) {
        if self.fd >= 0 {
            log::info!("#{} close", self.fd);
        }
        // Dropping the old value closes the fd exactly once; `Socket`'s
        // `Drop` impl is what actually calls `libc::close`.
        *self = Socket::free();
    }

    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        if self.flags.contains(SockFlags::SHUTDOWN) {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        self.transport.send(self.fd, buf)
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.transport.recv(self.fd, buf)
    }

    pub fn set_block(&self, block: bool) -> io::Result<()> {
        self.transport.set_block(self.fd, block)
    }

    pub fn shutdown(&mut self) {
        if self.transport.shutdown(self.fd).is_ok() {
            self.flags.insert(SockFlags::SHUTDOWN);
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

/// Set `fd` non-blocking and claim a fresh client slot's accounting
/// fields. Split out of `listener.rs` since both HTTP(S) listeners call
/// it identically.
pub fn accept_into(listen_fd: c_int) -> io::Result<Option<(c_int, SocketAddr)>> {
    unsafe {
        let mut storage = MaybeUninit::<libc::sockaddr_storage>::zeroed();
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let fd = libc::accept(
            listen_fd,
            storage.as_mut_ptr() as *mut libc::sockaddr,
            &mut len,
        );
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err);
        }
        let addr = sockaddr_to_std(&storage.assume_init());
        Ok(Some((fd, addr)))
    }
}

unsafe fn sockaddr_to_std(storage: &libc::sockaddr_storage) -> SocketAddr {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let sin = &*(storage as *const _ as *const libc::sockaddr_in);
            let ip = std::net::Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            SocketAddr::new(ip.into(), u16::from_be(sin.sin_port))
        }
        _ => {
            let sin6 = &*(storage as *const _ as *const libc::sockaddr_in6);
            let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            SocketAddr::new(ip.into(), u16::from_be(sin6.sin6_port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_socket_flags_empty() {
        let sock = Socket::free();
        assert!(!sock.is_in_use());
        assert!(!sock.is_connected());
        assert_eq!(sock.fd, -1);
    }

    #[test]
    fn pend_close_is_sticky_until_reset() {
        let mut sock = Socket::free();
        sock.flags.insert(SockFlags::IN_USE);
        sock.mark_pend_close();
        assert!(sock.is_pend_close());
        sock.close();
        assert!(!sock.is_pend_close());
    }
}
