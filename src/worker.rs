//! The single-worker event loop: `select(2)` over the listener plus
//! every in-use client slot, a 100ms timeout cap so idle connections get
//! reaped promptly, and plain `thread::JoinHandle` lifecycle instead of
//! the original's one-shot POSIX timer / `task_reaper` dance. Mirrors
//! `original_source/src/worker.c`'s `pre_select`/`post_select`/
//! `worker_loop`/`worker_task` control flow.

use crate::config::Config;
use crate::http::Session;
use crate::listener::Listener;
use crate::route::RouteList;
use crate::time;
use libc::{c_int, fd_set};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

const SELECT_TIMEOUT_MS: i64 = 100;

struct FdSet(fd_set);

impl FdSet {
    fn empty() -> Self {
        unsafe {
            let mut raw = MaybeUninit::<fd_set>::zeroed();
            libc::FD_ZERO(raw.as_mut_ptr());
            Self(raw.assume_init())
        }
    }

    fn set(&mut self, fd: c_int) {
        unsafe { libc::FD_SET(fd, &mut self.0) }
    }

    fn is_set(&self, fd: c_int) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }
}

pub struct Worker {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn spawn(
        config: Config,
        listener: Listener,
        clients: Arc<Mutex<Vec<Session>>>,
        routes: Arc<Mutex<RouteList>>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = Arc::clone(&shutdown);

        let handle = std::thread::Builder::new()
            .name("ews-worker".into())
            .spawn(move || worker_loop(config, listener, clients, routes, worker_shutdown))
            .expect("failed to spawn worker thread");

        Self {
            handle: Some(handle),
            shutdown,
        }
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    config: Config,
    mut listener: Listener,
    clients: Arc<Mutex<Vec<Session>>>,
    routes: Arc<Mutex<RouteList>>,
    shutdown: Arc<AtomicBool>,
) {
    log::info!("worker started");
    while !shutdown.load(Ordering::Relaxed) {
        let mut read_set = FdSet::empty();
        let mut write_set = FdSet::empty();
        let mut max_fd = -1;

        if listener.want_read() {
            read_set.set(listener.sock.fd);
            max_fd = max_fd.max(listener.sock.fd);
        }

        {
            let guard = clients.lock().unwrap();
            for sess in guard.iter() {
                if !sess.sock.is_in_use() {
                    continue;
                }
                if sess.want_read() {
                    read_set.set(sess.sock.fd);
                    max_fd = max_fd.max(sess.sock.fd);
                }
                if sess.want_write() {
                    write_set.set(sess.sock.fd);
                    max_fd = max_fd.max(sess.sock.fd);
                }
            }
        }

        let mut timeout = libc::timeval {
            tv_sec: 0,
            tv_usec: (SELECT_TIMEOUT_MS * 1000) as libc::suseconds_t,
        };

        let ready = unsafe {
            libc::select(
                max_fd + 1,
                &mut read_set.0,
                &mut write_set.0,
                std::ptr::null_mut(),
                &mut timeout,
            )
        };

        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("select failed: {err}");
            continue;
        }

        if ready > 0 && read_set.is_set(listener.sock.fd) {
            listener.do_read(&clients, &routes, config.idle_timeout);
        }

        let now = time::ms();
        let mut guard = clients.lock().unwrap();
        for sess in guard.iter_mut() {
            if !sess.sock.is_in_use() {
                continue;
            }

            if ready > 0 && read_set.is_set(sess.sock.fd) {
                sess.do_read();
            }
            if ready > 0 && write_set.is_set(sess.sock.fd) {
                sess.do_write();
            }

            if sess.sock.idle_timeout > 0
                && now.wrapping_sub(sess.sock.last_active) > sess.sock.idle_timeout
            {
                log::debug!("#{} idle timeout", sess.sock.fd);
                sess.sock.mark_pend_close();
            } else if ready > 0 && (read_set.is_set(sess.sock.fd) || write_set.is_set(sess.sock.fd))
            {
                sess.sock.last_active = now;
            }

            if sess.sock.is_pend_close() {
                sess.on_close();
            }
        }
    }
    log::info!("worker stopped");
}
