//! Top-level server object: owns the configuration, the client slot
//! table, the route list, and the worker thread. Mirrors
//! `original_source/src/server.c`'s `ews_init`/`ews_destroy`, minus the
//! TLS/HTTPS listener (out of scope) and the per-protocol worker split
//! (this core runs a single worker over a single HTTP listener).

use crate::config::Config;
use crate::error::EwsResult;
use crate::http::Session;
use crate::listener::Listener;
use crate::route::{RouteHandler, RouteList};
use crate::worker::Worker;
use std::sync::{Arc, Mutex};

pub struct Server {
    config: Config,
    clients: Arc<Mutex<Vec<Session>>>,
    routes: Arc<Mutex<RouteList>>,
    worker: Option<Worker>,
    bound_port: Option<u16>,
}

impl Server {
    /// Bind the HTTP listener and allocate the client slot table, but
    /// don't start the worker yet — routes can still be registered
    /// with [`Server::route_append`] before [`Server::start`].
    pub fn init(config: Config) -> EwsResult<Self> {
        let config = config.normalized();
        let routes = Arc::new(Mutex::new(RouteList::new()));
        let clients = Arc::new(Mutex::new(
            (0..config.max_http_clients)
                .map(|_| Session::new(crate::socket::Socket::free(), Arc::clone(&routes)))
                .collect(),
        ));

        Ok(Self {
            config,
            clients,
            routes,
            worker: None,
            bound_port: None,
        })
    }

    /// The port actually bound once [`Server::start`] has run — useful
    /// when `Config::http_listen_port` was `0` and the OS picked one.
    pub fn local_port(&self) -> Option<u16> {
        self.bound_port
    }

    pub fn route_append(&self, pattern: &'static str, handler: impl RouteHandler + 'static) {
        self.routes.lock().unwrap().append(pattern, handler);
    }

    pub fn route_clear(&self) {
        self.routes.lock().unwrap().clear();
    }

    /// Bind the listener and start the worker thread. Installs a
    /// `ctrlc` handler that requests a clean shutdown on SIGINT/SIGTERM,
    /// the way the teacher's multi-worker server did.
    pub fn start(&mut self) -> EwsResult<()> {
        let listener = Listener::bind(
            self.config.http_listen_port,
            self.config.http_listen_backlog,
        )?;
        self.bound_port = Some(listener.port);

        self.worker = Some(Worker::spawn(
            self.config.clone(),
            listener,
            Arc::clone(&self.clients),
            Arc::clone(&self.routes),
        ));

        Ok(())
    }

    /// Install a `ctrlc` handler that stops the worker on SIGINT/SIGTERM.
    /// Kept as a separate step from [`Server::start`] so embedders that
    /// already own signal handling can opt out.
    pub fn install_signal_shutdown(server: Arc<Mutex<Server>>) -> EwsResult<()> {
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            server.lock().unwrap().destroy();
        })
        .map_err(|e| crate::error::EwsError::Config(e.to_string()))
    }

    /// Stop the worker and close every client/listener fd, mirroring
    /// `ews_destroy`.
    pub fn destroy(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        let mut guard = self.clients.lock().unwrap();
        for sess in guard.iter_mut() {
            if sess.sock.is_in_use() {
                sess.sock.close();
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.destroy();
    }
}
