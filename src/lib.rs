// src/lib.rs
pub mod config;
pub mod error;
pub mod fnmatch;
pub mod http;
pub mod listener;
pub mod path;
pub mod route;
pub mod server;
pub mod socket;
pub mod time;
pub mod worker;

// Re-exports for embedders
pub use config::Config;
pub use error::{EwsError, EwsResult};
pub use http::{HttpVersion, Method, Session, SessionState};
pub use route::{RouteHandler, RouteList, RouteStatus};
pub use server::Server;
