use std::io;

/// Central error type for the web server engine.
#[derive(Debug, thiserror::Error)]
pub enum EwsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind listener on port {port}: {source}")]
    Bind { port: u16, #[source] source: io::Error },

    #[error("failed to listen with backlog {backlog}: {source}")]
    Listen { backlog: i32, #[source] source: io::Error },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("worker thread panicked")]
    WorkerPanic,
}

pub type EwsResult<T> = Result<T, EwsError>;
