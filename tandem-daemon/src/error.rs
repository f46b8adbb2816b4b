use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, transport, and services.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] tandem_core::ConfigError),

    #[error("session store error: {0}")]
    Store(#[from] tandem_core::StoreError),

    #[error("daemon is already running (lock held: {path})")]
    AlreadyRunning { path: PathBuf },

    #[error("daemon is not running (socket unavailable: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("daemon failed to start: {0}")]
    StartFailed(String),

    #[error("daemon rejected method '{method}': {message}")]
    MethodRejected { method: String, message: String },

    #[error("stream closed")]
    StreamClosed,

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("prompting failed: {0}")]
    Prompt(String),

    #[error("unable to connect to {url}: {message}")]
    Endpoint { url: String, message: String },

    #[error("unable to create session: {0}")]
    CreateFailed(String),

    #[error("unknown session '{0}'")]
    UnknownSession(tandem_core::SessionId),

    #[error("unable to terminate session: {0}")]
    TerminateFailed(String),

    #[error("terminated by signal: {0}")]
    Signal(&'static str),

    #[error("premature server termination: {0}")]
    PrematureTermination(#[source] Box<DaemonError>),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
