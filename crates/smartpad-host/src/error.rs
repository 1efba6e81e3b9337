//! Host errors.

use smartpad_protocol::ProtocolError;
use smartpad_types::CodeError;
use thiserror::Error;

/// Errors of [`GamepadServer`](crate::server::GamepadServer).
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called while starting or listening.
    #[error("server can not start twice, call stop() first")]
    AlreadyStarted,

    /// Every claimed code was taken.
    #[error("no connection code could be claimed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: ProtocolError,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid connection code: {0}")]
    Code(#[from] CodeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
