//! Protocol and transport errors.

use std::time::Duration;

use smartpad_types::CodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("address {0} is already claimed")]
    AddressTaken(String),

    #[error("no peer is listening at {0}")]
    Unreachable(String),

    #[error("serialisation error: {0}")]
    Serialization(String),

    #[error("deserialisation error: {0}")]
    Deserialization(String),

    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("channel closed")]
    ChannelClosed,

    #[error("connection task is no longer running")]
    ConnectionGone,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid connection code: {0}")]
    Code(#[from] CodeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
