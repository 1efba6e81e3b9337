//! Wire format: one bincode v2 message per channel frame.
//!
//! The channel is message-oriented, so frames carry no length prefix.

use bincode::{Decode, Encode};

use crate::error::ProtocolError;

/// Maximum frame size (64 KiB). Gamepad traffic is tiny; anything larger is
/// a broken or hostile peer.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Encode a message into a single frame.
pub fn encode_frame<T: Encode>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let config = bincode::config::standard();
    let frame = bincode::encode_to_vec(msg, config)
        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;

    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(frame)
}

/// Decode a message from a single frame.
pub fn decode_frame<T: Decode<()>>(frame: &[u8]) -> Result<T, ProtocolError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let config = bincode::config::standard();
    let (msg, _) = bincode::decode_from_slice(frame, config)
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(msg)
}
