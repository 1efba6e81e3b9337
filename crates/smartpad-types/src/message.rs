//! Protocol message types.
//!
//! Messages are exchanged over a peer channel between a touch client and the
//! gamepad host. Every frame on the channel carries exactly one [`Message`].

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Sender-assigned message id. Unique per connection direction only.
pub type MessageId = u64;

/// Well-known message kinds.
pub mod kind {
    /// Keepalive request; answered by the protocol core, never the application.
    pub const PING: &str = "ping";
    /// Keepalive answer carrying the id of the ping it answers.
    pub const PONG: &str = "pong";
    /// A single button changed state.
    pub const BUTTON_UPDATE: &str = "buttonUpdate";
    /// A thumbstick moved; always reports an x/y pair.
    pub const AXIS_UPDATE: &str = "axisUpdate";
}

/// Top-level message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Message {
    /// Assigned by the sending connection at send time.
    pub id: MessageId,
    /// Message type. An empty string means "no type".
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Payload,
    /// Requested delivery class. See the connection docs for what this buys.
    pub reliable: bool,
}

impl Message {
    /// Create an unsent message. The id is overwritten when it is sent.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Payload) -> Self {
        Self {
            id: 0,
            kind: kind.into(),
            data,
            reliable: false,
        }
    }

    /// Mark the message as reliable.
    #[must_use]
    pub fn reliable(mut self) -> Self {
        self.reliable = true;
        self
    }

    /// Whether the message carries a type at all.
    #[must_use]
    pub fn has_kind(&self) -> bool {
        !self.kind.is_empty()
    }

    #[must_use]
    pub fn button_update(index: u32, pressed: bool) -> Self {
        Self::new(
            kind::BUTTON_UPDATE,
            Payload::Button(ButtonUpdate { index, pressed }),
        )
    }

    #[must_use]
    pub fn axis_update(index: u32, x: f64, y: f64) -> Self {
        Self::new(kind::AXIS_UPDATE, Payload::Axis(AxisUpdate { index, x, y }))
    }
}

/// Message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum Payload {
    /// No payload (pings, bare notifications).
    None,
    /// Echoed id of the ping being answered.
    Pong { id: MessageId },
    Button(ButtonUpdate),
    Axis(AxisUpdate),
    /// Application-defined bytes for kinds this crate does not know about.
    Bytes(Vec<u8>),
}

/// Payload of a `buttonUpdate` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ButtonUpdate {
    /// Button index in the standard mapping, or beyond it for custom layouts.
    pub index: u32,
    pub pressed: bool,
}

/// Payload of an `axisUpdate` message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct AxisUpdate {
    /// Logical stick index; axes `2 * index` and `2 * index + 1` are affected.
    pub index: u32,
    pub x: f64,
    pub y: f64,
}
