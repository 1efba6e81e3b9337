//! Shared types for smartpad.
//!
//! This crate contains the types shared across the smartpad workspace:
//! the message envelope and its payloads, the gamepad shape, and connection
//! codes and client identity.

pub mod code;
pub mod gamepad;
pub mod message;

pub use code::{
    ClientId, CodeError, CodeGenerator, ConnectionCode, ADDRESS_PREFIX, DEFAULT_ALPHABET,
    DEFAULT_CODE_LENGTH,
};
pub use gamepad::{
    axis_slots, GamepadButton, Pad, StandardButton, AXIS_COUNT, BUTTON_COUNT, MAPPING_STANDARD,
};
pub use message::{kind, AxisUpdate, ButtonUpdate, Message, MessageId, Payload};
