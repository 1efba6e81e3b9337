//! Peer connection protocol for smartpad.
//!
//! This crate handles message framing (via bincode v2), the keepalive and
//! deadman protocol shared by both connection roles, the client role, and
//! the channel and signaling abstractions the transport plugs into. An
//! in-memory transport is included for tests and local demos.

pub mod channel;
pub mod client;
pub mod connection;
pub mod error;
pub mod keepalive;
pub mod memory;
pub mod signaling;
pub mod wire;

pub use channel::{Channel, ChannelEvent, ChannelHandle};
pub use client::{ClientConfig, ClientEvent, RemoteClient};
pub use connection::{ConnectionHandler, Link, LinkCommand, LinkControl, PeerConnection};
pub use error::ProtocolError;
pub use keepalive::{KeepAliveConfig, LinkStats, PingSamples};
pub use memory::{channel_pair, pending_pair, LocalSignaling, MemoryChannelControl, MemoryEnd};
pub use signaling::{Registration, Signaling};
