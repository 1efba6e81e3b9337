//! Host side of smartpad.
//!
//! Claims a connection code, hosts one connection per phone, mirrors each
//! into a virtual gamepad and merges those with the native devices into a
//! single polled view.

pub mod config;
pub mod error;
pub mod gamepad;
pub mod hosted;
pub mod multiplexer;
pub mod server;
pub mod service;
pub mod setup;
pub mod state;

pub use config::Config;
pub use error::{HostError, ServerError};
pub use gamepad::{Gamepad, GamepadEvent, NativeGamepads, NoNativeGamepads, VirtualGamepad};
pub use hosted::{HostedConnection, HostedEvent};
pub use multiplexer::{Multiplexer, SharedGamepad};
pub use server::{GamepadServer, ServerEvent, ServerSettings, DEFAULT_MAX_RETRIES};
pub use service::GamepadService;
pub use state::ServerState;
