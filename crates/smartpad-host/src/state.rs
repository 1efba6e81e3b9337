//! Server state machine.

/// Lifecycle state of a gamepad server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    /// Not started, or stopped.
    #[default]
    Idle,
    /// Claiming a connection code.
    Starting,
    /// Code claimed, accepting clients.
    Listening,
    /// The last start ran out of retries.
    Failed,
}

impl ServerState {
    /// Whether `start` may be called.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }

    pub fn is_listening(self) -> bool {
        self == Self::Listening
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Listening => write!(f, "Listening"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
