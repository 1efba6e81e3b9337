//! Address claiming and connection setup.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::ChannelHandle;
use crate::error::ProtocolError;

/// The rendezvous layer that maps addresses to peers.
///
/// A server claims an address and receives inbound channels on it; a client
/// connects to an address and gets its end of a new channel.
#[async_trait]
pub trait Signaling: Send + Sync + 'static {
    /// Claim `address`. Fails with [`ProtocolError::AddressTaken`] if
    /// somebody else holds it.
    async fn claim(&self, address: &str) -> Result<Registration, ProtocolError>;

    /// Open a channel to whoever holds `address`.
    async fn connect(&self, address: &str) -> Result<ChannelHandle, ProtocolError>;
}

/// A claimed address. Dropping it gives the address back.
#[derive(Debug)]
pub struct Registration {
    address: String,
    incoming: mpsc::UnboundedReceiver<ChannelHandle>,
}

impl Registration {
    pub fn new(address: impl Into<String>, incoming: mpsc::UnboundedReceiver<ChannelHandle>) -> Self {
        Self {
            address: address.into(),
            incoming,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Next inbound channel, in whatever state its handshake is in.
    ///
    /// Returns `None` once the signaling layer stops delivering.
    pub async fn accept(&mut self) -> Option<ChannelHandle> {
        self.incoming.recv().await
    }
}
