//! Bidirectional message channel between two peers.
//!
//! The channel itself (connection setup, NAT traversal, the actual data
//! path) lives outside this crate. All the protocol core needs is a way to
//! push frames out, close, ask whether the channel is open, and a queue of
//! events coming back.

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::ProtocolError;

/// Something that happened on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel finished its handshake and can carry data.
    Open,
    /// A frame arrived from the remote peer.
    Data(Vec<u8>),
    /// The channel closed, from either side.
    Close,
    /// The channel failed.
    Error(String),
}

/// Outgoing half of a channel.
///
/// Delivery and ordering are whatever the implementation gives; callers
/// must not assume either.
pub trait Channel: Send + Sync + 'static {
    /// Channel-level id of the remote peer.
    fn peer(&self) -> &str;

    /// Whether the channel can currently carry data.
    fn is_open(&self) -> bool;

    /// Hand a frame to the channel. Never blocks and never fails loudly.
    fn send(&self, frame: Vec<u8>);

    /// Close the channel. Both ends observe [`ChannelEvent::Close`].
    fn close(&self);
}

/// A channel together with its event queue.
///
/// Whoever holds the receiver is the channel's only listener; dropping it
/// detaches every listener at once.
pub struct ChannelHandle {
    channel: Box<dyn Channel>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ChannelHandle {
    pub fn new(channel: Box<dyn Channel>, events: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self { channel, events }
    }

    pub fn channel(&self) -> &dyn Channel {
        self.channel.as_ref()
    }

    pub fn peer(&self) -> &str {
        self.channel.peer()
    }

    /// Split into the outgoing half and the event queue.
    pub fn into_parts(self) -> (Box<dyn Channel>, mpsc::UnboundedReceiver<ChannelEvent>) {
        (self.channel, self.events)
    }

    /// Wait until the channel reports [`ChannelEvent::Open`].
    ///
    /// An error, a close, or the event queue ending before that is a failed
    /// open.
    pub async fn wait_open(&mut self) -> Result<(), ProtocolError> {
        loop {
            match self.events.recv().await {
                Some(ChannelEvent::Open) => {
                    debug!(peer = %self.channel.peer(), "channel open");
                    return Ok(());
                }
                Some(ChannelEvent::Data(frame)) => {
                    trace!(len = frame.len(), "dropping frame received before open");
                }
                Some(ChannelEvent::Error(reason)) => {
                    return Err(ProtocolError::Connection(reason));
                }
                Some(ChannelEvent::Close) | None => return Err(ProtocolError::ChannelClosed),
            }
        }
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("peer", &self.channel.peer())
            .field("open", &self.channel.is_open())
            .finish_non_exhaustive()
    }
}
