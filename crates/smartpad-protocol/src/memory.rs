//! In-process channels and signaling.
//!
//! Used by the test suites and the CLI demo in place of a real peer-to-peer
//! transport. The channel can be stalled (frames silently vanish while it
//! still reports open), which is the failure the keepalive deadman exists
//! to catch.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::channel::{Channel, ChannelEvent, ChannelHandle};
use crate::error::ProtocolError;
use crate::signaling::{Registration, Signaling};

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// State shared by both ends of one in-memory channel.
#[derive(Debug, Default)]
struct Shared {
    open: AtomicBool,
}

impl Shared {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Mark the channel closed and tell both ends, once.
    fn close(
        &self,
        local: &mpsc::UnboundedSender<ChannelEvent>,
        remote: &mpsc::UnboundedSender<ChannelEvent>,
    ) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }
        let _ = local.send(ChannelEvent::Close);
        let _ = remote.send(ChannelEvent::Close);
        true
    }
}

/// One end of an in-memory channel.
pub struct MemoryChannel {
    peer: String,
    shared: Arc<Shared>,
    stalled: Arc<AtomicBool>,
    /// Event queue of the remote end.
    remote: mpsc::UnboundedSender<ChannelEvent>,
    /// Event queue of this end.
    local: mpsc::UnboundedSender<ChannelEvent>,
}

impl Channel for MemoryChannel {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    fn send(&self, frame: Vec<u8>) {
        if !self.is_open() {
            trace!(peer = %self.peer, "frame dropped, channel closed");
            return;
        }
        if self.stalled.load(Ordering::SeqCst) {
            trace!(peer = %self.peer, "frame dropped, channel stalled");
            return;
        }
        let _ = self.remote.send(ChannelEvent::Data(frame));
    }

    fn close(&self) {
        if self.shared.close(&self.local, &self.remote) {
            debug!(peer = %self.peer, "memory channel closed");
        }
    }
}

/// Test and demo handle for poking at one end of a channel after its
/// [`ChannelHandle`] has been given away.
#[derive(Clone)]
pub struct MemoryChannelControl {
    shared: Arc<Shared>,
    stalled: Arc<AtomicBool>,
    remote: mpsc::UnboundedSender<ChannelEvent>,
    local: mpsc::UnboundedSender<ChannelEvent>,
}

impl MemoryChannelControl {
    /// Make frames sent from this end vanish (or flow again).
    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Complete the handshake of a pending channel.
    pub fn open(&self) {
        if !self.shared.open.swap(true, Ordering::SeqCst) {
            let _ = self.local.send(ChannelEvent::Open);
            let _ = self.remote.send(ChannelEvent::Open);
        }
    }

    /// Deliver an error to this end only.
    pub fn inject_error(&self, reason: impl Into<String>) {
        let _ = self.local.send(ChannelEvent::Error(reason.into()));
    }

    /// Push a raw frame into this end's event queue as if the remote sent it.
    pub fn inject_frame(&self, frame: Vec<u8>) {
        let _ = self.local.send(ChannelEvent::Data(frame));
    }

    pub fn close(&self) {
        self.shared.close(&self.local, &self.remote);
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }
}

/// One end of an in-memory channel pair.
pub struct MemoryEnd {
    pub handle: ChannelHandle,
    pub control: MemoryChannelControl,
}

/// Create a connected pair of channels that are already open.
///
/// `a` is the peer id of the first end, `b` of the second. Each end reports
/// the *other* end's id from [`Channel::peer`]. Both queues start with
/// [`ChannelEvent::Open`].
pub fn channel_pair(a: &str, b: &str) -> (MemoryEnd, MemoryEnd) {
    let (end_a, end_b) = pending_pair(a, b);
    end_a.control.open();
    (end_a, end_b)
}

/// Create a pair whose handshake has not completed yet.
///
/// Call [`MemoryChannelControl::open`] or
/// [`MemoryChannelControl::inject_error`] to finish it.
pub fn pending_pair(a: &str, b: &str) -> (MemoryEnd, MemoryEnd) {
    let shared = Arc::new(Shared::default());
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();

    let (channel_a, control_a) = make_end(b, &shared, &tx_b, &tx_a);
    let (channel_b, control_b) = make_end(a, &shared, &tx_a, &tx_b);

    (
        MemoryEnd {
            handle: ChannelHandle::new(Box::new(channel_a), rx_a),
            control: control_a,
        },
        MemoryEnd {
            handle: ChannelHandle::new(Box::new(channel_b), rx_b),
            control: control_b,
        },
    )
}

fn make_end(
    peer: &str,
    shared: &Arc<Shared>,
    remote: &mpsc::UnboundedSender<ChannelEvent>,
    local: &mpsc::UnboundedSender<ChannelEvent>,
) -> (MemoryChannel, MemoryChannelControl) {
    let stalled = Arc::new(AtomicBool::new(false));
    let channel = MemoryChannel {
        peer: peer.to_string(),
        shared: Arc::clone(shared),
        stalled: Arc::clone(&stalled),
        remote: remote.clone(),
        local: local.clone(),
    };
    let control = MemoryChannelControl {
        shared: Arc::clone(shared),
        stalled,
        remote: remote.clone(),
        local: local.clone(),
    };
    (channel, control)
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LocalState {
    listeners: HashMap<String, mpsc::UnboundedSender<ChannelHandle>>,
    reserved: HashSet<String>,
    claims: Vec<String>,
    /// Client-side controls of live channels handed out by `connect`.
    connections: Vec<MemoryChannelControl>,
}

impl LocalState {
    fn is_taken(&self, address: &str) -> bool {
        self.reserved.contains(address)
            || self
                .listeners
                .get(address)
                .is_some_and(|tx| !tx.is_closed())
    }
}

/// Address table shared by every server and client in the process.
#[derive(Clone, Default)]
pub struct LocalSignaling {
    state: Arc<Mutex<LocalState>>,
}

impl LocalSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark an address as held by somebody outside this process.
    pub fn reserve(&self, address: impl Into<String>) {
        self.lock().reserved.insert(address.into());
    }

    /// Every address a claim was attempted for, in order.
    pub fn claim_attempts(&self) -> Vec<String> {
        self.lock().claims.clone()
    }

    /// Whether a live registration holds `address`.
    pub fn is_claimed(&self, address: &str) -> bool {
        self.lock()
            .listeners
            .get(address)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Hand an arbitrary inbound channel to the listener at `address`.
    pub fn deliver(&self, address: &str, handle: ChannelHandle) -> Result<(), ProtocolError> {
        let state = self.lock();
        let tx = state
            .listeners
            .get(address)
            .ok_or_else(|| ProtocolError::Unreachable(address.to_string()))?;
        tx.send(handle)
            .map_err(|_| ProtocolError::Unreachable(address.to_string()))
    }

    /// Client-side controls of channels opened through [`Signaling::connect`]
    /// that are still open, in connection order.
    pub fn connections(&self) -> Vec<MemoryChannelControl> {
        let mut state = self.lock();
        state.connections.retain(MemoryChannelControl::is_open);
        state.connections.clone()
    }
}

#[async_trait]
impl Signaling for LocalSignaling {
    async fn claim(&self, address: &str) -> Result<Registration, ProtocolError> {
        let mut state = self.lock();
        state.claims.push(address.to_string());
        if state.is_taken(address) {
            debug!(address, "address already claimed");
            return Err(ProtocolError::AddressTaken(address.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.listeners.insert(address.to_string(), tx);
        debug!(address, "address claimed");
        Ok(Registration::new(address, rx))
    }

    async fn connect(&self, address: &str) -> Result<ChannelHandle, ProtocolError> {
        let client_peer = Uuid::new_v4().to_string();
        let (client_end, server_end) = channel_pair(&client_peer, address);

        let mut state = self.lock();
        let tx = state
            .listeners
            .get(address)
            .filter(|tx| !tx.is_closed())
            .ok_or_else(|| ProtocolError::Unreachable(address.to_string()))?;
        tx.send(server_end.handle)
            .map_err(|_| ProtocolError::Unreachable(address.to_string()))?;
        state.connections.retain(MemoryChannelControl::is_open);
        state.connections.push(client_end.control);
        debug!(address, peer = %client_peer, "connected");
        Ok(client_end.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_frames_and_reports_remote_peer() {
        let (a, b) = channel_pair("alice", "bob");
        let (chan_a, mut events_a) = a.handle.into_parts();
        let (chan_b, mut events_b) = b.handle.into_parts();

        assert_eq!(chan_a.peer(), "bob");
        assert_eq!(chan_b.peer(), "alice");
        assert_eq!(events_a.recv().await, Some(ChannelEvent::Open));
        assert_eq!(events_b.recv().await, Some(ChannelEvent::Open));

        chan_a.send(vec![1, 2, 3]);
        assert_eq!(events_b.recv().await, Some(ChannelEvent::Data(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn close_reaches_both_ends_once() {
        let (a, b) = channel_pair("a", "b");
        let (chan_a, mut events_a) = a.handle.into_parts();
        let (chan_b, mut events_b) = b.handle.into_parts();
        let _ = events_a.recv().await;
        let _ = events_b.recv().await;

        chan_a.close();
        chan_a.close();
        chan_b.close();
        assert!(!chan_b.is_open());

        assert_eq!(events_a.recv().await, Some(ChannelEvent::Close));
        assert_eq!(events_b.recv().await, Some(ChannelEvent::Close));
        assert!(events_a.try_recv().is_err());
        assert!(events_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn stalled_end_drops_frames_but_stays_open() {
        let (a, b) = channel_pair("a", "b");
        let (_, mut events_b) = b.handle.into_parts();
        let _ = events_b.recv().await;

        a.control.stall(true);
        a.handle.channel().send(vec![9]);
        assert!(a.handle.channel().is_open());
        assert!(events_b.try_recv().is_err());

        a.control.stall(false);
        a.handle.channel().send(vec![10]);
        assert_eq!(events_b.recv().await, Some(ChannelEvent::Data(vec![10])));
    }

    #[tokio::test]
    async fn pending_pair_fails_open_on_error() {
        let (a, _b) = pending_pair("a", "b");
        let mut handle = a.handle;
        a.control.inject_error("ice failed");
        let err = handle.wait_open().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Connection(reason) if reason == "ice failed"));
    }

    #[tokio::test]
    async fn claim_conflicts_and_release_on_drop() {
        let signaling = LocalSignaling::new();
        let registration = signaling.claim("ns-AAAAA").await.unwrap();
        assert!(matches!(
            signaling.claim("ns-AAAAA").await,
            Err(ProtocolError::AddressTaken(_))
        ));

        drop(registration);
        assert!(signaling.claim("ns-AAAAA").await.is_ok());
        assert_eq!(signaling.claim_attempts().len(), 3);
    }

    #[tokio::test]
    async fn reserved_address_cannot_be_claimed() {
        let signaling = LocalSignaling::new();
        signaling.reserve("ns-TAKEN");
        assert!(matches!(
            signaling.claim("ns-TAKEN").await,
            Err(ProtocolError::AddressTaken(_))
        ));
    }

    #[tokio::test]
    async fn connect_reaches_listener() {
        let signaling = LocalSignaling::new();
        let mut registration = signaling.claim("ns-HELLO").await.unwrap();

        let mut client = signaling.connect("ns-HELLO").await.unwrap();
        let mut server = registration.accept().await.unwrap();

        client.wait_open().await.unwrap();
        server.wait_open().await.unwrap();
        assert_eq!(client.peer(), "ns-HELLO");
        assert_eq!(server.peer().len(), 36);
        assert_eq!(signaling.connections().len(), 1);

        signaling.connections()[0].close();
        assert!(signaling.connections().is_empty());
    }

    #[tokio::test]
    async fn closed_connections_are_pruned() {
        let signaling = LocalSignaling::new();
        let _registration = signaling.claim("ns-PRUNE").await.unwrap();

        for _ in 0..3 {
            let client = signaling.connect("ns-PRUNE").await.unwrap();
            client.channel().close();
        }
        let _live = signaling.connect("ns-PRUNE").await.unwrap();
        assert_eq!(signaling.lock().connections.len(), 1);
    }

    #[tokio::test]
    async fn control_and_channel_close_only_once() {
        let (a, b) = channel_pair("a", "b");
        let (chan_a, mut events_a) = a.handle.into_parts();
        let _ = events_a.recv().await;

        a.control.close();
        chan_a.close();
        b.control.close();

        assert_eq!(events_a.recv().await, Some(ChannelEvent::Close));
        assert!(events_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn connect_to_unknown_address_fails() {
        let signaling = LocalSignaling::new();
        assert!(matches!(
            signaling.connect("ns-NOBODY").await,
            Err(ProtocolError::Unreachable(_))
        ));
    }
}
