//! Server side of one client connection.

use smartpad_protocol::{
    ChannelHandle, ConnectionHandler, KeepAliveConfig, Link, LinkControl, LinkStats,
    PeerConnection,
};
use smartpad_types::{axis_slots, kind, ClientId, Message, Payload};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::ClientRegistry;

/// What a hosted connection reports to its gamepad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostedEvent {
    Button { index: usize, pressed: bool },
    /// One axis slot. An `axisUpdate` produces two of these, x first.
    Axis { slot: usize, value: f64 },
    /// The connection is gone. Always the last event.
    Disconnect,
}

struct HostedHandler {
    id: ClientId,
    registry: ClientRegistry,
    events: mpsc::UnboundedSender<HostedEvent>,
}

impl HostedHandler {
    fn emit(&self, event: HostedEvent) {
        let _ = self.events.send(event);
    }

    fn remove_from_server(&mut self, link: &mut Link) {
        link.close();
        self.registry.remove(&self.id);
        self.emit(HostedEvent::Disconnect);
    }
}

impl ConnectionHandler for HostedHandler {
    fn on_message(&mut self, _link: &mut Link, message: Message) {
        match (message.kind.as_str(), &message.data) {
            (kind::AXIS_UPDATE, Payload::Axis(update)) => {
                let (x_slot, y_slot) = axis_slots(update.index);
                self.emit(HostedEvent::Axis {
                    slot: x_slot,
                    value: update.x,
                });
                self.emit(HostedEvent::Axis {
                    slot: y_slot,
                    value: update.y,
                });
            }
            (kind::BUTTON_UPDATE, Payload::Button(update)) => {
                let index = usize::try_from(update.index).unwrap_or(usize::MAX);
                self.emit(HostedEvent::Button {
                    index,
                    pressed: update.pressed,
                });
            }
            (kind::AXIS_UPDATE | kind::BUTTON_UPDATE, data) => {
                warn!(client = %self.id, kind = %message.kind, ?data, "malformed message");
            }
            (other, _) => {
                warn!(client = %self.id, kind = other, "unhandled message type");
            }
        }
    }

    fn on_connection_close(&mut self, link: &mut Link) {
        info!(client = %self.id, "hosted connection closed");
        self.remove_from_server(link);
    }

    fn on_connection_error(&mut self, link: &mut Link, reason: String) {
        warn!(client = %self.id, %reason, "hosted connection error");
        self.remove_from_server(link);
    }
}

/// A connected client, as handed out by the server.
///
/// The connection runs in its own task; this is a handle to it plus the
/// receiving end of its events.
#[derive(Debug)]
pub struct HostedConnection {
    id: ClientId,
    control: LinkControl,
    events: Option<mpsc::UnboundedReceiver<HostedEvent>>,
}

impl HostedConnection {
    /// Wrap an open channel, register it and start its task with keepalive
    /// on.
    ///
    /// Returns `None` and closes the channel if the server no longer admits
    /// clients.
    pub(crate) fn spawn(
        handle: ChannelHandle,
        keep_alive: KeepAliveConfig,
        registry: ClientRegistry,
    ) -> Option<Self> {
        let id = ClientId::new(handle.peer());
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = HostedHandler {
            id: id.clone(),
            registry: registry.clone(),
            events: tx,
        };
        let (mut connection, control) = PeerConnection::new(keep_alive, handler);
        connection.attach(handle);

        if !registry.insert(id.clone(), control.clone()) {
            connection.link_mut().close();
            return None;
        }
        connection.link_mut().set_keep_alive(true);
        tokio::spawn(async move {
            connection.run().await;
        });
        debug!(client = %id, "hosted connection started");

        Some(Self {
            id,
            control,
            events: Some(rx),
        })
    }

    /// Stable client id: the remote's channel-level peer id.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn control(&self) -> &LinkControl {
        &self.control
    }

    /// Take the event receiver. Returns `None` if already taken.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<HostedEvent>> {
        self.events.take()
    }

    pub fn stats(&self) -> LinkStats {
        self.control.stats()
    }

    pub fn is_connected(&self) -> bool {
        self.control.is_running()
    }

    /// Close the connection. Teardown runs in the connection task.
    pub fn close(&self) {
        if self.control.close().is_err() {
            debug!(client = %self.id, "hosted connection already stopped");
        }
    }
}
