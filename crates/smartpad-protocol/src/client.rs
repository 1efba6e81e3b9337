//! Client role: the touch device's side of a connection.

use std::time::Duration;

use smartpad_types::{ConnectionCode, Message, Pad, ADDRESS_PREFIX};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandler, Link, LinkControl, PeerConnection};
use crate::error::ProtocolError;
use crate::keepalive::{KeepAliveConfig, LinkStats};
use crate::signaling::Signaling;

/// How long a client waits for the channel handshake by default.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Namespace prefix put in front of the connection code.
    pub address_prefix: String,
    pub keep_alive: KeepAliveConfig,
    pub open_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address_prefix: ADDRESS_PREFIX.to_string(),
            keep_alive: KeepAliveConfig::default(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

/// Lifecycle notifications of a [`RemoteClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// An application message from the server.
    Message(Message),
    ConnectionClosed,
    ConnectionError(String),
}

struct ClientHandler {
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ConnectionHandler for ClientHandler {
    fn on_message(&mut self, _link: &mut Link, message: Message) {
        debug!(id = message.id, kind = %message.kind, "message from server");
        let _ = self.events.send(ClientEvent::Message(message));
    }

    fn on_connection_close(&mut self, _link: &mut Link) {
        info!("connection to server closed");
        let _ = self.events.send(ClientEvent::ConnectionClosed);
    }

    fn on_connection_error(&mut self, _link: &mut Link, reason: String) {
        warn!(%reason, "connection to server failed");
        let _ = self.events.send(ClientEvent::ConnectionError(reason));
    }
}

/// A connected touch client.
///
/// Dropping the client closes its connection.
#[derive(Debug)]
pub struct RemoteClient {
    code: ConnectionCode,
    control: LinkControl,
    events: Option<mpsc::UnboundedReceiver<ClientEvent>>,
}

impl RemoteClient {
    /// Connect to the server holding `code` and start keepalive.
    ///
    /// Fails if the address is unreachable, or if the channel reports an
    /// error, closes, or stays unopened past `open_timeout`.
    pub async fn connect<S: Signaling + ?Sized>(
        signaling: &S,
        code: &ConnectionCode,
        config: &ClientConfig,
    ) -> Result<Self, ProtocolError> {
        let address = code.address(&config.address_prefix);
        info!(%address, "connecting");

        let mut handle = signaling.connect(&address).await?;
        tokio::time::timeout(config.open_timeout, handle.wait_open())
            .await
            .map_err(|_| ProtocolError::Timeout(config.open_timeout))??;

        let (tx, rx) = mpsc::unbounded_channel();
        let (mut connection, control) =
            PeerConnection::new(config.keep_alive, ClientHandler { events: tx });
        connection.attach(handle);
        connection.link_mut().set_keep_alive(true);

        tokio::spawn(async move {
            connection.run().await;
        });

        info!(%address, "connected");
        Ok(Self {
            code: code.clone(),
            control,
            events: Some(rx),
        })
    }

    pub fn code(&self) -> &ConnectionCode {
        &self.code
    }

    pub fn send(&self, message: Message) -> Result<(), ProtocolError> {
        self.control.send(message)
    }

    /// Report a button change. `index` follows the standard gamepad mapping.
    pub fn send_button_update(&self, index: u32, pressed: bool) -> Result<(), ProtocolError> {
        self.send(Message::button_update(index, pressed))
    }

    /// Report a thumbstick position. Both axes of the pad always travel
    /// together.
    pub fn send_axis_update(&self, pad: Pad, x: f64, y: f64) -> Result<(), ProtocolError> {
        self.send(Message::axis_update(pad.index(), x, y))
    }

    /// Take the event receiver. Returns `None` if already taken.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events.take()
    }

    pub fn stats(&self) -> LinkStats {
        self.control.stats()
    }

    pub fn control(&self) -> &LinkControl {
        &self.control
    }

    pub fn is_connected(&self) -> bool {
        self.control.is_running()
    }

    pub fn close(&self) -> Result<(), ProtocolError> {
        self.control.close()
    }

    /// Wait for the connection task to finish.
    pub async fn closed(&self) {
        self.control.closed().await;
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        let _ = self.control.close();
    }
}
