//! Peer connection core: framing, message ids and the keepalive protocol.
//!
//! [`Link`] holds all connection state and never touches a runtime; it is
//! driven by [`PeerConnection::run`], which owns the channel's event queue
//! and the two keepalive timers. Role-specific behaviour plugs in through
//! [`ConnectionHandler`].

use std::collections::VecDeque;
use std::future::pending;
use std::time::Duration;

use smartpad_types::{kind, Message, MessageId, Payload};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ChannelEvent, ChannelHandle};
use crate::error::ProtocolError;
use crate::keepalive::{KeepAliveConfig, LinkStats, PingSamples};
use crate::wire::{decode_frame, encode_frame};

/// Role hooks of a peer connection.
///
/// `ping` and `pong` never reach the handler. Close and error are terminal:
/// exactly one of them is called, once, after which the connection stops.
pub trait ConnectionHandler: Send + 'static {
    fn on_message(&mut self, link: &mut Link, message: Message);

    fn on_connection_close(&mut self, link: &mut Link);

    fn on_connection_error(&mut self, link: &mut Link, reason: String);
}

/// Connection state shared by both roles.
pub struct Link {
    channel: Option<Box<dyn Channel>>,
    next_id: MessageId,
    config: KeepAliveConfig,
    keep_alive: bool,
    /// Id and send time of pings still awaiting their pong, oldest first.
    outstanding: VecDeque<(MessageId, Instant)>,
    pings: PingSamples,
    next_ping_at: Option<Instant>,
    deadline: Option<Instant>,
    stats: watch::Sender<LinkStats>,
}

impl Link {
    pub fn new(config: KeepAliveConfig) -> Self {
        let (stats, _) = watch::channel(LinkStats::default());
        Self {
            channel: None,
            next_id: 0,
            config,
            keep_alive: false,
            outstanding: VecDeque::new(),
            pings: PingSamples::new(config.stored_pings),
            next_ping_at: None,
            deadline: None,
            stats,
        }
    }

    /// Replace the channel. Timers armed for the old channel are dropped;
    /// if keepalive is on it starts over against the new one.
    pub fn attach(&mut self, channel: Box<dyn Channel>) -> Option<Box<dyn Channel>> {
        debug!(peer = %channel.peer(), "attaching channel");
        let old = self.channel.replace(channel);
        self.cancel_timers();
        if self.keep_alive {
            self.start_keep_alive(Instant::now());
        }
        old
    }

    /// Send a message, assigning it the next id.
    ///
    /// Returns `None` without sending when the channel is not open. Reliable
    /// messages are flagged on the wire but take the same path as the rest;
    /// there is no acknowledgement or retransmission.
    pub fn send(&mut self, mut message: Message) -> Option<MessageId> {
        let Some(channel) = self.channel.as_deref().filter(|c| c.is_open()) else {
            warn!(kind = %message.kind, "tried to send message with closed connection");
            return None;
        };

        let id = self.next_id;
        self.next_id += 1;
        message.id = id;
        if message.reliable {
            trace!(id, "reliable send on unreliable path");
        }

        match encode_frame(&message) {
            Ok(frame) => {
                trace!(id, kind = %message.kind, len = frame.len(), "sending message");
                channel.send(frame);
                Some(id)
            }
            Err(e) => {
                warn!(id, kind = %message.kind, error = %e, "failed to encode message");
                None
            }
        }
    }

    /// Shorthand for `send(Message::new(kind, data))`.
    pub fn send_kind(&mut self, kind: &str, data: Payload) -> Option<MessageId> {
        self.send(Message::new(kind, data))
    }

    /// Turn keepalive on or off. Turning it on sends a ping right away and
    /// arms the deadman timer; turning it off cancels both timers.
    pub fn set_keep_alive(&mut self, enabled: bool) {
        self.keep_alive = enabled;
        if enabled {
            debug!("keepalive on");
            self.start_keep_alive(Instant::now());
        } else {
            debug!("keepalive off");
            self.cancel_timers();
        }
    }

    pub fn keep_alive_enabled(&self) -> bool {
        self.keep_alive
    }

    /// Change the deadman window. The running timer is disarmed and only
    /// re-armed by the next pong.
    pub fn set_connection_timeout(&mut self, timeout: Duration) {
        self.config.connection_timeout = timeout;
        self.deadline = None;
    }

    pub fn connection_timeout(&self) -> Duration {
        self.config.connection_timeout
    }

    pub fn keep_alive_interval(&self) -> Duration {
        self.config.interval
    }

    pub fn last_ping(&self) -> Option<Duration> {
        self.pings.last()
    }

    pub fn average_ping(&self) -> Option<Duration> {
        self.pings.average()
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats::from(&self.pings)
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<LinkStats> {
        self.stats.subscribe()
    }

    /// Id the next sent message will get.
    pub fn next_message_id(&self) -> MessageId {
        self.next_id
    }

    pub fn is_open(&self) -> bool {
        self.channel.as_deref().is_some_and(Channel::is_open)
    }

    /// Channel-level id of the remote peer.
    pub fn peer(&self) -> Option<&str> {
        self.channel.as_deref().map(Channel::peer)
    }

    /// Close the channel and stop both timers.
    pub fn close(&mut self) {
        self.cancel_timers();
        if let Some(channel) = self.channel.as_deref() {
            channel.close();
        }
    }

    /// When the next ping is due, if keepalive is running.
    pub fn next_ping_at(&self) -> Option<Instant> {
        self.next_ping_at
    }

    /// When the deadman timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Decode a frame and handle keepalive traffic.
    ///
    /// Returns the message when it is meant for the role handler.
    pub fn handle_frame(&mut self, frame: &[u8], now: Instant) -> Option<Message> {
        let message: Message = match decode_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return None;
            }
        };
        trace!(id = message.id, kind = %message.kind, "received message");

        if !message.has_kind() {
            warn!(id = message.id, "messages with no type can not be processed");
            return None;
        }
        match message.kind.as_str() {
            kind::PING => {
                self.send_kind(kind::PONG, Payload::Pong { id: message.id });
                None
            }
            kind::PONG => {
                self.handle_pong(&message.data, now);
                None
            }
            _ => Some(message),
        }
    }

    /// Send a ping and schedule the next one.
    pub fn send_ping(&mut self, now: Instant) {
        if let Some(id) = self.send_kind(kind::PING, Payload::None) {
            if self.outstanding.len() >= self.config.max_outstanding_pings() {
                self.outstanding.pop_front();
            }
            self.outstanding.push_back((id, now));
        }
        self.next_ping_at = Some(now + self.config.interval);
    }

    /// The deadman timer fired: close the channel.
    pub fn expire(&mut self) {
        warn!(
            peer = self.peer().unwrap_or("-"),
            timeout = ?self.config.connection_timeout,
            "no pong within connection timeout, closing"
        );
        self.close();
    }

    fn handle_pong(&mut self, data: &Payload, now: Instant) {
        let answered = match data {
            Payload::Pong { id } => self.outstanding.iter().position(|(sent, _)| sent == id),
            _ => None,
        };
        match answered.and_then(|index| self.outstanding.remove(index)) {
            Some((id, started)) => {
                let rtt = now.saturating_duration_since(started);
                self.pings.record(rtt);
                trace!(id, rtt = ?rtt, "pong");
                self.stats.send_replace(LinkStats::from(&self.pings));
            }
            None => debug!("pong does not answer an outstanding ping"),
        }
        if self.keep_alive {
            self.deadline = Some(now + self.config.connection_timeout);
        }
    }

    fn start_keep_alive(&mut self, now: Instant) {
        self.deadline = Some(now + self.config.connection_timeout);
        self.send_ping(now);
    }

    fn cancel_timers(&mut self) {
        self.next_ping_at = None;
        self.deadline = None;
        self.outstanding.clear();
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("peer", &self.peer())
            .field("open", &self.is_open())
            .field("next_id", &self.next_id)
            .field("keep_alive", &self.keep_alive)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Commands accepted by a running [`PeerConnection`].
#[derive(Debug)]
pub enum LinkCommand {
    Send(Message),
    SetKeepAlive(bool),
    SetConnectionTimeout(Duration),
    Close,
}

/// Cloneable handle to a running connection.
#[derive(Debug, Clone)]
pub struct LinkControl {
    commands: mpsc::UnboundedSender<LinkCommand>,
    stats: watch::Receiver<LinkStats>,
}

impl LinkControl {
    fn command(&self, command: LinkCommand) -> Result<(), ProtocolError> {
        self.commands
            .send(command)
            .map_err(|_| ProtocolError::ConnectionGone)
    }

    /// Queue a message. Ids are assigned when the connection task sends it.
    pub fn send(&self, message: Message) -> Result<(), ProtocolError> {
        self.command(LinkCommand::Send(message))
    }

    pub fn set_keep_alive(&self, enabled: bool) -> Result<(), ProtocolError> {
        self.command(LinkCommand::SetKeepAlive(enabled))
    }

    pub fn set_connection_timeout(&self, timeout: Duration) -> Result<(), ProtocolError> {
        self.command(LinkCommand::SetConnectionTimeout(timeout))
    }

    pub fn close(&self) -> Result<(), ProtocolError> {
        self.command(LinkCommand::Close)
    }

    /// Latest published latency figures.
    pub fn stats(&self) -> LinkStats {
        *self.stats.borrow()
    }

    /// Whether the connection task is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Wait until the connection task has stopped.
    pub async fn closed(&self) {
        self.commands.closed().await;
    }
}

/// A [`Link`] bound to a role handler and driven as a task.
pub struct PeerConnection<H> {
    link: Link,
    handler: H,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
}

impl<H: ConnectionHandler> PeerConnection<H> {
    pub fn new(config: KeepAliveConfig, handler: H) -> (Self, LinkControl) {
        let link = Link::new(config);
        let (tx, rx) = mpsc::unbounded_channel();
        let control = LinkControl {
            commands: tx,
            stats: link.subscribe_stats(),
        };
        let connection = Self {
            link,
            handler,
            events: None,
            commands: rx,
        };
        (connection, control)
    }

    /// Attach a channel. The previous channel's event queue is dropped, so
    /// nothing it emits afterwards reaches this connection.
    pub fn attach(&mut self, handle: ChannelHandle) {
        let (channel, events) = handle.into_parts();
        self.link.attach(channel);
        self.events = Some(events);
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Drive the connection until the channel closes or fails.
    ///
    /// Returns the handler once the terminal hook has run.
    pub async fn run(mut self) -> H {
        let mut commands_open = true;
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => commands_open = false,
                },

                event = next_event(self.events.as_mut()) => {
                    if self.handle_event(event) {
                        break;
                    }
                }

                () = sleep_opt(self.link.deadline()) => self.link.expire(),

                () = sleep_opt(self.link.next_ping_at()) => self.link.send_ping(Instant::now()),
            }
        }
        self.link.close();
        debug!(peer = self.link.peer().unwrap_or("-"), "connection task finished");
        self.handler
    }

    fn handle_command(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::Send(message) => {
                self.link.send(message);
            }
            LinkCommand::SetKeepAlive(enabled) => self.link.set_keep_alive(enabled),
            LinkCommand::SetConnectionTimeout(timeout) => self.link.set_connection_timeout(timeout),
            LinkCommand::Close => self.link.close(),
        }
    }

    /// Returns `true` when the event ends the connection.
    fn handle_event(&mut self, event: Option<ChannelEvent>) -> bool {
        match event {
            Some(ChannelEvent::Open) => {
                trace!("duplicate open event");
                false
            }
            Some(ChannelEvent::Data(frame)) => {
                if let Some(message) = self.link.handle_frame(&frame, Instant::now()) {
                    self.handler.on_message(&mut self.link, message);
                }
                false
            }
            Some(ChannelEvent::Close) | None => {
                self.link.cancel_timers();
                self.handler.on_connection_close(&mut self.link);
                true
            }
            Some(ChannelEvent::Error(reason)) => {
                self.link.cancel_timers();
                self.handler.on_connection_error(&mut self.link, reason);
                true
            }
        }
    }
}

async fn next_event(
    events: Option<&mut mpsc::UnboundedReceiver<ChannelEvent>>,
) -> Option<ChannelEvent> {
    match events {
        Some(events) => events.recv().await,
        None => pending().await,
    }
}

async fn sleep_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}
