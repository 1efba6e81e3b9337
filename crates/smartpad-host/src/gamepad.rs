//! Virtual gamepads and the snapshot shape consumers poll.

use std::collections::BTreeMap;

use smartpad_protocol::LinkControl;
use smartpad_types::{ClientId, GamepadButton, AXIS_COUNT, BUTTON_COUNT, MAPPING_STANDARD};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::hosted::HostedEvent;

/// Highest button index a virtual gamepad accepts. Custom layouts may go
/// past the standard twenty buttons, but not without bound.
pub const MAX_BUTTON_INDEX: usize = 255;

/// Point-in-time view of a gamepad, shaped like the browser's `Gamepad`.
#[derive(Debug, Clone, PartialEq)]
pub struct Gamepad {
    pub id: String,
    /// Slot in the merged device list; `None` until one is assigned.
    pub index: Option<usize>,
    pub connected: bool,
    /// Time of the last button or axis change.
    pub timestamp: Instant,
    pub mapping: String,
    pub axes: [f64; AXIS_COUNT],
    pub buttons: Vec<GamepadButton>,
}

impl Gamepad {
    /// A connected standard-mapping gamepad with everything at rest.
    pub fn new(id: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            id: id.into(),
            index,
            connected: true,
            timestamp: Instant::now(),
            mapping: MAPPING_STANDARD.to_string(),
            axes: [0.0; AXIS_COUNT],
            buttons: vec![GamepadButton::default(); BUTTON_COUNT],
        }
    }
}

/// Connect and disconnect notifications for consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum GamepadEvent {
    Connected(Gamepad),
    Disconnected(Gamepad),
}

impl GamepadEvent {
    /// Event name as the browser API spells it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "gamepadconnected",
            Self::Disconnected(_) => "gamepaddisconnected",
        }
    }

    pub fn gamepad(&self) -> &Gamepad {
        match self {
            Self::Connected(gamepad) | Self::Disconnected(gamepad) => gamepad,
        }
    }
}

/// Source of gamepads attached to the local machine.
pub trait NativeGamepads: Send + Sync + 'static {
    /// Current native devices by slot. `None` marks an empty slot.
    fn get_gamepads(&self) -> Vec<Option<Gamepad>>;
}

/// No native devices at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNativeGamepads;

impl NativeGamepads for NoNativeGamepads {
    fn get_gamepads(&self) -> Vec<Option<Gamepad>> {
        Vec::new()
    }
}

/// Host-side mirror of one remote touch gamepad.
#[derive(Debug)]
pub struct VirtualGamepad {
    id: String,
    /// Connection this gamepad mirrors; cleared on disconnect.
    client: Option<(ClientId, LinkControl)>,
    index: Option<usize>,
    connected: bool,
    timestamp: Instant,
    axes: [f64; AXIS_COUNT],
    buttons: BTreeMap<usize, GamepadButton>,
}

impl VirtualGamepad {
    pub fn new(client: ClientId, control: LinkControl) -> Self {
        let buttons = (0..BUTTON_COUNT)
            .map(|index| (index, GamepadButton::default()))
            .collect();
        Self {
            id: format!("smartpad:{client}"),
            client: Some((client, control)),
            index: None,
            connected: true,
            timestamp: Instant::now(),
            axes: [0.0; AXIS_COUNT],
            buttons,
        }
    }

    /// Apply an event from the hosted connection.
    ///
    /// Returns the disconnect notification when the connection went away.
    pub fn apply(&mut self, event: HostedEvent) -> Option<GamepadEvent> {
        match event {
            HostedEvent::Button { index, pressed } => {
                self.update_button(index, pressed);
                None
            }
            HostedEvent::Axis { slot, value } => {
                self.update_axis(slot, value);
                None
            }
            HostedEvent::Disconnect => Some(self.disconnect()),
        }
    }

    /// Set a button, creating it if the index is past the known ones.
    pub fn update_button(&mut self, index: usize, pressed: bool) {
        if index > MAX_BUTTON_INDEX {
            warn!(gamepad = %self.id, index, "button index out of range");
            return;
        }
        self.timestamp = Instant::now();
        self.buttons.entry(index).or_default().set_pressed(pressed);
    }

    /// Overwrite one axis slot.
    pub fn update_axis(&mut self, slot: usize, value: f64) {
        self.timestamp = Instant::now();
        match self.axes.get_mut(slot) {
            Some(axis) => *axis = value,
            None => warn!(gamepad = %self.id, slot, "axis slot out of range"),
        }
    }

    /// Mark disconnected and drop the connection reference.
    pub fn disconnect(&mut self) -> GamepadEvent {
        debug!(gamepad = %self.id, index = ?self.index, "gamepad disconnected");
        self.connected = false;
        self.client = None;
        GamepadEvent::Disconnected(self.snapshot())
    }

    pub fn snapshot(&self) -> Gamepad {
        let len = self
            .buttons
            .last_key_value()
            .map_or(0, |(&index, _)| index + 1)
            .max(BUTTON_COUNT);
        let mut buttons = vec![GamepadButton::default(); len];
        for (&index, &button) in &self.buttons {
            buttons[index] = button;
        }
        Gamepad {
            id: self.id.clone(),
            index: self.index,
            connected: self.connected,
            timestamp: self.timestamp,
            mapping: MAPPING_STANDARD.to_string(),
            axes: self.axes,
            buttons,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = Some(index);
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn axes(&self) -> &[f64; AXIS_COUNT] {
        &self.axes
    }

    pub fn button(&self, index: usize) -> Option<&GamepadButton> {
        self.buttons.get(&index)
    }

    pub fn client_id(&self) -> Option<&ClientId> {
        self.client.as_ref().map(|(id, _)| id)
    }

    /// Control handle of the mirrored connection, while connected.
    pub fn control(&self) -> Option<&LinkControl> {
        self.client.as_ref().map(|(_, control)| control)
    }
}

/// A gamepad whose connection never runs.
#[cfg(test)]
pub(crate) fn detached_gamepad(client: &str) -> VirtualGamepad {
    use smartpad_protocol::{ConnectionHandler, KeepAliveConfig, Link, PeerConnection};
    use smartpad_types::Message;

    struct Idle;

    impl ConnectionHandler for Idle {
        fn on_message(&mut self, _link: &mut Link, _message: Message) {}
        fn on_connection_close(&mut self, _link: &mut Link) {}
        fn on_connection_error(&mut self, _link: &mut Link, _reason: String) {}
    }

    let (_connection, control) = PeerConnection::new(KeepAliveConfig::default(), Idle);
    VirtualGamepad::new(ClientId::new(client), control)
}
