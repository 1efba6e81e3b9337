//! Ties the server to the multiplexer: every hosted connection becomes a
//! virtual gamepad in the merged device view.

use std::sync::{Arc, Mutex};

use smartpad_protocol::Signaling;
use smartpad_types::{ClientId, ConnectionCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::gamepad::{Gamepad, GamepadEvent, NativeGamepads, NoNativeGamepads, VirtualGamepad};
use crate::hosted::{HostedConnection, HostedEvent};
use crate::multiplexer::{lock, Multiplexer, SharedGamepad};
use crate::server::{GamepadServer, ServerEvent, ServerSettings};
use crate::state::ServerState;

/// A gamepad server whose clients show up next to the native devices.
pub struct GamepadService<N: NativeGamepads = NoNativeGamepads> {
    server: GamepadServer,
    multiplexer: Arc<Mutex<Multiplexer>>,
    native: N,
    dispatcher: Option<JoinHandle<()>>,
}

impl GamepadService {
    pub fn new(signaling: Arc<dyn Signaling>, settings: ServerSettings) -> Self {
        Self::with_native(signaling, settings, NoNativeGamepads)
    }
}

impl<N: NativeGamepads> GamepadService<N> {
    pub fn with_native(signaling: Arc<dyn Signaling>, settings: ServerSettings, native: N) -> Self {
        Self {
            server: GamepadServer::new(signaling, settings),
            multiplexer: Arc::default(),
            native,
            dispatcher: None,
        }
    }

    /// Start the server and begin turning clients into gamepads.
    pub async fn start(
        &mut self,
        desired: Option<ConnectionCode>,
    ) -> Result<ConnectionCode, ServerError> {
        if self.dispatcher.is_none() {
            if let Some(events) = self.server.take_events() {
                self.dispatcher = Some(tokio::spawn(dispatch_server_events(
                    events,
                    Arc::clone(&self.multiplexer),
                )));
            }
        }
        self.server.start(desired).await
    }

    /// Stop the server. Gamepads disconnect as their connections close.
    pub async fn stop(&mut self) {
        self.server.stop().await;
    }

    /// The merged device list: remote gamepads in their slots, native
    /// devices filling the rest.
    pub fn get_gamepads(&self) -> Vec<Option<Gamepad>> {
        let native = self.native.get_gamepads();
        lock(&self.multiplexer).merge(&native).to_vec()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GamepadEvent> {
        lock(&self.multiplexer).subscribe()
    }

    pub fn connection_code(&self) -> Option<&ConnectionCode> {
        self.server.connection_code()
    }

    pub fn state(&self) -> ServerState {
        self.server.state()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.server.client_ids()
    }

    pub fn server(&self) -> &GamepadServer {
        &self.server
    }

    pub fn multiplexer(&self) -> &Arc<Mutex<Multiplexer>> {
        &self.multiplexer
    }
}

impl<N: NativeGamepads> Drop for GamepadService<N> {
    fn drop(&mut self) {
        if let Some(task) = self.dispatcher.take() {
            task.abort();
        }
    }
}

async fn dispatch_server_events(
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    multiplexer: Arc<Mutex<Multiplexer>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::ClientConnected(hosted) => {
                tokio::spawn(bind_gamepad(hosted, Arc::clone(&multiplexer)));
            }
            ServerEvent::ClientDisconnected(id) => {
                debug!(client = %id, "client left the server");
            }
        }
    }
}

/// Mirror one hosted connection into a virtual gamepad until it goes away.
async fn bind_gamepad(mut hosted: HostedConnection, multiplexer: Arc<Mutex<Multiplexer>>) {
    let Some(mut events) = hosted.take_events() else {
        warn!(client = %hosted.id(), "hosted connection events already taken");
        return;
    };
    let gamepad: SharedGamepad = Arc::new(Mutex::new(VirtualGamepad::new(
        hosted.id().clone(),
        hosted.control().clone(),
    )));
    lock(&multiplexer).enqueue(Arc::clone(&gamepad));

    while let Some(event) = events.recv().await {
        if event == HostedEvent::Disconnect {
            break;
        }
        lock(&gamepad).apply(event);
    }

    let mut multiplexer = lock(&multiplexer);
    if lock(&gamepad).is_connected() {
        multiplexer.disconnect(&gamepad);
    }
}
