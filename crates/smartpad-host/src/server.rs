//! Gamepad server: claims a connection code and hosts client connections.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smartpad_protocol::{ChannelHandle, KeepAliveConfig, LinkControl, Registration, Signaling};
use smartpad_types::{ClientId, CodeGenerator, ConnectionCode, ADDRESS_PREFIX};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::hosted::HostedConnection;
use crate::state::ServerState;

/// Address claim attempts before `start` gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Random draws allowed per retry to find a code not tried yet.
const MAX_CODE_DRAWS: usize = 64;

/// Notifications from a [`GamepadServer`].
#[derive(Debug)]
pub enum ServerEvent {
    ClientConnected(HostedConnection),
    ClientDisconnected(ClientId),
}

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub generator: CodeGenerator,
    /// Namespace prefix put in front of every code.
    pub address_prefix: String,
    pub max_retries: u32,
    /// Keepalive settings of hosted connections.
    pub keep_alive: KeepAliveConfig,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            generator: CodeGenerator::default(),
            address_prefix: ADDRESS_PREFIX.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            keep_alive: KeepAliveConfig::default(),
        }
    }
}

#[derive(Default)]
struct Clients {
    live: HashMap<ClientId, LinkControl>,
    /// New clients are only admitted while the server is listening.
    accepting: bool,
}

/// The live client set, shared with every hosted connection so it can
/// remove itself on teardown.
#[derive(Clone)]
pub(crate) struct ClientRegistry {
    clients: Arc<Mutex<Clients>>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl ClientRegistry {
    pub(crate) fn new(events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            clients: Arc::default(),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Clients> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a client. Refused once the server stopped listening.
    pub(crate) fn insert(&self, id: ClientId, control: LinkControl) -> bool {
        let mut clients = self.lock();
        if !clients.accepting {
            return false;
        }
        clients.live.insert(id, control);
        true
    }

    pub(crate) fn open(&self) {
        self.lock().accepting = true;
    }

    /// Stop admitting clients and return the live ones.
    fn shut(&self) -> Vec<LinkControl> {
        let mut clients = self.lock();
        clients.accepting = false;
        clients.live.values().cloned().collect()
    }

    /// Remove a client. Emits `ClientDisconnected` only if it was present.
    pub(crate) fn remove(&self, id: &ClientId) -> bool {
        let removed = self.lock().live.remove(id).is_some();
        if removed {
            info!(client = %id, "client disconnected");
            let _ = self.events.send(ServerEvent::ClientDisconnected(id.clone()));
        }
        removed
    }

    fn clear(&self) -> Vec<LinkControl> {
        self.lock().live.drain().map(|(_, control)| control).collect()
    }

    fn ids(&self) -> Vec<ClientId> {
        self.lock().live.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.lock().live.len()
    }

    fn notify(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

/// Claims a connection code and turns every inbound channel into a
/// [`HostedConnection`].
pub struct GamepadServer {
    signaling: Arc<dyn Signaling>,
    settings: ServerSettings,
    state: ServerState,
    code: Option<ConnectionCode>,
    registry: ClientRegistry,
    events: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    accept_task: Option<JoinHandle<()>>,
}

impl GamepadServer {
    pub fn new(signaling: Arc<dyn Signaling>, settings: ServerSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            signaling,
            settings,
            state: ServerState::Idle,
            code: None,
            registry: ClientRegistry::new(tx),
            events: Some(rx),
            accept_task: None,
        }
    }

    /// Start with the configured retry count.
    pub async fn start(
        &mut self,
        desired: Option<ConnectionCode>,
    ) -> Result<ConnectionCode, ServerError> {
        let max_retries = self.settings.max_retries;
        self.start_with_retries(desired, max_retries).await
    }

    /// Claim a connection code and start accepting clients.
    ///
    /// `desired` is tried first; every other attempt uses a random code
    /// that was not tried before. Fails after `max_retries` failed claims,
    /// when no untried code can be drawn, or immediately if the server is
    /// already starting or listening.
    pub async fn start_with_retries(
        &mut self,
        desired: Option<ConnectionCode>,
        max_retries: u32,
    ) -> Result<ConnectionCode, ServerError> {
        if !self.state.can_start() {
            return Err(ServerError::AlreadyStarted);
        }
        for control in self.registry.clear() {
            let _ = control.close();
        }
        self.state = ServerState::Starting;

        let mut attempts = 0;
        let mut tried = HashSet::new();
        let mut code = desired.unwrap_or_else(|| self.random_code());
        loop {
            tried.insert(code.clone());
            let address = code.address(&self.settings.address_prefix);
            debug!(%address, attempt = attempts + 1, "claiming address");
            match self.signaling.claim(&address).await {
                Ok(registration) => {
                    info!(%code, "server listening");
                    self.code = Some(code.clone());
                    self.state = ServerState::Listening;
                    self.registry.open();
                    self.accept_task = Some(tokio::spawn(accept_loop(
                        registration,
                        self.settings.keep_alive,
                        self.registry.clone(),
                    )));
                    return Ok(code);
                }
                Err(e) => {
                    attempts += 1;
                    warn!(%address, attempts, error = %e, "address claim failed");
                    let next = if attempts < max_retries {
                        self.untried_code(&tried)
                    } else {
                        None
                    };
                    match next {
                        Some(next) => code = next,
                        None => {
                            self.state = ServerState::Failed;
                            return Err(ServerError::RetriesExhausted {
                                attempts,
                                source: e,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Release the code, stop accepting and close every client.
    ///
    /// The code is free again once this returns, and no client is admitted
    /// after it. Clients leave the live set as their connections tear down.
    pub async fn stop(&mut self) {
        let controls = self.registry.shut();
        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
        }
        for control in controls {
            let _ = control.close();
        }
        if let Some(code) = self.code.take() {
            info!(%code, "server stopped");
        }
        self.state = ServerState::Idle;
    }

    /// Remove a client from the live set. No-op if it is not there.
    pub fn remove_hosted_connection(&self, id: &ClientId) -> bool {
        self.registry.remove(id)
    }

    /// Take the notification receiver. Returns `None` if already taken.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.events.take()
    }

    pub fn connection_code(&self) -> Option<&ConnectionCode> {
        self.code.as_ref()
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.registry.ids()
    }

    fn random_code(&self) -> ConnectionCode {
        self.settings.generator.generate(&mut rand::thread_rng())
    }

    fn untried_code(&self, tried: &HashSet<ConnectionCode>) -> Option<ConnectionCode> {
        let mut rng = rand::thread_rng();
        let code = (0..MAX_CODE_DRAWS)
            .map(|_| self.settings.generator.generate(&mut rng))
            .find(|code| !tried.contains(code));
        if code.is_none() {
            warn!(tried = tried.len(), "no untried connection code left to draw");
        }
        code
    }
}

impl Drop for GamepadServer {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for GamepadServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GamepadServer")
            .field("state", &self.state)
            .field("code", &self.code)
            .field("clients", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Accept inbound channels until the registration ends. Handshakes in
/// flight belong to this task and are cancelled with it.
async fn accept_loop(
    mut registration: Registration,
    keep_alive: KeepAliveConfig,
    registry: ClientRegistry,
) {
    let mut handshakes = JoinSet::new();
    loop {
        tokio::select! {
            handle = registration.accept() => match handle {
                Some(handle) => {
                    handshakes.spawn(host_client(handle, keep_alive, registry.clone()));
                }
                None => break,
            },
            Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
        }
    }
    while handshakes.join_next().await.is_some() {}
    debug!(address = registration.address(), "accept loop finished");
}

/// Wait for the handshake, then host the client. A channel that fails to
/// open, or opens after the server stopped, is dropped.
async fn host_client(
    mut handle: ChannelHandle,
    keep_alive: KeepAliveConfig,
    registry: ClientRegistry,
) {
    if let Err(e) = handle.wait_open().await {
        warn!(peer = %handle.peer(), error = %e, "inbound channel failed to open");
        return;
    }
    let Some(hosted) = HostedConnection::spawn(handle, keep_alive, registry.clone()) else {
        debug!("server stopped during handshake, dropping channel");
        return;
    };
    info!(client = %hosted.id(), "client connected");
    registry.notify(ServerEvent::ClientConnected(hosted));
}
