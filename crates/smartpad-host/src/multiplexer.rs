//! Slot allocation for virtual gamepads and the merged device view.
//!
//! Remote gamepads get the lowest free slot, so indices stay dense and a
//! replugged device usually lands where it was. On every poll the remote
//! slots are laid over the native devices: a remote gamepad wins its slot,
//! a native one fills it otherwise.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::gamepad::{Gamepad, GamepadEvent, VirtualGamepad};

/// A virtual gamepad shared between its connection task and the
/// multiplexer. Lock the multiplexer before the gamepad, never the reverse.
pub type SharedGamepad = Arc<Mutex<VirtualGamepad>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct Multiplexer {
    remote: BTreeMap<usize, SharedGamepad>,
    pending: VecDeque<SharedGamepad>,
    combined: Vec<Option<Gamepad>>,
    subscribers: Vec<mpsc::UnboundedSender<GamepadEvent>>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive connect and disconnect events. Subscribers are served in
    /// subscription order; dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<GamepadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Queue a newly connected gamepad and assign slots to everything
    /// waiting.
    pub fn enqueue(&mut self, gamepad: SharedGamepad) {
        self.pending.push_back(gamepad);
        self.drain();
    }

    fn drain(&mut self) {
        while let Some(gamepad) = self.pending.pop_front() {
            let index = self.next_index();
            let snapshot = {
                let mut pad = lock(&gamepad);
                pad.set_index(index);
                pad.snapshot()
            };
            info!(index, gamepad = %snapshot.id, "gamepad connected");
            self.remote.insert(index, gamepad);
            self.dispatch(GamepadEvent::Connected(snapshot));
        }
    }

    /// Lowest slot without a remote gamepad.
    pub fn next_index(&self) -> usize {
        let mut index = 0;
        for &taken in self.remote.keys() {
            if taken != index {
                break;
            }
            index += 1;
        }
        index
    }

    /// Empty a slot so a later gamepad can reuse it.
    pub fn free_slot(&mut self, index: usize) -> Option<SharedGamepad> {
        let freed = self.remote.remove(&index);
        if freed.is_some() {
            debug!(index, "slot freed");
        }
        freed
    }

    /// Disconnect a gamepad, free its slot and notify subscribers.
    pub fn disconnect(&mut self, gamepad: &SharedGamepad) {
        let (event, index) = {
            let mut pad = lock(gamepad);
            (pad.disconnect(), pad.index())
        };
        let holds_slot = index
            .and_then(|index| self.remote.get(&index))
            .is_some_and(|current| Arc::ptr_eq(current, gamepad));
        match index {
            Some(index) if holds_slot => {
                self.free_slot(index);
            }
            _ => self.pending.retain(|queued| !Arc::ptr_eq(queued, gamepad)),
        }
        self.dispatch(event);
    }

    fn dispatch(&mut self, event: GamepadEvent) {
        debug!(event = event.name(), subscribers = self.subscribers.len(), "dispatching");
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Rebuild the merged view from the remote slots and `native`.
    ///
    /// The view is as long as the longer of the two; anything past that
    /// from an earlier poll is dropped.
    pub fn merge(&mut self, native: &[Option<Gamepad>]) -> &[Option<Gamepad>] {
        let len = self.remote_len().max(native.len());
        self.combined.truncate(len);
        for index in 0..len {
            let entry = match self.remote.get(&index) {
                Some(remote) => Some(lock(remote).snapshot()),
                None => native.get(index).cloned().flatten(),
            };
            match self.combined.get_mut(index) {
                Some(slot) => *slot = entry,
                None => self.combined.push(entry),
            }
        }
        &self.combined
    }

    /// One past the highest occupied remote slot.
    pub fn remote_len(&self) -> usize {
        self.remote.last_key_value().map_or(0, |(&index, _)| index + 1)
    }

    pub fn get(&self, index: usize) -> Option<&SharedGamepad> {
        self.remote.get(&index)
    }

    /// Occupied remote slots, lowest first.
    pub fn slots(&self) -> Vec<usize> {
        self.remote.keys().copied().collect()
    }

    pub fn connected_count(&self) -> usize {
        self.remote.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamepad::detached_gamepad;

    fn shared(client: &str) -> SharedGamepad {
        Arc::new(Mutex::new(detached_gamepad(client)))
    }

    fn native(id: &str) -> Option<Gamepad> {
        Some(Gamepad::new(id, None))
    }

    fn ids(view: &[Option<Gamepad>]) -> Vec<Option<String>> {
        view.iter()
            .map(|entry| entry.as_ref().map(|pad| pad.id.clone()))
            .collect()
    }

    #[test]
    fn indices_are_assigned_in_order() {
        let mut mux = Multiplexer::new();
        let pads: Vec<_> = ["a", "b", "c"].iter().map(|c| shared(c)).collect();
        for pad in &pads {
            mux.enqueue(Arc::clone(pad));
        }
        let indices: Vec<_> = pads.iter().map(|pad| lock(pad).index()).collect();
        assert_eq!(indices, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(mux.pending_count(), 0);
    }

    #[test]
    fn freed_slot_is_reused_first() {
        let mut mux = Multiplexer::new();
        for client in ["a", "b", "c"] {
            mux.enqueue(shared(client));
        }
        assert!(mux.free_slot(1).is_some());

        let newcomer = shared("d");
        mux.enqueue(Arc::clone(&newcomer));
        assert_eq!(lock(&newcomer).index(), Some(1));
        assert_eq!(mux.slots(), vec![0, 1, 2]);
        assert_eq!(mux.next_index(), 3);
    }

    #[test]
    fn remote_wins_slot_native_fills_holes() {
        let mut mux = Multiplexer::new();
        for client in ["A", "B", "C"] {
            mux.enqueue(shared(client));
        }
        mux.free_slot(1);

        let view = mux.merge(&[native("X"), native("Y")]);
        assert_eq!(
            ids(view),
            vec![
                Some("smartpad:A".to_string()),
                Some("Y".to_string()),
                Some("smartpad:C".to_string()),
            ]
        );
    }

    #[test]
    fn view_shrinks_with_native_devices() {
        let mut mux = Multiplexer::new();
        mux.enqueue(shared("A"));

        assert_eq!(mux.merge(&[native("X"), native("Y"), None, native("Z")]).len(), 4);
        let view = mux.merge(&[native("X")]);
        assert_eq!(ids(view), vec![Some("smartpad:A".to_string())]);
        assert_eq!(mux.merge(&[]).len(), 1);
    }

    #[test]
    fn view_reflects_live_state() {
        let mut mux = Multiplexer::new();
        let pad = shared("A");
        mux.enqueue(Arc::clone(&pad));

        lock(&pad).update_button(0, true);
        let view = mux.merge(&[]);
        let first = view[0].as_ref().unwrap();
        assert!(first.buttons[0].pressed);
        assert_eq!(first.index, Some(0));
    }

    #[test]
    fn connect_and_disconnect_are_announced() {
        let mut mux = Multiplexer::new();
        let mut first = mux.subscribe();
        let mut second = mux.subscribe();
        let pad = shared("A");

        mux.enqueue(Arc::clone(&pad));
        mux.disconnect(&pad);

        for events in [&mut first, &mut second] {
            let connected = events.try_recv().unwrap();
            assert_eq!(connected.name(), "gamepadconnected");
            assert_eq!(connected.gamepad().index, Some(0));
            let disconnected = events.try_recv().unwrap();
            assert_eq!(disconnected.name(), "gamepaddisconnected");
            assert!(!disconnected.gamepad().connected);
        }
        assert_eq!(mux.connected_count(), 0);
        assert!(!lock(&pad).is_connected());
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let mut mux = Multiplexer::new();
        drop(mux.subscribe());
        let mut live = mux.subscribe();
        mux.enqueue(shared("A"));
        assert!(live.try_recv().is_ok());
        assert_eq!(mux.subscribers.len(), 1);
    }

    #[test]
    fn disconnect_only_frees_own_slot() {
        let mut mux = Multiplexer::new();
        let old = shared("old");
        mux.enqueue(Arc::clone(&old));
        mux.free_slot(0);
        let new = shared("new");
        mux.enqueue(Arc::clone(&new));

        mux.disconnect(&old);
        assert_eq!(mux.slots(), vec![0]);
        assert!(Arc::ptr_eq(mux.get(0).unwrap(), &new));
    }
}
