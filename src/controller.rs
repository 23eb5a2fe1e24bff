//! One roster entry per physical or remote gamepad.
//!
//! A [`Controller`] bundles the actor that serializes its input with watch
//! channels mirroring its name, connection status and gamepad snapshot.
//! Other tasks (UI layers, forwarders) read those mirrors instead of any
//! shared mutable state; the owning session is the only mutator.

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::actor::{Actor, Subscription};
use crate::gamepad::{gamepad_reducer, GamepadLayout, GamepadState, InputMessage};

/// Connection lifecycle of a controller as seen by the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    #[default]
    Connected,
}

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(0);

/// Handle to one gamepad. Cloning shares the underlying state.
#[derive(Clone)]
pub struct Controller {
    id: u64,
    index: Arc<AtomicU16>,
    name: Arc<watch::Sender<Option<String>>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    input: Actor<GamepadState, InputMessage>,
}

impl Controller {
    /// Creates a controller with a fresh input actor driving the gamepad
    /// reducer. Must be called from within a tokio runtime.
    pub fn new(layout: GamepadLayout) -> Self {
        Self {
            id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
            index: Arc::new(AtomicU16::new(0)),
            name: Arc::new(watch::channel(None).0),
            status: Arc::new(watch::channel(ConnectionStatus::Connected).0),
            input: Actor::spawn(GamepadState::new(layout), gamepad_reducer),
        }
    }

    /// Process-unique identity, stable across index reassignment.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Position in the session roster, kept dense 0..N-1 by the session.
    pub fn index(&self) -> u16 {
        self.index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_index(&self, index: u16) {
        self.index.store(index, Ordering::Relaxed);
    }

    pub fn name(&self) -> Option<String> {
        self.name.borrow().clone()
    }

    /// Updates the name, notifying watchers only on an actual change.
    pub fn set_name(&self, name: Option<String>) {
        self.name.send_if_modified(|current| {
            if *current == name {
                false
            } else {
                *current = name;
                true
            }
        });
    }

    pub fn watch_name(&self) -> watch::Receiver<Option<String>> {
        self.name.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// The actor serializing this controller's input messages.
    pub fn input(&self) -> &Actor<GamepadState, InputMessage> {
        &self.input
    }

    /// Snapshot of the current gamepad state.
    pub fn state(&self) -> GamepadState {
        self.input.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<GamepadState> {
        self.input.watch()
    }

    pub fn layout(&self) -> GamepadLayout {
        self.input.state().layout
    }

    /// Convenience for observers of the raw state actor.
    pub fn observe(&self, observer: impl Fn(&GamepadState) + Send + 'static) -> Subscription {
        self.input.observe(observer)
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("index", &self.index())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamepad::{ButtonType, JoystickState, JoystickType};
    use crate::wire::messages::{ButtonMessage, JoystickMessage};
    use tokio::sync::oneshot;

    fn dpad(x: f32, y: f32) -> InputMessage {
        InputMessage::Joystick(JoystickMessage {
            joystick: JoystickType::Dpad,
            state: JoystickState::new(x, y),
        })
    }

    #[tokio::test]
    async fn state_mirror_follows_input_messages() {
        let controller = Controller::new(GamepadLayout::Extended);
        let mut state_rx = controller.watch_state();

        controller.input().send(InputMessage::Button(ButtonMessage {
            button: ButtonType::A,
            value: 0.56,
        }));
        controller.input().send(dpad(0.31, 0.71));

        let (done_tx, done_rx) = oneshot::channel();
        controller
            .input()
            .send_with(dpad(0.31, 0.71), move |state| {
                let _ = done_tx.send(state);
            });
        let final_state = done_rx.await.unwrap();

        assert_eq!(final_state.button_a, 0.56);
        assert_eq!(final_state.dpad, JoystickState::new(0.31, 0.71));

        state_rx.changed().await.unwrap();
        assert_eq!(state_rx.borrow_and_update().button_a, 0.56);
    }

    #[tokio::test]
    async fn name_change_notifies_watchers_once() {
        let controller = Controller::new(GamepadLayout::Regular);
        let mut name_rx = controller.watch_name();

        controller.set_name(Some("fancy new name".to_owned()));
        name_rx.changed().await.unwrap();
        assert_eq!(
            name_rx.borrow_and_update().as_deref(),
            Some("fancy new name")
        );

        // Re-setting the same name must not wake watchers.
        controller.set_name(Some("fancy new name".to_owned()));
        assert!(!name_rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn status_transitions_are_deduplicated() {
        let controller = Controller::new(GamepadLayout::Regular);
        assert_eq!(controller.status(), ConnectionStatus::Connected);

        let mut status_rx = controller.watch_status();
        controller.set_status(ConnectionStatus::Disconnected);
        controller.set_status(ConnectionStatus::Disconnected);

        status_rx.changed().await.unwrap();
        assert_eq!(
            *status_rx.borrow_and_update(),
            ConnectionStatus::Disconnected
        );
        assert!(!status_rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn controllers_have_distinct_ids() {
        let a = Controller::new(GamepadLayout::Micro);
        let b = Controller::new(GamepadLayout::Micro);
        assert_ne!(a.id(), b.id());
    }
}
