//! Physical gamepad source.
//!
//! Polls gilrs for device events and turns each physical pad into a
//! [`Controller`] fed through its input actor, so local hardware and remote
//! publishers drive the same state machinery. Connect/disconnect events go
//! to the owner, which typically adds the controllers to a browser roster
//! or a publisher.

use std::collections::HashMap;

use gilrs::{Axis, Button, EventType, Gilrs};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::controller::{ConnectionStatus, Controller};
use crate::gamepad::{ButtonType, GamepadLayout, InputMessage, JoystickState, JoystickType};
use crate::wire::messages::{ButtonMessage, JoystickMessage};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Failed to initialize the gamepad backend: {0}")]
    Initialization(String),
}

/// Physical device lifecycle notifications.
#[derive(Debug)]
pub enum SourceEvent {
    Connected(Controller),
    Disconnected(Controller),
}

#[derive(Clone, Copy, Debug)]
pub struct InputSourceSettings {
    /// Pause between polls of the device event queue.
    pub poll_interval_ms: u64,

    /// Stick movement below this magnitude is treated as rest.
    pub joystick_deadzone: f32,

    /// How long a detached pad may stay away before it is withdrawn,
    /// matching the session's treatment of dropped network peers.
    pub grace_period_ms: u64,
}

impl Default for InputSourceSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2,
            joystick_deadzone: 0.1,
            grace_period_ms: 12_000,
        }
    }
}

/// Handle to the polling task. Dropping it stops the task.
pub struct GilrsSource {
    shutdown: CancellationToken,
}

impl GilrsSource {
    /// Initializes the gamepad backend and starts polling. Pads already
    /// attached at startup are announced immediately.
    pub fn spawn(
        settings: InputSourceSettings,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<Self, InputError> {
        let gilrs = Gilrs::new().map_err(|e| InputError::Initialization(e.to_string()))?;
        info!("gamepad backend initialized, {} pads attached", gilrs.gamepads().count());

        let shutdown = CancellationToken::new();
        let task = SourceTask {
            gilrs,
            settings,
            events,
            pads: HashMap::new(),
        };
        tokio::spawn(task.run(shutdown.clone()));
        Ok(Self { shutdown })
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for GilrsSource {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Per-pad stick accumulator; gilrs reports one axis at a time but the
/// joystick messages carry both.
#[derive(Default)]
struct StickState {
    dpad: JoystickState,
    left: JoystickState,
    right: JoystickState,
}

struct Pad {
    controller: Controller,
    sticks: StickState,
    /// Set while the physical device is away; cleared on reattach.
    detached_at: Option<Instant>,
}

struct SourceTask {
    gilrs: Gilrs,
    settings: InputSourceSettings,
    events: mpsc::Sender<SourceEvent>,
    pads: HashMap<gilrs::GamepadId, Pad>,
}

impl SourceTask {
    async fn run(mut self, shutdown: CancellationToken) {
        let ids: Vec<_> = self.gilrs.gamepads().map(|(id, _)| id).collect();
        for id in ids {
            self.attach(id).await;
        }

        let poll_interval = std::time::Duration::from_millis(self.settings.poll_interval_ms);
        loop {
            while let Some(event) = self.gilrs.next_event() {
                self.handle_event(event.id, event.event).await;
            }
            self.sweep_detached().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
        debug!("gamepad polling task stopped");
    }

    async fn attach(&mut self, id: gilrs::GamepadId) {
        if let Some(pad) = self.pads.get_mut(&id) {
            // Back within the grace window; keep the same controller.
            pad.detached_at = None;
            pad.controller.set_status(ConnectionStatus::Connected);
            info!("gamepad {id} reattached");
            return;
        }
        let name = self.gilrs.gamepad(id).name().to_string();
        let controller = Controller::new(GamepadLayout::Extended);
        controller.set_name(Some(name.clone()));
        info!("gamepad '{name}' attached ({id})");
        self.pads.insert(
            id,
            Pad {
                controller: controller.clone(),
                sticks: StickState::default(),
                detached_at: None,
            },
        );
        if self.events.send(SourceEvent::Connected(controller)).await.is_err() {
            warn!("no consumer for gamepad events");
        }
    }

    fn detach(&mut self, id: gilrs::GamepadId) {
        if let Some(pad) = self.pads.get_mut(&id) {
            pad.controller.set_status(ConnectionStatus::Disconnected);
            pad.detached_at = Some(Instant::now());
            info!("gamepad {id} detached, grace period running");
        }
    }

    /// Withdraws pads whose grace window elapsed without a reattach.
    async fn sweep_detached(&mut self) {
        let grace = std::time::Duration::from_millis(self.settings.grace_period_ms);
        let expired: Vec<_> = self
            .pads
            .iter()
            .filter(|(_, pad)| {
                pad.detached_at
                    .is_some_and(|detached| detached.elapsed() >= grace)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(pad) = self.pads.remove(&id) {
                info!("gamepad {id} gone for good");
                let _ = self
                    .events
                    .send(SourceEvent::Disconnected(pad.controller))
                    .await;
            }
        }
    }

    async fn handle_event(&mut self, id: gilrs::GamepadId, event: EventType) {
        match event {
            EventType::Connected => self.attach(id).await,
            EventType::Disconnected => self.detach(id),
            EventType::ButtonPressed(button, _) => self.button(id, button, 1.0),
            EventType::ButtonReleased(button, _) => self.button(id, button, 0.0),
            EventType::ButtonChanged(button, value, _) => self.button(id, button, value),
            EventType::AxisChanged(axis, value, _) => self.axis(id, axis, value),
            other => trace!("ignoring gamepad event {other:?}"),
        }
    }

    fn button(&mut self, id: gilrs::GamepadId, button: Button, value: f32) {
        let Some(pad) = self.pads.get_mut(&id) else {
            return;
        };

        // The dpad arrives as buttons on most backends; fold it into the
        // dpad joystick instead.
        let dpad_axis = match button {
            Button::DPadUp => Some((false, value)),
            Button::DPadDown => Some((false, -value)),
            Button::DPadRight => Some((true, value)),
            Button::DPadLeft => Some((true, -value)),
            _ => None,
        };
        if let Some((horizontal, value)) = dpad_axis {
            if horizontal {
                pad.sticks.dpad.x_axis = value;
            } else {
                pad.sticks.dpad.y_axis = value;
            }
            let message = JoystickMessage {
                joystick: JoystickType::Dpad,
                state: pad.sticks.dpad,
            };
            pad.controller.input().send(InputMessage::Joystick(message));
            return;
        }

        let Some(button) = map_button(button) else {
            trace!("unmapped button {button:?}");
            return;
        };
        pad.controller
            .input()
            .send(InputMessage::Button(ButtonMessage { button, value }));
    }

    fn axis(&mut self, id: gilrs::GamepadId, axis: Axis, value: f32) {
        let Some(pad) = self.pads.get_mut(&id) else {
            return;
        };
        let value = apply_deadzone(value, self.settings.joystick_deadzone);

        let (joystick, state) = match axis {
            Axis::LeftStickX => {
                pad.sticks.left.x_axis = value;
                (JoystickType::LeftThumbstick, pad.sticks.left)
            }
            Axis::LeftStickY => {
                pad.sticks.left.y_axis = value;
                (JoystickType::LeftThumbstick, pad.sticks.left)
            }
            Axis::RightStickX => {
                pad.sticks.right.x_axis = value;
                (JoystickType::RightThumbstick, pad.sticks.right)
            }
            Axis::RightStickY => {
                pad.sticks.right.y_axis = value;
                (JoystickType::RightThumbstick, pad.sticks.right)
            }
            Axis::DPadX => {
                pad.sticks.dpad.x_axis = value;
                (JoystickType::Dpad, pad.sticks.dpad)
            }
            Axis::DPadY => {
                pad.sticks.dpad.y_axis = value;
                (JoystickType::Dpad, pad.sticks.dpad)
            }
            other => {
                trace!("unmapped axis {other:?}");
                return;
            }
        };
        pad.controller
            .input()
            .send(InputMessage::Joystick(JoystickMessage { joystick, state }));
    }
}

fn map_button(button: Button) -> Option<ButtonType> {
    match button {
        Button::South => Some(ButtonType::A),
        Button::East => Some(ButtonType::B),
        Button::West => Some(ButtonType::Y),
        Button::North => Some(ButtonType::X),
        Button::LeftTrigger => Some(ButtonType::LeftShoulder),
        Button::RightTrigger => Some(ButtonType::RightShoulder),
        Button::LeftTrigger2 => Some(ButtonType::LeftTrigger),
        Button::RightTrigger2 => Some(ButtonType::RightTrigger),
        Button::Start => Some(ButtonType::Pause),
        _ => None,
    }
}

/// Rescales a stick value so positions inside the deadzone read as zero
/// and the remaining range still spans [-1, 1].
fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        value.signum() * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}
