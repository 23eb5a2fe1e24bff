//! Gamepad state model and the reducer that folds input messages into it.
//!
//! `GamepadState` is an immutable value: the reducer never mutates in place
//! but returns a fresh copy with the addressed field replaced. All numeric
//! fields are clamped to their domain range here, never by the transport, so
//! a hostile or buggy peer cannot push a stick past its physical range.

use serde::{Deserialize, Serialize};

use crate::wire::messages::{ButtonMessage, GamepadMessage, JoystickMessage, MotionMessage};

/// Tiered capability profile of a gamepad.
///
/// The layout gates which fields a [`GamepadMessage`] carries on the wire:
/// `Micro` pads only report A, X and the dpad, `Regular` adds the remaining
/// face buttons and triggers, `Extended` adds shoulders and both thumbsticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GamepadLayout {
    Micro,
    Regular,
    Extended,
}

impl GamepadLayout {
    /// Stable wire ordinal. Zero is deliberately unassigned so an
    /// all-zero buffer never decodes as a valid layout.
    pub fn raw_value(self) -> u16 {
        match self {
            GamepadLayout::Micro => 1,
            GamepadLayout::Regular => 2,
            GamepadLayout::Extended => 3,
        }
    }

    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(GamepadLayout::Micro),
            2 => Some(GamepadLayout::Regular),
            3 => Some(GamepadLayout::Extended),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonType {
    A,
    B,
    X,
    Y,
    LeftShoulder,
    RightShoulder,
    LeftTrigger,
    RightTrigger,
    /// Accepted but reserved; reducing a pause press has no state effect.
    Pause,
}

impl ButtonType {
    pub fn raw_value(self) -> u16 {
        match self {
            ButtonType::A => 0,
            ButtonType::B => 1,
            ButtonType::X => 2,
            ButtonType::Y => 3,
            ButtonType::LeftShoulder => 4,
            ButtonType::RightShoulder => 5,
            ButtonType::LeftTrigger => 6,
            ButtonType::RightTrigger => 7,
            ButtonType::Pause => 8,
        }
    }

    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(ButtonType::A),
            1 => Some(ButtonType::B),
            2 => Some(ButtonType::X),
            3 => Some(ButtonType::Y),
            4 => Some(ButtonType::LeftShoulder),
            5 => Some(ButtonType::RightShoulder),
            6 => Some(ButtonType::LeftTrigger),
            7 => Some(ButtonType::RightTrigger),
            8 => Some(ButtonType::Pause),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoystickType {
    Dpad,
    LeftThumbstick,
    RightThumbstick,
}

impl JoystickType {
    pub fn raw_value(self) -> u16 {
        match self {
            JoystickType::Dpad => 0,
            JoystickType::LeftThumbstick => 1,
            JoystickType::RightThumbstick => 2,
        }
    }

    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(JoystickType::Dpad),
            1 => Some(JoystickType::LeftThumbstick),
            2 => Some(JoystickType::RightThumbstick),
            _ => None,
        }
    }
}

/// Position of a two-axis input, each axis in [-1, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JoystickState {
    pub x_axis: f32,
    pub y_axis: f32,
}

impl JoystickState {
    pub fn new(x_axis: f32, y_axis: f32) -> Self {
        Self { x_axis, y_axis }
    }
}

/// Device-space acceleration vector, used by motion messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccelerationState {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Complete snapshot of one gamepad.
///
/// Buttons and triggers are floats in [0, 1]; sticks are [`JoystickState`]
/// values in [-1, 1] per axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GamepadState {
    pub layout: GamepadLayout,

    pub button_a: f32,
    pub button_b: f32,
    pub button_x: f32,
    pub button_y: f32,

    pub left_shoulder: f32,
    pub right_shoulder: f32,
    pub left_trigger: f32,
    pub right_trigger: f32,

    pub dpad: JoystickState,
    pub left_thumbstick: JoystickState,
    pub right_thumbstick: JoystickState,
}

impl GamepadState {
    /// A fully released pad of the given layout.
    pub fn new(layout: GamepadLayout) -> Self {
        Self {
            layout,
            button_a: 0.0,
            button_b: 0.0,
            button_x: 0.0,
            button_y: 0.0,
            left_shoulder: 0.0,
            right_shoulder: 0.0,
            left_trigger: 0.0,
            right_trigger: 0.0,
            dpad: JoystickState::default(),
            left_thumbstick: JoystickState::default(),
            right_thumbstick: JoystickState::default(),
        }
    }
}

/// Closed set of messages a gamepad actor can reduce.
///
/// Variants the reducer does not understand reduce to the unchanged state,
/// so new message kinds can be introduced without breaking older reducers.
#[derive(Clone, Debug, PartialEq)]
pub enum InputMessage {
    Button(ButtonMessage),
    Joystick(JoystickMessage),
    Motion(MotionMessage),
    Gamepad(GamepadMessage),
}

/// Pure reduction of one input message onto a gamepad snapshot.
pub fn gamepad_reducer(state: &GamepadState, message: &InputMessage) -> GamepadState {
    match message {
        InputMessage::Button(m) => {
            let value = m.value.clamp(0.0, 1.0);
            let mut next = *state;
            match m.button {
                ButtonType::A => next.button_a = value,
                ButtonType::B => next.button_b = value,
                ButtonType::X => next.button_x = value,
                ButtonType::Y => next.button_y = value,
                ButtonType::LeftShoulder => next.left_shoulder = value,
                ButtonType::RightShoulder => next.right_shoulder = value,
                ButtonType::LeftTrigger => next.left_trigger = value,
                ButtonType::RightTrigger => next.right_trigger = value,
                // Reserved: a pause press is an event for the host, not state.
                ButtonType::Pause => {}
            }
            next
        }
        InputMessage::Joystick(m) => {
            let stick = JoystickState::new(
                m.state.x_axis.clamp(-1.0, 1.0),
                m.state.y_axis.clamp(-1.0, 1.0),
            );
            let mut next = *state;
            match m.joystick {
                JoystickType::Dpad => next.dpad = stick,
                JoystickType::LeftThumbstick => next.left_thumbstick = stick,
                JoystickType::RightThumbstick => next.right_thumbstick = stick,
            }
            next
        }
        // Authoritative snapshot, e.g. decoded from a remote peer.
        InputMessage::Gamepad(m) => m.state,
        // Motion data is accepted but not folded into the gamepad state.
        InputMessage::Motion(_) => *state,
    }
}
