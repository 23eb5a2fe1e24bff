//! Message definitions and their wire codecs.
//!
//! There is no message-type tag on the wire: the channel a payload arrives on
//! determines its type, so each codec starts directly with the message's own
//! leading field. Decoding is total over the buffer length. A required field
//! that is truncated or a discriminant that matches no known ordinal yields
//! `None`; optional trailing fields simply default when absent.

use crate::gamepad::{
    AccelerationState, ButtonType, GamepadLayout, GamepadState, JoystickState, JoystickType,
};
use crate::wire::{ReadBuffer, Wire, WriteBuffer};

/// Protocol version announced in [`ControllerConnectedMessage`].
///
/// Carried for future compatibility negotiation; receivers currently record
/// it without enforcing anything.
pub const PROTOCOL_VERSION: u16 = 1;

/// Live value of one button, sent per input event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ButtonMessage {
    pub button: ButtonType,
    pub value: f32,
}

impl Wire for ButtonMessage {
    fn encode_to(&self, buffer: &mut WriteBuffer) {
        buffer.write_u16(self.button.raw_value());
        buffer.write_f32(self.value);
    }

    fn decode(buffer: &mut ReadBuffer<'_>) -> Option<Self> {
        let button = ButtonType::from_raw(buffer.read_u16()?)?;
        let value = buffer.read_f32()?;
        Some(Self { button, value })
    }
}

/// Live position of one joystick, sent per input event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JoystickMessage {
    pub joystick: JoystickType,
    pub state: JoystickState,
}

impl Wire for JoystickMessage {
    fn encode_to(&self, buffer: &mut WriteBuffer) {
        buffer.write_u16(self.joystick.raw_value());
        buffer.write_f32(self.state.x_axis);
        buffer.write_f32(self.state.y_axis);
    }

    fn decode(buffer: &mut ReadBuffer<'_>) -> Option<Self> {
        let joystick = JoystickType::from_raw(buffer.read_u16()?)?;
        let x_axis = buffer.read_f32()?;
        let y_axis = buffer.read_f32()?;
        Some(Self {
            joystick,
            state: JoystickState::new(x_axis, y_axis),
        })
    }
}

/// Device motion sample. Not serialized; local sensor sources only.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionMessage {
    pub gravity: AccelerationState,
    pub acceleration: AccelerationState,
}

/// Full gamepad snapshot, the per-frame payload of the unreliable channel.
///
/// Variable length, gated by the leading layout discriminant: only the
/// fields the layout defines are written, and a decoder treats fields
/// missing from the tail as released rather than as an error. This lets
/// smaller layouts send shorter packets and older peers interoperate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GamepadMessage {
    pub state: GamepadState,
}

impl Wire for GamepadMessage {
    fn encode_to(&self, buffer: &mut WriteBuffer) {
        let state = &self.state;
        buffer.write_u16(state.layout.raw_value());
        buffer.write_f32(state.button_a);
        buffer.write_f32(state.button_x);
        buffer.write_f32(state.dpad.x_axis);
        buffer.write_f32(state.dpad.y_axis);

        if state.layout != GamepadLayout::Micro {
            buffer.write_f32(state.button_b);
            buffer.write_f32(state.button_y);
            buffer.write_f32(state.left_trigger);
            buffer.write_f32(state.right_trigger);
        }

        if state.layout == GamepadLayout::Extended {
            buffer.write_f32(state.left_shoulder);
            buffer.write_f32(state.right_shoulder);
            buffer.write_f32(state.left_thumbstick.x_axis);
            buffer.write_f32(state.left_thumbstick.y_axis);
            buffer.write_f32(state.right_thumbstick.x_axis);
            buffer.write_f32(state.right_thumbstick.y_axis);
        }
    }

    fn decode(buffer: &mut ReadBuffer<'_>) -> Option<Self> {
        let layout = GamepadLayout::from_raw(buffer.read_u16()?)?;
        let mut state = GamepadState::new(layout);
        state.button_a = buffer.read_f32()?;
        state.button_x = buffer.read_f32()?;
        let dpad_x = buffer.read_f32()?;
        let dpad_y = buffer.read_f32()?;
        state.dpad = JoystickState::new(dpad_x, dpad_y);

        if layout != GamepadLayout::Micro {
            state.button_b = buffer.read_f32().unwrap_or(0.0);
            state.button_y = buffer.read_f32().unwrap_or(0.0);
            state.left_trigger = buffer.read_f32().unwrap_or(0.0);
            state.right_trigger = buffer.read_f32().unwrap_or(0.0);
        }

        if layout == GamepadLayout::Extended {
            state.left_shoulder = buffer.read_f32().unwrap_or(0.0);
            state.right_shoulder = buffer.read_f32().unwrap_or(0.0);
            state.left_thumbstick = JoystickState::new(
                buffer.read_f32().unwrap_or(0.0),
                buffer.read_f32().unwrap_or(0.0),
            );
            state.right_thumbstick = JoystickState::new(
                buffer.read_f32().unwrap_or(0.0),
                buffer.read_f32().unwrap_or(0.0),
            );
        }

        Some(Self { state })
    }
}

/// Rename of an already-connected controller.
///
/// The name is the entire remaining buffer as raw UTF-8; an absent name
/// encodes as zero bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerNameMessage {
    pub name: Option<String>,
}

impl Wire for ControllerNameMessage {
    fn encode_to(&self, buffer: &mut WriteBuffer) {
        if let Some(name) = &self.name {
            buffer.write_str(name);
        }
    }

    fn decode(buffer: &mut ReadBuffer<'_>) -> Option<Self> {
        if buffer.remaining() == 0 {
            return Some(Self { name: None });
        }
        let name = buffer.read_rest_str()?;
        Some(Self { name: Some(name) })
    }
}

/// Announcement of a controller joining the session, sent on the reliable
/// channel. The trailing name is optional; a name that fails UTF-8
/// validation is dropped without failing the whole message.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConnectedMessage {
    pub index: u16,
    pub layout: GamepadLayout,
    pub version: u16,
    pub name: Option<String>,
}

impl ControllerConnectedMessage {
    pub fn new(index: u16, layout: GamepadLayout, name: Option<String>) -> Self {
        Self {
            index,
            layout,
            version: PROTOCOL_VERSION,
            name,
        }
    }
}

impl Wire for ControllerConnectedMessage {
    fn encode_to(&self, buffer: &mut WriteBuffer) {
        buffer.write_u16(self.index);
        buffer.write_u16(self.layout.raw_value());
        buffer.write_u16(self.version);
        if let Some(name) = &self.name {
            buffer.write_str(name);
        }
    }

    fn decode(buffer: &mut ReadBuffer<'_>) -> Option<Self> {
        let index = buffer.read_u16()?;
        let layout = GamepadLayout::from_raw(buffer.read_u16()?)?;
        let version = buffer.read_u16()?;
        let name = if buffer.remaining() > 0 {
            buffer.read_rest_str()
        } else {
            None
        };
        Some(Self {
            index,
            layout,
            version,
            name,
        })
    }
}

/// Explicit removal of a controller from the session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControllerDisconnectedMessage {
    pub index: u16,
}

impl Wire for ControllerDisconnectedMessage {
    fn encode_to(&self, buffer: &mut WriteBuffer) {
        buffer.write_u16(self.index);
    }

    fn decode(buffer: &mut ReadBuffer<'_>) -> Option<Self> {
        let index = buffer.read_u16()?;
        Some(Self { index })
    }
}

/// Envelope addressing a message to one controller of a multi-pad peer.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkMessage<T> {
    pub controller_index: u16,
    pub message: T,
}

impl<T> NetworkMessage<T> {
    pub fn new(controller_index: u16, message: T) -> Self {
        Self {
            controller_index,
            message,
        }
    }
}

impl<T: Wire> Wire for NetworkMessage<T> {
    fn encode_to(&self, buffer: &mut WriteBuffer) {
        buffer.write_u16(self.controller_index);
        self.message.encode_to(buffer);
    }

    fn decode(buffer: &mut ReadBuffer<'_>) -> Option<Self> {
        let controller_index = buffer.read_u16()?;
        let message = T::decode(buffer)?;
        Some(Self {
            controller_index,
            message,
        })
    }
}

/// TXT record key under which the unreliable channel's port is advertised.
pub const TXT_INPUT_PORT_KEY: &str = "INPUT_PORT";

/// DNS-TXT-style record advertising the UDP input port out-of-band.
///
/// Encoded as length-prefixed `KEY=value` entries so it can be embedded
/// directly in a service advertisement's TXT data by the discovery
/// collaborator. The port value is its two little-endian bytes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TxtRecord {
    pub input_port: u16,
}

impl TxtRecord {
    pub fn new(input_port: u16) -> Self {
        Self { input_port }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut entry = Vec::with_capacity(TXT_INPUT_PORT_KEY.len() + 3);
        entry.extend_from_slice(TXT_INPUT_PORT_KEY.as_bytes());
        entry.push(b'=');
        entry.extend_from_slice(&self.input_port.to_le_bytes());

        let mut record = Vec::with_capacity(entry.len() + 1);
        record.push(entry.len() as u8);
        record.extend_from_slice(&entry);
        record
    }

    /// Scans the record's entries for the input-port key.
    ///
    /// Returns `None` when the key is missing, the value is malformed, or
    /// the port is zero (an unbound socket cannot be advertised).
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut rest = bytes;
        while let Some((&len, tail)) = rest.split_first() {
            let len = len as usize;
            if tail.len() < len {
                return None;
            }
            let (entry, tail) = tail.split_at(len);
            rest = tail;

            if let Some(value) = entry.strip_prefix(b"INPUT_PORT=") {
                if value.len() != 2 {
                    return None;
                }
                let port = u16::from_le_bytes([value[0], value[1]]);
                return if port == 0 { None } else { Some(Self { input_port: port }) };
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_message_round_trip() {
        let message = ButtonMessage {
            button: ButtonType::Y,
            value: 0.5135,
        };
        assert_eq!(ButtonMessage::decode_bytes(&message.encode()), Some(message));
    }

    #[test]
    fn button_message_unknown_discriminant_fails() {
        let mut buffer = WriteBuffer::new();
        buffer.write_u16(100);
        buffer.write_f32(0.5);
        assert_eq!(ButtonMessage::decode_bytes(buffer.as_slice()), None);
    }

    #[test]
    fn button_message_truncated_value_fails() {
        let mut buffer = WriteBuffer::new();
        buffer.write_u16(ButtonType::A.raw_value());
        buffer.write_bytes(&[0x00, 0x00]);
        assert_eq!(ButtonMessage::decode_bytes(buffer.as_slice()), None);
    }

    #[test]
    fn joystick_message_round_trip() {
        let message = JoystickMessage {
            joystick: JoystickType::RightThumbstick,
            state: JoystickState::new(0.315, -0.999991),
        };
        assert_eq!(
            JoystickMessage::decode_bytes(&message.encode()),
            Some(message)
        );
    }

    #[test]
    fn joystick_message_unknown_discriminant_fails() {
        let mut buffer = WriteBuffer::new();
        buffer.write_u16(5);
        buffer.write_f32(0.5);
        buffer.write_f32(-0.5);
        assert_eq!(JoystickMessage::decode_bytes(buffer.as_slice()), None);
    }

    #[test]
    fn gamepad_message_round_trip_extended() {
        let mut state = GamepadState::new(GamepadLayout::Extended);
        state.button_a = 0.4;
        state.button_x = 0.7;
        state.button_b = 0.31;
        state.button_y = 0.45;
        state.left_shoulder = 0.73;
        state.right_shoulder = 0.83;
        state.left_trigger = 0.93;
        state.right_trigger = 0.14;
        state.dpad = JoystickState::new(0.41, -0.13);
        state.left_thumbstick = JoystickState::new(0.62, -0.01);
        state.right_thumbstick = JoystickState::new(0.59, -0.93);

        let message = GamepadMessage { state };
        assert_eq!(
            GamepadMessage::decode_bytes(&message.encode()),
            Some(message)
        );
    }

    #[test]
    fn gamepad_message_micro_encodes_only_its_tier() {
        let mut state = GamepadState::new(GamepadLayout::Micro);
        state.button_a = 1.0;
        state.dpad = JoystickState::new(-1.0, 0.5);
        // Fields above the declared layout are never written.
        state.button_b = 0.7;

        let bytes = GamepadMessage { state }.encode();
        assert_eq!(bytes.len(), 2 + 4 * 4);

        let decoded = GamepadMessage::decode_bytes(&bytes).unwrap();
        assert_eq!(decoded.state.button_a, 1.0);
        assert_eq!(decoded.state.dpad, JoystickState::new(-1.0, 0.5));
        assert_eq!(decoded.state.button_b, 0.0);
        assert_eq!(decoded.state.left_trigger, 0.0);
        assert_eq!(decoded.state.right_thumbstick, JoystickState::default());
    }

    #[test]
    fn gamepad_message_short_regular_tail_defaults_to_zero() {
        // A Regular header with only the required Micro-tier fields present.
        let mut buffer = WriteBuffer::new();
        buffer.write_u16(GamepadLayout::Regular.raw_value());
        buffer.write_f32(0.25);
        buffer.write_f32(0.5);
        buffer.write_f32(0.75);
        buffer.write_f32(-0.75);

        let decoded = GamepadMessage::decode_bytes(buffer.as_slice()).unwrap();
        assert_eq!(decoded.state.layout, GamepadLayout::Regular);
        assert_eq!(decoded.state.button_a, 0.25);
        assert_eq!(decoded.state.button_b, 0.0);
        assert_eq!(decoded.state.right_trigger, 0.0);
    }

    #[test]
    fn gamepad_message_unknown_layout_fails() {
        let mut buffer = WriteBuffer::new();
        buffer.write_u16(9);
        for _ in 0..4 {
            buffer.write_f32(0.0);
        }
        assert_eq!(GamepadMessage::decode_bytes(buffer.as_slice()), None);
    }

    #[test]
    fn name_message_round_trip() {
        let message = ControllerNameMessage {
            name: Some("player one".to_owned()),
        };
        assert_eq!(
            ControllerNameMessage::decode_bytes(&message.encode()),
            Some(message)
        );

        let empty = ControllerNameMessage { name: None };
        assert_eq!(
            ControllerNameMessage::decode_bytes(&empty.encode()),
            Some(empty)
        );
    }

    #[test]
    fn name_message_invalid_utf8_fails() {
        assert_eq!(ControllerNameMessage::decode_bytes(&[0xff, 0xfe]), None);
    }

    #[test]
    fn connected_message_round_trip() {
        let message =
            ControllerConnectedMessage::new(3, GamepadLayout::Extended, Some("pad".to_owned()));
        assert_eq!(
            ControllerConnectedMessage::decode_bytes(&message.encode()),
            Some(message)
        );

        let unnamed = ControllerConnectedMessage::new(0, GamepadLayout::Micro, None);
        assert_eq!(
            ControllerConnectedMessage::decode_bytes(&unnamed.encode()),
            Some(unnamed)
        );
    }

    #[test]
    fn connected_message_unknown_layout_fails() {
        let mut buffer = WriteBuffer::new();
        buffer.write_u16(1);
        buffer.write_u16(17);
        buffer.write_u16(PROTOCOL_VERSION);
        assert_eq!(
            ControllerConnectedMessage::decode_bytes(buffer.as_slice()),
            None
        );
    }

    #[test]
    fn disconnected_message_round_trip() {
        let message = ControllerDisconnectedMessage { index: 2 };
        assert_eq!(
            ControllerDisconnectedMessage::decode_bytes(&message.encode()),
            Some(message)
        );
        assert_eq!(ControllerDisconnectedMessage::decode_bytes(&[0x01]), None);
    }

    #[test]
    fn network_envelope_round_trip() {
        let message = NetworkMessage::new(
            7,
            ButtonMessage {
                button: ButtonType::B,
                value: 0.25,
            },
        );
        assert_eq!(
            NetworkMessage::<ButtonMessage>::decode_bytes(&message.encode()),
            Some(message)
        );
    }

    #[test]
    fn network_envelope_fails_when_inner_fails() {
        let mut buffer = WriteBuffer::new();
        buffer.write_u16(7);
        buffer.write_u16(100); // unknown button ordinal
        buffer.write_f32(0.25);
        assert_eq!(
            NetworkMessage::<ButtonMessage>::decode_bytes(buffer.as_slice()),
            None
        );
    }

    #[test]
    fn txt_record_round_trip() {
        let record = TxtRecord::new(40123);
        assert_eq!(TxtRecord::decode(&record.encode()), Some(record));
    }

    #[test]
    fn txt_record_rejects_zero_port_and_missing_key() {
        assert_eq!(TxtRecord::decode(&TxtRecord::new(0).encode()), None);

        let mut other = vec![9u8];
        other.extend_from_slice(b"OTHER=yes");
        assert_eq!(TxtRecord::decode(&other), None);
        assert_eq!(TxtRecord::decode(&[]), None);
    }
}
