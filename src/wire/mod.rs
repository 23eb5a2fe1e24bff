//! Compact binary wire format for controller state and control messages.
//!
//! The codec is deliberately minimal: fixed-width little-endian numerics,
//! no self-describing framing, no allocation-heavy schemas. What a payload
//! means is decided by the channel it travels on (see the transport module),
//! which keeps the per-frame gamepad packets small enough to send on every
//! input event.
//!
//! Decoding is total: arbitrary bytes can be thrown at any decoder and the
//! worst outcome is `None`.

pub mod buffer;
pub mod messages;

pub use buffer::{ReadBuffer, WriteBuffer};

/// A value with a binary wire representation.
pub trait Wire: Sized {
    fn encode_to(&self, buffer: &mut WriteBuffer);

    fn decode(buffer: &mut ReadBuffer<'_>) -> Option<Self>;

    fn encode(&self) -> Vec<u8> {
        let mut buffer = WriteBuffer::new();
        self.encode_to(&mut buffer);
        buffer.into_vec()
    }

    fn decode_bytes(bytes: &[u8]) -> Option<Self> {
        let mut buffer = ReadBuffer::new(bytes);
        Self::decode(&mut buffer)
    }
}
