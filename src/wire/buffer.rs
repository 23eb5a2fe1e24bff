use tracing::trace;

/// Growable byte buffer for encoding wire messages.
///
/// All fixed-width numerics are written little-endian regardless of the host
/// byte order, so buffers produced on one machine decode identically on any
/// other.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    data: Vec<u8>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Writes a string as raw UTF-8 bytes, without a length prefix.
    pub fn write_str(&mut self, value: &str) {
        self.data.extend_from_slice(value.as_bytes());
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Cursor over a received byte slice for decoding wire messages.
///
/// Every read is total over the buffer length: reading past the end yields
/// `None` instead of panicking, which lets callers treat truncated required
/// fields as a decode failure and absent optional tails as defaults.
#[derive(Debug)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ReadBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.remaining() < N {
            trace!(
                "read of {} bytes with only {} remaining",
                N,
                self.remaining()
            );
            return None;
        }
        let mut chunk = [0u8; N];
        chunk.copy_from_slice(&self.data[self.offset..self.offset + N]);
        self.offset += N;
        Some(chunk)
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    pub fn read_i16(&mut self) -> Option<i16> {
        self.take::<2>().map(i16::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.take::<4>().map(i32::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Option<i64> {
        self.take::<8>().map(i64::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Option<f32> {
        self.take::<4>().map(f32::from_le_bytes)
    }

    pub fn read_f64(&mut self) -> Option<f64> {
        self.take::<8>().map(f64::from_le_bytes)
    }

    /// Consumes all remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.offset..];
        self.offset = self.data.len();
        rest
    }

    /// Consumes all remaining bytes as a UTF-8 string.
    ///
    /// Returns `None` on invalid UTF-8; the bytes are consumed either way.
    pub fn read_rest_str(&mut self) -> Option<String> {
        let rest = self.read_rest();
        std::str::from_utf8(rest).ok().map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_little_endian() {
        let mut buffer = WriteBuffer::new();
        buffer.write_u16(0x0102);
        buffer.write_u32(0x01020304);
        assert_eq!(buffer.as_slice(), &[0x02, 0x01, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn round_trips_signed_and_unsigned() {
        let mut buffer = WriteBuffer::new();
        buffer.write_i16(-12345);
        buffer.write_i32(-123456789);
        buffer.write_i64(i64::MIN);
        buffer.write_u64(u64::MAX);

        let bytes = buffer.into_vec();
        let mut reader = ReadBuffer::new(&bytes);
        assert_eq!(reader.read_i16(), Some(-12345));
        assert_eq!(reader.read_i32(), Some(-123456789));
        assert_eq!(reader.read_i64(), Some(i64::MIN));
        assert_eq!(reader.read_u64(), Some(u64::MAX));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn float_round_trip_is_bit_exact() {
        for value in [0.0f32, -0.0, f32::NAN, f32::INFINITY, 1.5e-40] {
            let mut buffer = WriteBuffer::new();
            buffer.write_f32(value);
            let bytes = buffer.into_vec();
            let decoded = ReadBuffer::new(&bytes).read_f32().unwrap();
            assert_eq!(value.to_bits(), decoded.to_bits());
        }

        let mut buffer = WriteBuffer::new();
        buffer.write_f64(f64::NAN);
        let bytes = buffer.into_vec();
        let decoded = ReadBuffer::new(&bytes).read_f64().unwrap();
        assert_eq!(f64::NAN.to_bits(), decoded.to_bits());
    }

    #[test]
    fn short_reads_return_none() {
        let bytes = [0x01u8, 0x02, 0x03];
        let mut reader = ReadBuffer::new(&bytes);
        assert_eq!(reader.read_u16(), Some(0x0201));
        assert_eq!(reader.read_u16(), None);
        // The failed read must not consume the remaining byte.
        assert_eq!(reader.remaining(), 1);
    }

    #[test]
    fn rest_string_rejects_invalid_utf8() {
        let bytes = [0xff, 0xfe, 0xfd];
        let mut reader = ReadBuffer::new(&bytes);
        assert_eq!(reader.read_rest_str(), None);
        assert_eq!(reader.remaining(), 0);
    }
}
