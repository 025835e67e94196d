//! Cursor-based binary reader/writer with a fixed byte order.
//!
//! Writers are allocated at their exact encoded size up front. The helpers
//! in this module ([`size_of_str`], [`size_of_bytes`], the `SIZE_*`
//! constants) compute that size deterministically. Writing past the end
//! is a framing-size bug and panics; reading past the end is a malformed
//! payload and returns [`BufferError::UnexpectedEnd`].
//!
//! ```text
//! string / bytes:  [u32 length][length bytes]
//! vec3:            [f32 x][f32 y][f32 z]
//! document:        [u32 length][UTF-8 JSON]
//! ```

use glam::Vec3;

use crate::half::{f16_bits_to_f32, f32_to_f16_bits};

/// Encoded width of a `u8`/`i8`/`bool`.
pub const SIZE_U8: usize = 1;
/// Encoded width of a `bool`.
pub const SIZE_BOOL: usize = 1;
/// Encoded width of a `u16`/`i16`.
pub const SIZE_U16: usize = 2;
/// Encoded width of a half-precision float.
pub const SIZE_F16: usize = 2;
/// Encoded width of a `u32`/`i32`/`f32`.
pub const SIZE_U32: usize = 4;
/// Encoded width of a `u64`/`i64`/`f64`.
pub const SIZE_U64: usize = 8;
/// Encoded width of a 3-component `f32` vector.
pub const SIZE_VEC3: usize = 12;

/// Encoded width of a length-prefixed UTF-8 string.
pub fn size_of_str(s: &str) -> usize {
    s.len() + SIZE_U32
}

/// Encoded width of a length-prefixed byte buffer.
pub fn size_of_bytes(bytes: &[u8]) -> usize {
    bytes.len() + SIZE_U32
}

/// Encoded width of a structured document payload.
pub fn size_of_document(doc: &serde_json::Value) -> usize {
    doc.to_string().len() + SIZE_U32
}

/// Byte order used by a [`BinaryBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Most significant byte first (network order).
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

/// Errors raised while reading from a [`BinaryBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The payload ended before the field was complete.
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left after the cursor.
        remaining: usize,
    },
    /// A boolean byte was neither 0 nor 1.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    /// A string field was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    /// A document field was not valid JSON.
    #[error("invalid document payload: {0}")]
    InvalidDocument(String),
}

/// A byte buffer with a read/write cursor and a fixed byte order.
#[derive(Debug, Clone)]
pub struct BinaryBuffer {
    data: Vec<u8>,
    cursor: usize,
    endian: Endian,
}

macro_rules! numeric_fields {
    ($($write:ident, $read:ident, $ty:ty;)*) => {
        $(
            #[doc = concat!("Writes a `", stringify!($ty), "` and advances the cursor.")]
            pub fn $write(&mut self, value: $ty) {
                let bytes = match self.endian {
                    Endian::Big => value.to_be_bytes(),
                    Endian::Little => value.to_le_bytes(),
                };
                self.put(&bytes);
            }

            #[doc = concat!("Reads a `", stringify!($ty), "` and advances the cursor.")]
            pub fn $read(&mut self) -> Result<$ty, BufferError> {
                const N: usize = std::mem::size_of::<$ty>();
                let raw = self.take_array::<N>()?;
                Ok(match self.endian {
                    Endian::Big => <$ty>::from_be_bytes(raw),
                    Endian::Little => <$ty>::from_le_bytes(raw),
                })
            }
        )*
    };
}

impl BinaryBuffer {
    /// Allocates a zero-filled big-endian writer of exactly `len` bytes.
    pub fn with_size(len: usize) -> Self {
        Self::with_size_and_endian(len, Endian::Big)
    }

    /// Allocates a zero-filled writer of exactly `len` bytes.
    pub fn with_size_and_endian(len: usize, endian: Endian) -> Self {
        Self {
            data: vec![0; len],
            cursor: 0,
            endian,
        }
    }

    /// Wraps received bytes for big-endian reading.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            cursor: 0,
            endian: Endian::Big,
        }
    }

    /// Copies a slice for big-endian reading.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_bytes(data.to_vec())
    }

    /// Returns this buffer with a different byte order.
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// The byte order fixed for this buffer.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor to an absolute offset.
    ///
    /// # Panics
    ///
    /// Panics if `offset` lies beyond the end of the buffer.
    pub fn seek(&mut self, offset: usize) {
        assert!(
            offset <= self.data.len(),
            "seek to {offset} beyond buffer of {} bytes",
            self.data.len()
        );
        self.cursor = offset;
    }

    /// Total buffer length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left between the cursor and the end.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// The whole underlying byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consumes a fully written buffer and returns its bytes.
    ///
    /// # Panics
    ///
    /// Panics if the cursor did not reach the end, which means the buffer
    /// was pre-sized larger than what was written.
    pub fn finish(self) -> Vec<u8> {
        assert_eq!(
            self.cursor,
            self.data.len(),
            "buffer pre-sized to {} bytes but {} were written",
            self.data.len(),
            self.cursor
        );
        self.data
    }

    /// Consumes the buffer regardless of cursor position.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    numeric_fields! {
        write_u8, read_u8, u8;
        write_i8, read_i8, i8;
        write_u16, read_u16, u16;
        write_i16, read_i16, i16;
        write_u32, read_u32, u32;
        write_i32, read_i32, i32;
        write_u64, read_u64, u64;
        write_i64, read_i64, i64;
        write_f32, read_f32, f32;
        write_f64, read_f64, f64;
    }

    /// Writes a half-precision float (2 bytes).
    pub fn write_f16(&mut self, value: f32) {
        self.write_u16(f32_to_f16_bits(value));
    }

    /// Reads a half-precision float (2 bytes) widened to `f32`.
    pub fn read_f16(&mut self) -> Result<f32, BufferError> {
        Ok(f16_bits_to_f32(self.read_u16()?))
    }

    /// Writes a boolean as a single 0/1 byte.
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Reads a boolean byte, rejecting anything other than 0 or 1.
    pub fn read_bool(&mut self) -> Result<bool, BufferError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(BufferError::InvalidBool(other)),
        }
    }

    /// Writes a length-prefixed byte buffer.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.put(bytes);
    }

    /// Reads a length-prefixed byte buffer.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, BufferError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, BufferError> {
        let len = self.read_u32()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| BufferError::InvalidUtf8)
    }

    /// Writes `s` into exactly `width` bytes, zero-padding the tail.
    ///
    /// # Panics
    ///
    /// Panics if `s` is longer than `width` bytes.
    pub fn write_fixed_str(&mut self, s: &str, width: usize) {
        assert!(
            s.len() <= width,
            "fixed string of {} bytes does not fit width {width}",
            s.len()
        );
        self.put(s.as_bytes());
        let pad = width - s.len();
        let end = self.cursor + pad;
        assert!(end <= self.data.len(), "fixed string padding overruns buffer");
        self.data[self.cursor..end].fill(0);
        self.cursor = end;
    }

    /// Reads a `width`-byte character sequence with trailing zeros removed.
    pub fn read_fixed_str(&mut self, width: usize) -> Result<String, BufferError> {
        let raw = self.take(width)?;
        let trimmed = match raw.iter().rposition(|&b| b != 0) {
            Some(last) => &raw[..=last],
            None => &[],
        };
        std::str::from_utf8(trimmed)
            .map(str::to_owned)
            .map_err(|_| BufferError::InvalidUtf8)
    }

    /// Writes three consecutive `f32` components.
    pub fn write_vec3(&mut self, v: Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    /// Reads three consecutive `f32` components.
    pub fn read_vec3(&mut self) -> Result<Vec3, BufferError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    /// Writes a free-form structured document.
    pub fn write_document(&mut self, doc: &serde_json::Value) {
        self.write_str(&doc.to_string());
    }

    /// Reads a free-form structured document.
    pub fn read_document(&mut self) -> Result<serde_json::Value, BufferError> {
        let raw = self.read_string()?;
        serde_json::from_str(&raw).map_err(|e| BufferError::InvalidDocument(e.to_string()))
    }

    /// Copies raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.put(bytes);
    }

    /// Returns every byte from the cursor to the end and advances past them.
    pub fn read_rest(&mut self) -> Vec<u8> {
        let rest = self.data[self.cursor..].to_vec();
        self.cursor = self.data.len();
        rest
    }

    fn put(&mut self, bytes: &[u8]) {
        let end = self.cursor + bytes.len();
        assert!(
            end <= self.data.len(),
            "write of {} bytes at offset {} overruns buffer of {} bytes",
            bytes.len(),
            self.cursor,
            self.data.len()
        );
        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
    }

    fn take(&mut self, len: usize) -> Result<&[u8], BufferError> {
        if len > self.remaining() {
            return Err(BufferError::UnexpectedEnd {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&self.data[start..self.cursor])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        let raw = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(raw);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order_is_big_endian() {
        let mut buf = BinaryBuffer::with_size(SIZE_U32);
        buf.write_u32(0x0102_0304);
        assert_eq!(buf.finish(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_little_endian_flag() {
        let mut buf = BinaryBuffer::with_size_and_endian(SIZE_U16, Endian::Little);
        buf.write_u16(0xabcd);
        let bytes = buf.finish();
        assert_eq!(bytes, vec![0xcd, 0xab]);

        let mut reader = BinaryBuffer::from_bytes(bytes).with_endian(Endian::Little);
        assert_eq!(reader.read_u16().unwrap(), 0xabcd);
    }

    #[test]
    fn test_mixed_fields_sequential() {
        let name = "stone#default";
        let payload = [9u8, 8, 7];
        let size = SIZE_U8
            + SIZE_U16
            + SIZE_U32
            + SIZE_U64
            + SIZE_U32
            + SIZE_U64
            + SIZE_BOOL
            + SIZE_F16
            + size_of_str(name)
            + size_of_bytes(&payload)
            + SIZE_VEC3
            + 8;
        let mut buf = BinaryBuffer::with_size(size);
        buf.write_u8(u8::MAX);
        buf.write_i16(i16::MIN);
        buf.write_i32(-123_456);
        buf.write_u64(u64::MAX);
        buf.write_f32(1.5);
        buf.write_f64(-0.25);
        buf.write_bool(true);
        buf.write_f16(0.5);
        buf.write_str(name);
        buf.write_bytes(&payload);
        buf.write_vec3(Vec3::new(1.0, -2.0, 3.5));
        buf.write_fixed_str("abc", 8);
        let bytes = buf.finish();
        assert_eq!(bytes.len(), size);

        let mut r = BinaryBuffer::from_bytes(bytes);
        assert_eq!(r.read_u8().unwrap(), u8::MAX);
        assert_eq!(r.read_i16().unwrap(), i16::MIN);
        assert_eq!(r.read_i32().unwrap(), -123_456);
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_f64().unwrap(), -0.25);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_f16().unwrap(), 0.5);
        assert_eq!(r.read_string().unwrap(), name);
        assert_eq!(r.read_bytes().unwrap(), payload);
        assert_eq!(r.read_vec3().unwrap(), Vec3::new(1.0, -2.0, 3.5));
        assert_eq!(r.read_fixed_str(8).unwrap(), "abc");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_empty_string_and_buffer() {
        let mut buf = BinaryBuffer::with_size(size_of_str("") + size_of_bytes(&[]));
        buf.write_str("");
        buf.write_bytes(&[]);
        let mut r = BinaryBuffer::from_bytes(buf.finish());
        assert_eq!(r.read_string().unwrap(), "");
        assert!(r.read_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_utf8_size_uses_byte_length() {
        let s = "grüne#blöcke";
        assert_eq!(size_of_str(s), s.len() + 4);
        assert!(s.len() > s.chars().count());
        let mut buf = BinaryBuffer::with_size(size_of_str(s));
        buf.write_str(s);
        let mut r = BinaryBuffer::from_bytes(buf.finish());
        assert_eq!(r.read_string().unwrap(), s);
    }

    #[test]
    fn test_document_payload() {
        let doc = serde_json::json!({"button": "craft", "slots": [1, 2, 3]});
        let mut buf = BinaryBuffer::with_size(size_of_document(&doc));
        buf.write_document(&doc);
        let mut r = BinaryBuffer::from_bytes(buf.finish());
        assert_eq!(r.read_document().unwrap(), doc);
    }

    #[test]
    fn test_truncated_read_is_error() {
        let mut r = BinaryBuffer::from_slice(&[0, 0, 0, 10, 1, 2]);
        let err = r.read_bytes().unwrap_err();
        assert_eq!(
            err,
            BufferError::UnexpectedEnd {
                needed: 10,
                remaining: 2
            }
        );
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let mut r = BinaryBuffer::from_slice(&[2]);
        assert_eq!(r.read_bool(), Err(BufferError::InvalidBool(2)));
    }

    #[test]
    #[should_panic(expected = "overruns buffer")]
    fn test_write_past_end_panics() {
        let mut buf = BinaryBuffer::with_size(3);
        buf.write_u32(1);
    }

    #[test]
    #[should_panic(expected = "pre-sized")]
    fn test_finish_requires_exact_size() {
        let mut buf = BinaryBuffer::with_size(8);
        buf.write_u32(1);
        let _ = buf.finish();
    }
}
