//! CA message headers.
//!
//! Every CA message starts with a 16-byte fixed header. When a payload or an
//! element count does not fit the fixed header's 16-bit fields, both fields
//! carry the sentinel [`EXTENDED_SENTINEL`] and an 8-byte extension follows
//! with the real 32-bit values. All fields are big-endian.

use bytes::{BufMut, BytesMut};

/// Size of the fixed header in bytes.
pub const FIXED_HEADER_SIZE: usize = 16;

/// Size of the extended header (fixed header + 32-bit size/count extension).
pub const EXTENDED_HEADER_SIZE: usize = 24;

/// Sentinel in the 16-bit `payload_size`/`data_count` fields marking an
/// extended header.
pub const EXTENDED_SENTINEL: u16 = 0xFFFF;

/// Round `n` up to the next multiple of 8.
///
/// CA payloads are zero-padded to 8-byte alignment; the padding is not
/// included in `payload_size`.
pub const fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

/// A decoded CA message header.
///
/// `payload_size` and `data_count` are stored at full width; whether the
/// header serializes in fixed or extended form is derived from their values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub command: u16,
    pub payload_size: u32,
    pub data_type: u16,
    pub data_count: u32,
    pub param1: u32,
    pub param2: u32,
}

impl MessageHeader {
    pub fn new(
        command: u16,
        payload_size: u32,
        data_type: u16,
        data_count: u32,
        param1: u32,
        param2: u32,
    ) -> Self {
        Self {
            command,
            payload_size,
            data_type,
            data_count,
            param1,
            param2,
        }
    }

    /// Whether this header must serialize in extended form.
    pub fn is_extended(&self) -> bool {
        self.payload_size >= u32::from(EXTENDED_SENTINEL)
            || self.data_count >= u32::from(EXTENDED_SENTINEL)
    }

    /// Serialized length: [`FIXED_HEADER_SIZE`] or [`EXTENDED_HEADER_SIZE`].
    pub fn encoded_len(&self) -> usize {
        if self.is_extended() {
            EXTENDED_HEADER_SIZE
        } else {
            FIXED_HEADER_SIZE
        }
    }

    /// Append the big-endian serialization of this header to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u16(self.command);
        if self.is_extended() {
            buf.put_u16(EXTENDED_SENTINEL);
            buf.put_u16(self.data_type);
            buf.put_u16(EXTENDED_SENTINEL);
            buf.put_u32(self.param1);
            buf.put_u32(self.param2);
            buf.put_u32(self.payload_size);
            buf.put_u32(self.data_count);
        } else {
            buf.put_u16(self.payload_size as u16);
            buf.put_u16(self.data_type);
            buf.put_u16(self.data_count as u16);
            buf.put_u32(self.param1);
            buf.put_u32(self.param2);
        }
    }

    /// Parse a header from the front of `buf`.
    ///
    /// Returns the header and the number of bytes it occupied, or `None` if
    /// `buf` does not yet hold a complete header. The caller keeps ownership
    /// of the bytes; nothing is consumed here.
    pub fn from_bytes(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < FIXED_HEADER_SIZE {
            return None;
        }
        let command = u16::from_be_bytes([buf[0], buf[1]]);
        let small_size = u16::from_be_bytes([buf[2], buf[3]]);
        let data_type = u16::from_be_bytes([buf[4], buf[5]]);
        let small_count = u16::from_be_bytes([buf[6], buf[7]]);
        let param1 = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let param2 = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);

        if small_size == EXTENDED_SENTINEL || small_count == EXTENDED_SENTINEL {
            if buf.len() < EXTENDED_HEADER_SIZE {
                return None;
            }
            let payload_size = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
            let data_count = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
            Some((
                Self {
                    command,
                    payload_size,
                    data_type,
                    data_count,
                    param1,
                    param2,
                },
                EXTENDED_HEADER_SIZE,
            ))
        } else {
            Some((
                Self {
                    command,
                    payload_size: u32::from(small_size),
                    data_type,
                    data_count: u32::from(small_count),
                    param1,
                    param2,
                },
                FIXED_HEADER_SIZE,
            ))
        }
    }

    /// Payload length on the wire, including alignment padding.
    pub fn padded_payload_size(&self) -> usize {
        pad8(self.payload_size as usize)
    }
}
