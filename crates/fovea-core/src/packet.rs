//! Length-prefixed packet stream.
//!
//! The byte range the loader hands to the decoder is a sequence of records,
//! each a little-endian `u32` length followed by that many payload bytes.
//! Trailing bytes that do not form a complete record are a hard error, not
//! a truncation.

use crate::error::{EngineError, Result};

/// Lazy iterator over the packets of an encoded byte range.
pub struct PacketStream<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PacketStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Byte position of the next record, for error reporting.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for PacketStream<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.data.len() - self.offset;
        if remaining == 0 {
            return None;
        }
        if remaining < 4 {
            return Some(Err(EngineError::MalformedPacket {
                offset: self.offset as u64,
            }));
        }
        let len_bytes: [u8; 4] = self.data[self.offset..self.offset + 4]
            .try_into()
            .unwrap_or([0; 4]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if remaining - 4 < len {
            return Some(Err(EngineError::MalformedPacket {
                offset: self.offset as u64,
            }));
        }
        let start = self.offset + 4;
        self.offset = start + len;
        Some(Ok(&self.data[start..start + len]))
    }
}

/// Append one record to an in-memory packet stream.
pub fn write_packet(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}
