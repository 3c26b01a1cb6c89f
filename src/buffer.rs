//! Byte stream helpers and the compacting incoming buffer
//!
//! [`IncomingBuffer`] accumulates raw bytes from the wire and exposes a
//! contiguous "good data" window of validated application bytes. Bytes are
//! only ever appended at the back and dropped from the front by
//! [`IncomingBuffer::consume`], so the buffer never grows with the total
//! amount of traffic, only with the unconsumed tail.

use bytes::{Buf, BytesMut};

/// Read a big-endian `u16` length field at `offset`
///
/// Returns `None` if fewer than two bytes are available.
pub fn read_length(data: &[u8], offset: usize) -> Option<usize> {
    let field = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([field[0], field[1]]) as usize)
}

/// Check that `data` starts with `expected`
pub fn check_part(data: &[u8], expected: &[u8]) -> bool {
    data.len() >= expected.len() && &data[..expected.len()] == expected
}

/// Write `value` as a big-endian `u16` length field
pub fn put_length(out: &mut [u8], value: usize) {
    debug_assert!(value <= u16::MAX as usize);
    out[..2].copy_from_slice(&(value as u16).to_be_bytes());
}

/// Accumulating buffer with a validated data window
#[derive(Debug, Default)]
pub struct IncomingBuffer {
    data: BytesMut,
    good_offset: usize,
    good_limit: usize,
}

impl IncomingBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer seeded with `prefix`
    pub fn with_prefix(prefix: &[u8]) -> Self {
        let mut data = BytesMut::with_capacity(prefix.len() + 4096);
        data.extend_from_slice(prefix);
        Self {
            data,
            good_offset: 0,
            good_limit: 0,
        }
    }

    /// Append freshly received bytes
    pub fn append(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    /// Raw buffered bytes, validated or not
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Number of raw buffered bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the good data window currently holds bytes
    pub fn has_good_data(&self) -> bool {
        self.good_limit > 0
    }

    /// Whether a window is open (possibly already drained by reads)
    pub fn window_open(&self) -> bool {
        self.good_offset > 0 || self.good_limit > 0
    }

    /// Open the good data window over `offset..offset + len`
    pub fn set_window(&mut self, offset: usize, len: usize) {
        debug_assert!(offset + len <= self.data.len());
        self.good_offset = offset;
        self.good_limit = len;
    }

    /// Copy as many good bytes as fit into `out`, advancing the window
    pub fn read_good(&mut self, out: &mut [u8]) -> usize {
        let count = self.good_limit.min(out.len());
        if count == 0 {
            return 0;
        }
        out[..count].copy_from_slice(&self.data[self.good_offset..self.good_offset + count]);
        self.good_offset += count;
        self.good_limit -= count;
        count
    }

    /// Close a drained window and drop everything up to its end
    pub fn finish_window(&mut self) {
        debug_assert_eq!(self.good_limit, 0);
        let end = std::mem::take(&mut self.good_offset);
        self.consume(end);
    }

    /// Drop `amount` bytes from the front of the buffer
    ///
    /// Must only be called while no window is open.
    pub fn consume(&mut self, amount: usize) {
        debug_assert_eq!(self.good_offset, 0);
        debug_assert_eq!(self.good_limit, 0);
        if amount >= self.data.len() {
            self.data.clear();
        } else {
            self.data.advance(amount);
        }
    }

    /// Drop all buffered bytes and close the window
    pub fn clear(&mut self) {
        self.data.clear();
        self.good_offset = 0;
        self.good_limit = 0;
    }
}
