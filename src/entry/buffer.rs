//! Bounded decode buffer
//!
//! A fixed-capacity scratch area that entry reads are decoded from, sized
//! for the largest encodable entry. Iterators own one and reuse it for every
//! entry instead of allocating a fresh buffer per value.

use super::MAX_ENTRY_SIZE;

/// Reusable scratch buffer for reading one encoded entry
pub struct DecodeBuffer {
    buf: Box<[u8]>,
}

impl DecodeBuffer {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; MAX_ENTRY_SIZE].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the first `len` bytes, or `None` if `len` exceeds the capacity
    pub fn region(&mut self, len: usize) -> Option<&mut [u8]> {
        self.buf.get_mut(..len)
    }
}

impl Default for DecodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}
