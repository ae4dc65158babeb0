//! Staging buffers shared by the concrete jobs.
//!
//! Jobs cannot assume that a whole header field or a whole encoded record
//! fits into the windows the pump hands them, so they stage partial fields
//! on the way in and queue encoded bytes on the way out.

use crate::window::Window;

/// Encoded bytes waiting for room in the output window.
#[derive(Debug, Default)]
pub(crate) struct OutputQueue {
    buf: Vec<u8>,
    pos: usize,
}

impl OutputQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn push(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Move as many queued bytes as fit into `output`.
    pub(crate) fn drain_into(&mut self, output: &mut Window) {
        self.pos += output.write(&self.buf[self.pos..]);
        if self.is_empty() {
            self.buf.clear();
            self.pos = 0;
        }
    }
}

/// Collects a fixed-size field that may arrive split across steps.
#[derive(Debug, Default)]
pub(crate) struct FieldBuffer {
    buf: Vec<u8>,
}

impl FieldBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Take bytes from `input` until `n` are staged; returns them once complete.
    pub(crate) fn fill(&mut self, input: &mut Window, n: usize) -> Option<&[u8]> {
        let want = n.saturating_sub(self.buf.len());
        let take = want.min(input.len());
        self.buf.extend_from_slice(&input.data()[..take]);
        input.consume(take);
        if self.buf.len() == n {
            Some(&self.buf)
        } else {
            None
        }
    }

    /// Whether some bytes of a field are staged.
    pub(crate) fn is_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Big-endian `u32` from the first four bytes.
pub(crate) fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Big-endian `u64` from the first eight bytes.
pub(crate) fn be_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(raw)
}
