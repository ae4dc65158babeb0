//! Fixed-capacity buffer windows shared between the pump and a job.

/// A fixed-capacity byte buffer with a sliding region of valid bytes.
///
/// The valid, not yet consumed bytes live in `[offset, offset + filled)`.
/// Producers append at the back (`spare_mut` + `commit`, or `write`),
/// consumers advance the front (`consume`). `compact` moves the unconsumed
/// tail to the start of storage so the back has room again.
///
/// An input window also carries the stream end flag: once set it stays set.
#[derive(Debug)]
pub struct Window {
    storage: Box<[u8]>,
    offset: usize,
    filled: usize,
    end: bool,
}

impl Window {
    /// Create an empty window holding at most `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            offset: 0,
            filled: 0,
            end: false,
        }
    }

    /// Total storage size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of valid bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.filled
    }

    /// Whether no valid bytes remain.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Start of the valid region.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Free bytes after the valid region.
    #[must_use]
    pub fn room(&self) -> usize {
        self.storage.len() - self.offset - self.filled
    }

    /// The valid bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.filled]
    }

    /// Drop `n` bytes from the front of the valid region.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`len`](Self::len).
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.filled, "consumed {n} of {} bytes", self.filled);
        self.offset += n;
        self.filled -= n;
        if self.filled == 0 {
            self.offset = 0;
        }
    }

    /// Move the valid bytes to the start of storage, preserving their order.
    pub fn compact(&mut self) {
        if self.offset > 0 {
            self.storage
                .copy_within(self.offset..self.offset + self.filled, 0);
            self.offset = 0;
        }
    }

    /// Free storage after the valid region, for a producer to fill.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let start = self.offset + self.filled;
        &mut self.storage[start..]
    }

    /// Mark `n` bytes written into [`spare_mut`](Self::spare_mut) as valid.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`room`](Self::room).
    pub fn commit(&mut self, n: usize) {
        assert!(n <= self.room(), "committed {n} with {} bytes of room", self.room());
        self.filled += n;
    }

    /// Append as much of `bytes` as fits; returns the number copied.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.room());
        self.spare_mut()[..n].copy_from_slice(&bytes[..n]);
        self.filled += n;
        n
    }

    /// Discard all valid bytes.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.filled = 0;
    }

    /// Record that no further input will arrive.
    pub fn mark_end(&mut self) {
        self.end = true;
    }

    /// Whether the stream end has been reached.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        self.end
    }

    /// Whether the stream has ended and every byte was consumed.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.end && self.filled == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_window_is_empty() {
        let window = Window::with_capacity(8);
        assert_eq!(window.capacity(), 8);
        assert!(window.is_empty());
        assert_eq!(window.room(), 8);
        assert!(!window.is_end());
    }

    #[test]
    fn write_stops_at_capacity() {
        let mut window = Window::with_capacity(4);
        assert_eq!(window.write(b"abcdef"), 4);
        assert_eq!(window.data(), b"abcd");
        assert_eq!(window.room(), 0);
        assert_eq!(window.write(b"x"), 0);
    }

    #[test]
    fn consume_then_compact_preserves_tail() {
        let mut window = Window::with_capacity(6);
        window.write(b"abcdef");
        window.consume(4);
        assert_eq!(window.offset(), 4);
        assert_eq!(window.room(), 0);

        window.compact();
        assert_eq!(window.offset(), 0);
        assert_eq!(window.data(), b"ef");
        assert_eq!(window.room(), 4);

        window.write(b"gh");
        assert_eq!(window.data(), b"efgh");
    }

    #[test]
    fn consuming_everything_resets_offset() {
        let mut window = Window::with_capacity(4);
        window.write(b"ab");
        window.consume(2);
        assert_eq!(window.offset(), 0);
        assert_eq!(window.room(), 4);
    }

    #[test]
    fn spare_and_commit() {
        let mut window = Window::with_capacity(4);
        window.spare_mut()[..3].copy_from_slice(b"xyz");
        window.commit(3);
        assert_eq!(window.data(), b"xyz");
    }

    #[test]
    #[should_panic(expected = "consumed 3 of 2 bytes")]
    fn over_consume_panics() {
        let mut window = Window::with_capacity(4);
        window.write(b"ab");
        window.consume(3);
    }

    #[test]
    fn end_flag_is_sticky() {
        let mut window = Window::with_capacity(4);
        window.write(b"a");
        window.mark_end();
        assert!(window.is_end());
        assert!(!window.is_exhausted());
        window.consume(1);
        window.clear();
        assert!(window.is_exhausted());
    }

    #[test]
    fn zero_capacity_window() {
        let mut window = Window::with_capacity(0);
        assert_eq!(window.room(), 0);
        assert_eq!(window.write(b"abc"), 0);
        assert!(window.spare_mut().is_empty());
    }
}
