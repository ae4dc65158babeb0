//! Strong hash implementation using BLAKE3.
//!
//! The rolling checksum only nominates candidate blocks; a BLAKE3 digest,
//! truncated to the signature's strong length, confirms the match. The full
//! 32-byte digest also seals every delta stream.

/// Strong cryptographic hash for block verification.
///
/// # Example
///
/// ```rust
/// use deltastream::StrongHash;
///
/// let hash = StrongHash::compute(b"hello world");
/// assert_eq!(hash, StrongHash::compute(b"hello world"));
/// assert_ne!(hash, StrongHash::compute(b"different data"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrongHash([u8; 32]);

impl StrongHash {
    /// Full digest length in bytes.
    pub const LEN: usize = 32;

    /// Compute the BLAKE3 hash of `data`.
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Finish an incremental hasher.
    #[must_use]
    pub fn finish(hasher: &blake3::Hasher) -> Self {
        Self(*hasher.finalize().as_bytes())
    }

    /// Create a `StrongHash` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a hash from a truncated prefix, zero-filling the rest.
    ///
    /// Prefixes longer than 32 bytes are cut to 32.
    #[must_use]
    pub fn from_prefix(prefix: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        let len = prefix.len().min(Self::LEN);
        bytes[..len].copy_from_slice(&prefix[..len]);
        Self(bytes)
    }

    /// Get the raw bytes of the hash.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First `len` bytes of the hash (clamped to 32).
    #[must_use]
    pub fn truncated(&self, len: usize) -> &[u8] {
        &self.0[..len.min(Self::LEN)]
    }

    /// Compare only the first `len` bytes.
    #[must_use]
    pub fn eq_truncated(&self, other: &Self, len: usize) -> bool {
        self.truncated(len) == other.truncated(len)
    }

    /// All-zero hash.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }
}

impl std::fmt::Debug for StrongHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StrongHash(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "...)")
    }
}

impl std::fmt::Display for StrongHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Default for StrongHash {
    fn default() -> Self {
        Self::zero()
    }
}
