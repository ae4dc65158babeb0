//! Error types for deltastream operations.

use thiserror::Error;

/// Errors that can occur while streaming signatures, deltas and patches.
#[derive(Error, Debug)]
pub enum StreamError {
    /// I/O error during read, write, connect, bind or accept.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or truncated frame on the wire.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The transform job reported an unrecoverable failure.
    #[error("Transform failed: {0}")]
    TransformFailed(String),

    /// Missing or malformed invocation argument.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Invalid block length in a signature or configuration.
    #[error("Invalid block length: {0} (must be 64-65536)")]
    InvalidBlockSize(u32),

    /// Invalid strong hash length in a signature or configuration.
    #[error("Invalid hash length: {0} (must be 4-32)")]
    InvalidHashLength(u32),

    /// Delta contains a copy that reaches past the end of the basis.
    #[error("Invalid copy bounds: offset {offset} + len {len} exceeds basis size {basis_size}")]
    InvalidCopyBounds {
        /// Copy offset in basis file
        offset: u64,
        /// Copy length
        len: u32,
        /// Total basis file size
        basis_size: u64,
    },

    /// Checksum mismatch after patch application.
    #[error("Checksum mismatch: expected {expected:?}, got {actual:?}")]
    ChecksumMismatch {
        /// Checksum carried by the delta stream
        expected: [u8; 32],
        /// Checksum of the reconstructed output
        actual: [u8; 32],
    },

    /// Delta stream could not be decoded.
    #[error("Corrupted delta data: {0}")]
    CorruptedDelta(String),

    /// Signature stream could not be decoded.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

/// Coarse classification of a [`StreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operating-system level I/O failure.
    Io,
    /// Framing failure; the connection must be abandoned.
    Protocol,
    /// The transform could not complete.
    Transform,
    /// Bad invocation, reported before any I/O.
    Argument,
}

impl StreamError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::ProtocolViolation(_) => ErrorKind::Protocol,
            Self::Argument(_) => ErrorKind::Argument,
            Self::TransformFailed(_)
            | Self::InvalidBlockSize(_)
            | Self::InvalidHashLength(_)
            | Self::InvalidCopyBounds { .. }
            | Self::ChecksumMismatch { .. }
            | Self::CorruptedDelta(_)
            | Self::InvalidSignature(_) => ErrorKind::Transform,
        }
    }
}

/// Result type for deltastream operations.
pub type Result<T> = std::result::Result<T, StreamError>;
