//! Wire framing for streaming over a byte stream.
//!
//! Every chunk travels as one frame: a 16-bit big-endian header followed by
//! the raw payload.
//!
//! ```text
//! ┌────────────────────────────┬──────────┬─────────────────┐
//! │ LENGTH          (bits 15-1)│ EOF (b0) │ PAYLOAD         │
//! │ 15 bits                    │ 1 bit    │ LENGTH bytes    │
//! └────────────────────────────┴──────────┴─────────────────┘
//! ```
//!
//! There is no checksum and no sequence number: the transport is assumed to
//! be reliable and ordered.

use std::io::{Read, Write};

use crate::error::{Result, StreamError};

/// Largest payload a frame can carry (15-bit length field).
pub const MAX_FRAME_LEN: usize = (u16::MAX >> 1) as usize;

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 2;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes (at most [`MAX_FRAME_LEN`]).
    pub length: u16,
    /// No more frames follow this one.
    pub eof: bool,
}

impl FrameHeader {
    /// Create a header for a payload of `length` bytes.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if `length` exceeds [`MAX_FRAME_LEN`].
    pub fn new(length: usize, eof: bool) -> Result<Self> {
        if length > MAX_FRAME_LEN {
            return Err(StreamError::ProtocolViolation(format!(
                "frame payload too large: {length} > {MAX_FRAME_LEN}"
            )));
        }
        #[allow(clippy::cast_possible_truncation)]
        let length = length as u16;
        Ok(Self { length, eof })
    }

    /// Terminal marker: empty payload, end of stream.
    #[must_use]
    pub const fn terminal() -> Self {
        Self {
            length: 0,
            eof: true,
        }
    }

    /// Payload length as `usize`.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length as usize
    }

    /// Whether the frame carries no payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Encode header to network byte order.
    #[must_use]
    pub const fn encode(&self) -> [u8; HEADER_LEN] {
        let packed = (self.length << 1) | self.eof as u16;
        packed.to_be_bytes()
    }

    /// Decode header from network byte order.
    ///
    /// Every 16-bit pattern is a valid header.
    #[must_use]
    pub const fn decode(buf: [u8; HEADER_LEN]) -> Self {
        let packed = u16::from_be_bytes(buf);
        Self {
            length: packed >> 1,
            eof: packed & 1 == 1,
        }
    }

    /// Read a header from a stream.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if the stream ends inside the header,
    /// or `Io` for any other read failure.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut buf)
            .map_err(|e| short_read(e, "frame header"))?;
        Ok(Self::decode(buf))
    }

    /// Write the header to a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode())?;
        Ok(())
    }
}

/// Encode one complete frame.
///
/// # Errors
///
/// Returns `ProtocolViolation` if the payload is larger than [`MAX_FRAME_LEN`].
pub fn encode(payload: &[u8], eof: bool) -> Result<Vec<u8>> {
    let header = FrameHeader::new(payload.len(), eof)?;
    let mut wire = Vec::with_capacity(HEADER_LEN + payload.len());
    wire.extend_from_slice(&header.encode());
    wire.extend_from_slice(payload);
    Ok(wire)
}

/// Decode one complete frame from the front of `wire`.
///
/// Returns the header and its payload slice; trailing bytes are ignored.
///
/// # Errors
///
/// Returns `ProtocolViolation` if `wire` is shorter than the header or the
/// payload it announces.
pub fn decode(wire: &[u8]) -> Result<(FrameHeader, &[u8])> {
    let Some((head, rest)) = wire.split_first_chunk::<HEADER_LEN>() else {
        return Err(StreamError::ProtocolViolation(format!(
            "truncated frame header: {} of {HEADER_LEN} bytes",
            wire.len()
        )));
    };
    let header = FrameHeader::decode(*head);
    if rest.len() < header.len() {
        return Err(StreamError::ProtocolViolation(format!(
            "truncated frame payload: {} of {} bytes",
            rest.len(),
            header.len()
        )));
    }
    Ok((header, &rest[..header.len()]))
}

/// Write one frame to a stream.
///
/// # Errors
///
/// Returns `ProtocolViolation` for an oversized payload, `Io` if writing fails.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8], eof: bool) -> Result<()> {
    let header = FrameHeader::new(payload.len(), eof)?;
    header.write_to(writer)?;
    if !payload.is_empty() {
        writer.write_all(payload)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read exactly `buf.len()` payload bytes announced by a header.
///
/// # Errors
///
/// Returns `ProtocolViolation` if the stream ends early.
pub fn read_payload<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|e| short_read(e, "frame payload"))
}

fn short_read(err: std::io::Error, what: &str) -> StreamError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        StreamError::ProtocolViolation(format!("connection closed inside {what}"))
    } else {
        StreamError::Io(err)
    }
}
