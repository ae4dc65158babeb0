//! Sources and sinks the pump moves bytes through.
//!
//! Two variants of each: a *file* variant that reads or writes raw bytes, and
//! a *socket* variant that speaks the frame protocol. They detect the end of
//! a stream differently:
//!
//! - [`FileSource`] reports the end when a read returns zero bytes. A failed
//!   read is an I/O error, never an end of stream.
//! - [`SocketSource`] trusts only the wire EOF flag. A peer that closes the
//!   connection before sending it is a protocol violation.
//!
//! [`Basis`] is the separate random-access capability the patch job uses to
//! fetch bytes of the original file; it is not part of the windowed stream.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use tracing::trace;

use crate::error::{Result, StreamError};
use crate::frame::{self, FrameHeader, MAX_FRAME_LEN};

/// Outcome of one [`Source::pull`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulled {
    /// Bytes written into the buffer.
    pub len: usize,
    /// No more bytes will ever arrive from this source.
    pub end: bool,
}

/// Sequential byte producer feeding the pump's input window.
pub trait Source {
    /// Read up to `buf.len()` bytes.
    ///
    /// `buf` is never empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails or the stream is malformed.
    fn pull(&mut self, buf: &mut [u8]) -> Result<Pulled>;
}

/// Sequential byte consumer draining the pump's output window.
pub trait Sink {
    /// Accept `chunk` in full. `last` is set exactly once, on the final push.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be written completely.
    fn push(&mut self, chunk: &[u8], last: bool) -> Result<()>;

    /// Whether this sink takes output at all.
    ///
    /// The pump allocates no output window for sinks that do not.
    fn accepts_output(&self) -> bool {
        true
    }
}

/// Random-access reads of the basis file during patch application.
pub trait Basis {
    /// Total size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&mut self) -> Result<u64>;

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range cannot be read completely.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl<T: Read + Seek> Basis for T {
    fn size(&mut self) -> Result<u64> {
        Ok(self.seek(SeekFrom::End(0))?)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)?;
        Ok(())
    }
}

/// Raw byte source, typically a local file.
#[derive(Debug)]
pub struct FileSource<R> {
    inner: R,
}

impl<R: Read> FileSource<R> {
    /// Wrap a reader.
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Unwrap the reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Source for FileSource<R> {
    fn pull(&mut self, buf: &mut [u8]) -> Result<Pulled> {
        let mut len = 0;
        while len < buf.len() {
            match self.inner.read(&mut buf[len..]) {
                Ok(0) => return Ok(Pulled { len, end: true }),
                Ok(n) => len += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(StreamError::Io(e)),
            }
        }
        Ok(Pulled { len, end: false })
    }
}

/// Raw byte sink, typically a local file.
#[derive(Debug)]
pub struct FileSink<W> {
    inner: W,
}

impl<W: Write> FileSink<W> {
    /// Wrap a writer.
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Sink for FileSink<W> {
    fn push(&mut self, chunk: &[u8], last: bool) -> Result<()> {
        self.inner.write_all(chunk)?;
        if last {
            self.inner.flush()?;
        }
        Ok(())
    }
}

/// Framed byte source reading from a connected stream.
///
/// A frame larger than the space the pump offers is staged internally and
/// handed out over several pulls.
#[derive(Debug)]
pub struct SocketSource<R> {
    inner: R,
    staged: Vec<u8>,
    staged_pos: usize,
    peer_done: bool,
    frames: u64,
}

impl<R: Read> SocketSource<R> {
    /// Wrap a connected stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            staged: Vec::new(),
            staged_pos: 0,
            peer_done: false,
            frames: 0,
        }
    }

    /// Frames received so far.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    fn staged_remaining(&self) -> usize {
        self.staged.len() - self.staged_pos
    }

    fn hand_out_staged(&mut self, buf: &mut [u8]) -> Pulled {
        let n = self.staged_remaining().min(buf.len());
        buf[..n].copy_from_slice(&self.staged[self.staged_pos..self.staged_pos + n]);
        self.staged_pos += n;
        Pulled {
            len: n,
            end: self.peer_done && self.staged_remaining() == 0,
        }
    }
}

impl<R: Read> Source for SocketSource<R> {
    fn pull(&mut self, buf: &mut [u8]) -> Result<Pulled> {
        if self.staged_remaining() > 0 {
            return Ok(self.hand_out_staged(buf));
        }

        loop {
            if self.peer_done {
                return Ok(Pulled { len: 0, end: true });
            }

            let header = FrameHeader::read_from(&mut self.inner)?;
            self.frames += 1;
            self.peer_done = header.eof;
            trace!(len = header.len(), eof = header.eof, "frame received");

            if header.is_empty() {
                continue;
            }

            if header.len() <= buf.len() {
                frame::read_payload(&mut self.inner, &mut buf[..header.len()])?;
                return Ok(Pulled {
                    len: header.len(),
                    end: header.eof,
                });
            }

            self.staged.resize(header.len(), 0);
            self.staged_pos = 0;
            frame::read_payload(&mut self.inner, &mut self.staged)?;
            return Ok(self.hand_out_staged(buf));
        }
    }
}

/// Framed byte sink writing to a connected stream.
///
/// Every push becomes one frame; the final push carries the EOF flag, even
/// when it has no payload.
#[derive(Debug)]
pub struct SocketSink<W> {
    inner: W,
    frames: u64,
    finished: bool,
}

impl<W: Write> SocketSink<W> {
    /// Wrap a connected stream.
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            frames: 0,
            finished: false,
        }
    }

    /// Frames sent so far.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }
}

impl<W: Write> Sink for SocketSink<W> {
    fn push(&mut self, chunk: &[u8], last: bool) -> Result<()> {
        if self.finished {
            return Err(StreamError::ProtocolViolation(
                "push after end-of-stream frame".to_string(),
            ));
        }
        if chunk.len() > MAX_FRAME_LEN {
            return Err(StreamError::ProtocolViolation(format!(
                "chunk of {} bytes exceeds frame limit {MAX_FRAME_LEN}",
                chunk.len()
            )));
        }
        frame::write_frame(&mut self.inner, chunk, last)?;
        self.frames += 1;
        self.finished = last;
        trace!(len = chunk.len(), eof = last, "frame sent");
        Ok(())
    }
}

/// Sink for jobs that keep their result internally.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl Sink for NullSink {
    fn push(&mut self, chunk: &[u8], _last: bool) -> Result<()> {
        if chunk.is_empty() {
            Ok(())
        } else {
            Err(StreamError::TransformFailed(format!(
                "job produced {} bytes with no sink attached",
                chunk.len()
            )))
        }
    }

    fn accepts_output(&self) -> bool {
        false
    }
}
