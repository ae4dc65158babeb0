//! Patch application: delta stream + basis → new file.

use tracing::debug;

use crate::delta::{DELTA_MAGIC, OP_COPY, OP_END, OP_LITERAL};
use crate::error::{Result, StreamError};
use crate::hash::StrongHash;
use crate::pump::{Job, JobStatus};
use crate::staging::{be_u32, be_u64, FieldBuffer};
use crate::transport::Basis;
use crate::window::Window;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchState {
    Magic,
    Opcode,
    CopyArgs,
    Copying { offset: u64, remaining: u64 },
    LiteralLen,
    Literal { remaining: usize },
    Checksum,
    Done,
}

/// Job that applies a delta stream to a basis.
///
/// Copy ranges are read from the basis through [`Basis::read_at`] straight
/// into the output window; literal bytes move from the input window to the
/// output window. Every output byte is hashed and compared with the
/// checksum that ends the delta.
#[derive(Debug)]
pub struct PatchJob<B> {
    basis: B,
    basis_size: u64,
    verify: bool,
    state: PatchState,
    field: FieldBuffer,
    hasher: blake3::Hasher,
    written: u64,
}

impl<B: Basis> PatchJob<B> {
    /// Start a patch against `basis`.
    ///
    /// # Errors
    ///
    /// Returns an error if the basis size cannot be determined.
    pub fn new(mut basis: B, verify: bool) -> Result<Self> {
        let basis_size = basis.size()?;
        Ok(Self {
            basis,
            basis_size,
            verify,
            state: PatchState::Magic,
            field: FieldBuffer::new(),
            hasher: blake3::Hasher::new(),
            written: 0,
        })
    }

    /// Bytes written to the patched output so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Size of the basis.
    #[must_use]
    pub const fn basis_size(&self) -> u64 {
        self.basis_size
    }

    /// Get the basis back.
    pub fn into_basis(self) -> B {
        self.basis
    }

    fn check_bounds(&self, offset: u64, len: u32) -> Result<()> {
        let in_bounds = offset
            .checked_add(u64::from(len))
            .is_some_and(|end| end <= self.basis_size);
        if in_bounds {
            Ok(())
        } else {
            Err(StreamError::InvalidCopyBounds {
                offset,
                len,
                basis_size: self.basis_size,
            })
        }
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.written += bytes.len() as u64;
    }

    /// Advance the state machine until it needs input or output room.
    ///
    /// Returns `true` if it stopped for lack of input.
    fn advance(&mut self, input: &mut Window, output: &mut Window) -> Result<bool> {
        loop {
            match self.state {
                PatchState::Magic => {
                    let Some(magic) = self.field.fill(input, DELTA_MAGIC.len()) else {
                        return Ok(true);
                    };
                    if magic != DELTA_MAGIC {
                        return Err(StreamError::CorruptedDelta(format!(
                            "bad magic: expected {DELTA_MAGIC:?}, got {magic:?}"
                        )));
                    }
                    self.field.clear();
                    self.state = PatchState::Opcode;
                }
                PatchState::Opcode => {
                    let Some(&op) = input.data().first() else {
                        return Ok(true);
                    };
                    input.consume(1);
                    self.state = match op {
                        OP_COPY => PatchState::CopyArgs,
                        OP_LITERAL => PatchState::LiteralLen,
                        OP_END => PatchState::Checksum,
                        other => {
                            return Err(StreamError::CorruptedDelta(format!(
                                "unknown opcode {other:#04x}"
                            )))
                        }
                    };
                }
                PatchState::CopyArgs => {
                    let Some(args) = self.field.fill(input, 12) else {
                        return Ok(true);
                    };
                    let offset = be_u64(&args[..8]);
                    let len = be_u32(&args[8..]);
                    self.field.clear();
                    self.check_bounds(offset, len)?;
                    self.state = PatchState::Copying {
                        offset,
                        remaining: u64::from(len),
                    };
                }
                PatchState::Copying { offset, remaining } => {
                    if remaining == 0 {
                        self.state = PatchState::Opcode;
                        continue;
                    }
                    let room = output.room();
                    if room == 0 {
                        return Ok(false);
                    }
                    let n = usize::try_from(remaining).map_or(room, |r| r.min(room));
                    let dst = &mut output.spare_mut()[..n];
                    self.basis.read_at(offset, dst)?;
                    self.emit(dst);
                    output.commit(n);
                    self.state = PatchState::Copying {
                        offset: offset + n as u64,
                        remaining: remaining - n as u64,
                    };
                }
                PatchState::LiteralLen => {
                    let Some(len) = self.field.fill(input, 4) else {
                        return Ok(true);
                    };
                    let remaining = be_u32(len) as usize;
                    self.field.clear();
                    self.state = if remaining == 0 {
                        PatchState::Opcode
                    } else {
                        PatchState::Literal { remaining }
                    };
                }
                PatchState::Literal { remaining } => {
                    if output.room() == 0 {
                        return Ok(false);
                    }
                    if input.is_empty() {
                        return Ok(true);
                    }
                    let n = remaining.min(input.len()).min(output.room());
                    let bytes = &input.data()[..n];
                    output.write(bytes);
                    self.emit(bytes);
                    input.consume(n);
                    self.state = if remaining == n {
                        PatchState::Opcode
                    } else {
                        PatchState::Literal {
                            remaining: remaining - n,
                        }
                    };
                }
                PatchState::Checksum => {
                    let Some(recorded) = self.field.fill(input, StrongHash::LEN) else {
                        return Ok(true);
                    };
                    let expected = StrongHash::from_prefix(recorded);
                    self.field.clear();
                    let actual = StrongHash::finish(&self.hasher);
                    if self.verify && expected != actual {
                        return Err(StreamError::ChecksumMismatch {
                            expected: *expected.as_bytes(),
                            actual: *actual.as_bytes(),
                        });
                    }
                    debug!(written = self.written, verified = self.verify, "patch complete");
                    self.state = PatchState::Done;
                }
                PatchState::Done => {
                    if !input.is_empty() {
                        return Err(StreamError::CorruptedDelta(format!(
                            "{} trailing bytes after end of delta",
                            input.len()
                        )));
                    }
                    return Ok(true);
                }
            }
        }
    }
}

impl<B: Basis> Job for PatchJob<B> {
    fn step(&mut self, input: &mut Window, output: &mut Window) -> Result<JobStatus> {
        let starved = self.advance(input, output)?;

        if self.state == PatchState::Done {
            return Ok(if input.is_end() {
                JobStatus::Done
            } else {
                JobStatus::Blocked
            });
        }
        if starved && input.is_exhausted() {
            return Err(StreamError::CorruptedDelta(
                "delta stream ended before END".to_string(),
            ));
        }
        Ok(JobStatus::Blocked)
    }
}
