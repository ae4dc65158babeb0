//! Delta computation against a basis signature.
//!
//! The delta job slides a block-sized window over the new file. Wherever
//! the rolling checksum and the truncated strong hash agree with a basis
//! block it emits a copy; everything in between travels as literal bytes.
//!
//! Wire format:
//!
//! ```text
//! MAGIC "DDLT"
//! 0x01 COPY    offset: u64 BE, len: u32 BE
//! 0x02 LITERAL len: u32 BE, data[len]
//! 0x00 END     checksum[32]   (BLAKE3 of the whole new file)
//! ```

use tracing::debug;

use crate::checksum::RollingChecksum;
use crate::error::Result;
use crate::hash::StrongHash;
use crate::pump::{Job, JobStatus};
use crate::signature::SignatureTable;
use crate::staging::OutputQueue;
use crate::window::Window;

/// Delta stream magic bytes: "DDLT"
pub const DELTA_MAGIC: [u8; 4] = *b"DDLT";

/// Terminates the op stream; followed by the output checksum.
pub const OP_END: u8 = 0x00;

/// Copy a range of the basis.
pub const OP_COPY: u8 = 0x01;

/// Insert literal bytes.
pub const OP_LITERAL: u8 = 0x02;

/// Longest literal run held back before it is emitted.
pub const MAX_LITERAL_RUN: usize = 32 * 1024;

/// One delta instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOp<'a> {
    /// Copy `len` bytes from basis file starting at `offset`.
    Copy {
        /// Byte offset in the basis file.
        offset: u64,
        /// Number of bytes to copy.
        len: u32,
    },
    /// Insert literal bytes directly.
    Literal(&'a [u8]),
    /// End of ops, carrying the checksum of the reconstructed file.
    End(StrongHash),
}

impl DeltaOp<'_> {
    /// Number of bytes this operation produces in the patched file.
    #[must_use]
    pub fn output_len(&self) -> u64 {
        match self {
            Self::Copy { len, .. } => u64::from(*len),
            Self::Literal(data) => data.len() as u64,
            Self::End(_) => 0,
        }
    }

    /// Encoded size on the wire.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self {
            Self::Copy { .. } => 13,
            Self::Literal(data) => 5 + data.len(),
            Self::End(_) => 1 + StrongHash::LEN,
        }
    }

    fn encode_into(&self, queue: &mut OutputQueue) {
        match self {
            Self::Copy { offset, len } => {
                queue.push(OP_COPY);
                queue.extend(&offset.to_be_bytes());
                queue.extend(&len.to_be_bytes());
            }
            Self::Literal(data) => {
                #[allow(clippy::cast_possible_truncation)]
                let len = data.len() as u32;
                queue.push(OP_LITERAL);
                queue.extend(&len.to_be_bytes());
                queue.extend(data);
            }
            Self::End(checksum) => {
                queue.push(OP_END);
                queue.extend(checksum.as_bytes());
            }
        }
    }
}

/// Statistics from delta computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    /// Number of copy operations (after merging).
    pub copy_ops: u64,
    /// Number of literal operations.
    pub literal_ops: u64,
    /// Total bytes copied from basis.
    pub bytes_copied: u64,
    /// Total literal bytes.
    pub bytes_literal: u64,
}

impl DeltaStats {
    /// Size of the new file.
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.bytes_copied + self.bytes_literal
    }

    /// Share of the new file reused from the basis (0.0-1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // acceptable for ratio calculation
    pub fn ratio(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 1.0;
        }
        self.bytes_copied as f64 / total as f64
    }
}

/// Job that turns a new file stream into a delta stream.
#[derive(Debug)]
pub struct DeltaJob<'a> {
    table: &'a SignatureTable,
    block_len: usize,
    buf: Vec<u8>,
    pos: usize,
    lit_start: usize,
    rolling: Option<RollingChecksum>,
    pending_copy: Option<(u64, u32)>,
    hasher: blake3::Hasher,
    queue: OutputQueue,
    stats: DeltaStats,
    finished: bool,
}

impl<'a> DeltaJob<'a> {
    /// Start a delta against an indexed signature.
    #[must_use]
    pub fn new(table: &'a SignatureTable) -> Self {
        let mut queue = OutputQueue::new();
        queue.extend(&DELTA_MAGIC);
        Self {
            table,
            block_len: table.block_len() as usize,
            buf: Vec::new(),
            pos: 0,
            lit_start: 0,
            rolling: None,
            pending_copy: None,
            hasher: blake3::Hasher::new(),
            queue,
            stats: DeltaStats::default(),
            finished: false,
        }
    }

    /// Statistics so far; final once the job is done.
    #[must_use]
    pub const fn stats(&self) -> DeltaStats {
        self.stats
    }

    fn scan(&mut self) {
        let table = self.table;
        let bl = self.block_len;

        while self.pos + bl <= self.buf.len() {
            let window = &self.buf[self.pos..self.pos + bl];
            let rolling = *self
                .rolling
                .get_or_insert_with(|| RollingChecksum::new(window));

            if let Some(index) = table.find_match(rolling.digest(), window).map(|b| b.index) {
                #[allow(clippy::cast_possible_truncation)]
                let len = bl as u32;
                self.flush_literal();
                self.push_copy(u64::from(index) * bl as u64, len);
                self.pos += bl;
                self.lit_start = self.pos;
                self.rolling = None;
                continue;
            }

            if self.pos + bl < self.buf.len() {
                let (old, new) = (self.buf[self.pos], self.buf[self.pos + bl]);
                if let Some(r) = self.rolling.as_mut() {
                    r.roll(old, new);
                }
            } else {
                self.rolling = None;
            }
            self.pos += 1;

            if self.pos - self.lit_start >= MAX_LITERAL_RUN {
                self.flush_literal();
            }
        }

        if self.lit_start > 0 {
            self.buf.drain(..self.lit_start);
            self.pos -= self.lit_start;
            self.lit_start = 0;
        }
    }

    fn finish(&mut self) {
        let table = self.table;
        let bl = self.block_len;

        // The basis may end in a short block.
        let tail = &self.buf[self.pos..];
        let tail_len = tail.len();
        if tail_len > 0 {
            let weak = RollingChecksum::new(tail).digest();
            if let Some(index) = table.find_match(weak, tail).map(|b| b.index) {
                #[allow(clippy::cast_possible_truncation)]
                let len = tail_len as u32;
                self.flush_literal();
                self.push_copy(u64::from(index) * bl as u64, len);
                self.pos += tail_len;
                self.lit_start = self.pos;
            }
        }

        self.pos = self.buf.len();
        self.flush_literal();
        self.flush_copy();

        let checksum = StrongHash::finish(&self.hasher);
        DeltaOp::End(checksum).encode_into(&mut self.queue);
        self.buf.clear();
        self.pos = 0;
        self.lit_start = 0;

        debug!(
            copy_ops = self.stats.copy_ops,
            literal_ops = self.stats.literal_ops,
            bytes_copied = self.stats.bytes_copied,
            bytes_literal = self.stats.bytes_literal,
            "delta complete"
        );
    }

    fn push_copy(&mut self, offset: u64, len: u32) {
        if let Some((prev_offset, prev_len)) = self.pending_copy.as_mut() {
            if *prev_offset + u64::from(*prev_len) == offset {
                if let Some(merged) = prev_len.checked_add(len) {
                    *prev_len = merged;
                    return;
                }
            }
        }
        self.flush_copy();
        self.pending_copy = Some((offset, len));
    }

    fn flush_copy(&mut self) {
        if let Some((offset, len)) = self.pending_copy.take() {
            DeltaOp::Copy { offset, len }.encode_into(&mut self.queue);
            self.stats.copy_ops += 1;
            self.stats.bytes_copied += u64::from(len);
        }
    }

    fn flush_literal(&mut self) {
        if self.pos == self.lit_start {
            return;
        }
        self.flush_copy();
        let run = &self.buf[self.lit_start..self.pos];
        DeltaOp::Literal(run).encode_into(&mut self.queue);
        self.stats.literal_ops += 1;
        self.stats.bytes_literal += run.len() as u64;
        self.lit_start = self.pos;
    }
}

impl Job for DeltaJob<'_> {
    fn step(&mut self, input: &mut Window, output: &mut Window) -> Result<JobStatus> {
        self.queue.drain_into(output);
        if !self.queue.is_empty() {
            return Ok(JobStatus::Blocked);
        }

        if !self.finished {
            if !input.is_empty() {
                let data = input.data();
                self.hasher.update(data);
                self.buf.extend_from_slice(data);
                let n = data.len();
                input.consume(n);
                self.scan();
            }
            if input.is_exhausted() {
                self.finish();
                self.finished = true;
            }
        }

        self.queue.drain_into(output);
        if self.finished && self.queue.is_empty() {
            Ok(JobStatus::Done)
        } else {
            Ok(JobStatus::Blocked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::Pump;
    use crate::signature::{Signature, SignatureParams};
    use crate::transport::{FileSink, FileSource};
    use std::io::Cursor;

    fn table_for(basis: &[u8], block_len: u32) -> SignatureTable {
        Signature::generate(basis, SignatureParams::new(block_len, 8).unwrap()).into_table()
    }

    fn delta(table: &SignatureTable, data: &[u8], capacity: usize) -> (Vec<u8>, DeltaStats) {
        let pump = Pump::with_capacity(capacity).unwrap();
        let mut source = FileSource::new(Cursor::new(data.to_vec()));
        let mut sink = FileSink::new(Vec::new());
        let mut job = DeltaJob::new(table);
        pump.run(&mut source, &mut job, &mut sink).unwrap();
        (sink.into_inner(), job.stats())
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    // ==========================================================================
    // DELTA OP TESTS
    // ==========================================================================

    #[test]
    fn op_encoding() {
        let mut queue = OutputQueue::new();
        DeltaOp::Copy { offset: 1, len: 2 }.encode_into(&mut queue);
        DeltaOp::Literal(b"hi").encode_into(&mut queue);

        let mut out = Window::with_capacity(64);
        queue.drain_into(&mut out);
        assert_eq!(
            out.data(),
            &[1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2, 2, 0, 0, 0, 2, b'h', b'i']
        );
    }

    #[test]
    fn op_sizes() {
        assert_eq!(DeltaOp::Copy { offset: 0, len: 9 }.encoded_len(), 13);
        assert_eq!(DeltaOp::Copy { offset: 0, len: 9 }.output_len(), 9);
        assert_eq!(DeltaOp::Literal(&[0; 100]).encoded_len(), 105);
        assert_eq!(DeltaOp::End(StrongHash::zero()).encoded_len(), 33);
        assert_eq!(DeltaOp::End(StrongHash::zero()).output_len(), 0);
    }

    // ==========================================================================
    // DELTA JOB TESTS
    // ==========================================================================

    #[test]
    fn identical_file_is_one_copy() {
        let data = pattern(4096);
        let table = table_for(&data, 256);
        let (stream, stats) = delta(&table, &data, 512);

        let mut expected = DELTA_MAGIC.to_vec();
        expected.push(OP_COPY);
        expected.extend_from_slice(&0u64.to_be_bytes());
        expected.extend_from_slice(&4096u32.to_be_bytes());
        expected.push(OP_END);
        expected.extend_from_slice(StrongHash::compute(&data).as_bytes());
        assert_eq!(stream, expected);

        assert_eq!(stats.copy_ops, 1);
        assert_eq!(stats.literal_ops, 0);
        assert!((stats.ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn short_final_block_is_copied() {
        let data = pattern(1000);
        let table = table_for(&data, 256);
        let (_, stats) = delta(&table, &data, 128);
        assert_eq!(stats.bytes_copied, 1000);
        assert_eq!(stats.bytes_literal, 0);
    }

    #[test]
    fn empty_signature_yields_literals() {
        let table = table_for(b"", 256);
        let data = pattern(100);
        let (stream, stats) = delta(&table, &data, 64);

        assert_eq!(&stream[..4], b"DDLT");
        assert_eq!(stream[4], OP_LITERAL);
        assert_eq!(stream.len(), 4 + 5 + 100 + 33);
        assert_eq!(stats.bytes_literal, 100);
        assert_eq!(stats.copy_ops, 0);
    }

    #[test]
    fn empty_file_is_end_only() {
        let table = table_for(&pattern(512), 256);
        let (stream, stats) = delta(&table, b"", 64);
        assert_eq!(stream.len(), 4 + 33);
        assert_eq!(stream[4], OP_END);
        assert_eq!(stats, DeltaStats::default());
    }

    #[test]
    fn long_literal_runs_are_split() {
        let table = table_for(b"", 256);
        let data = pattern(70_000);
        let (_, stats) = delta(&table, &data, 32767);
        assert_eq!(stats.literal_ops, 3);
        assert_eq!(stats.bytes_literal, 70_000);
    }

    #[test]
    fn insertion_keeps_surrounding_copies() {
        let basis = pattern(2048);
        let mut modified = basis[..1024].to_vec();
        modified.extend_from_slice(b"INSERTED");
        modified.extend_from_slice(&basis[1024..]);

        let table = table_for(&basis, 256);
        let (_, stats) = delta(&table, &modified, 300);
        assert_eq!(stats.bytes_literal, 8);
        assert_eq!(stats.bytes_copied, 2048);
        assert_eq!(stats.copy_ops, 2);
        assert_eq!(stats.literal_ops, 1);
    }

    #[test]
    fn window_capacity_does_not_change_encoding() {
        let basis = pattern(3000);
        let mut modified = basis.clone();
        modified[1500] ^= 0xff;
        let table = table_for(&basis, 128);
        assert_eq!(delta(&table, &modified, 1).0, delta(&table, &modified, 32767).0);
    }

    #[test]
    fn stats_ratio_empty() {
        assert!((DeltaStats::default().ratio() - 1.0).abs() < f64::EPSILON);
    }
}
