//! Signature generation, loading and lookup.
//!
//! A signature describes the basis file block by block: a rolling checksum
//! for fast filtering and a truncated BLAKE3 hash for confirmation. It
//! travels as a byte stream:
//!
//! ```text
//! ┌─────────┬───────────┬────────────┬───────────────────────────────┐
//! │  MAGIC  │ BLOCK LEN │ STRONG LEN │ { WEAK u32 │ STRONG[len] } * │
//! │ 4 bytes │ u32 BE    │ u32 BE     │ one record per block          │
//! └─────────┴───────────┴────────────┴───────────────────────────────┘
//! ```

use rustc_hash::FxHashMap;

use crate::checksum::RollingChecksum;
use crate::error::{Result, StreamError};
use crate::hash::StrongHash;
use crate::pump::{Job, JobStatus};
use crate::staging::{be_u32, FieldBuffer, OutputQueue};
use crate::window::Window;

/// Signature stream magic bytes: "DSIG"
pub const SIGNATURE_MAGIC: [u8; 4] = *b"DSIG";

/// Encoded signature header size in bytes.
pub const SIGNATURE_HEADER_LEN: usize = 12;

/// Smallest accepted block length.
pub const MIN_BLOCK_LEN: u32 = 64;

/// Largest accepted block length.
pub const MAX_BLOCK_LEN: u32 = 65536;

/// Smallest accepted strong hash length.
pub const MIN_STRONG_LEN: u32 = 4;

/// Largest accepted strong hash length (a full BLAKE3 digest).
pub const MAX_STRONG_LEN: u32 = 32;

/// Block and strong hash lengths for one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureParams {
    /// Bytes of basis per block.
    pub block_len: u32,
    /// Bytes of BLAKE3 digest kept per block.
    pub strong_len: u32,
}

impl SignatureParams {
    /// Create validated parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlockSize` or `InvalidHashLength` if out of range.
    pub fn new(block_len: u32, strong_len: u32) -> Result<Self> {
        let params = Self {
            block_len,
            strong_len,
        };
        params.validate()?;
        Ok(params)
    }

    /// Recommended parameters for a basis of `file_size` bytes.
    ///
    /// Blocks grow with the square root of the file size so the number of
    /// blocks and the bytes per block stay balanced; the strong hash grows
    /// with the number of blocks to keep false matches unlikely.
    #[must_use]
    pub fn recommended(file_size: u64) -> Self {
        let block_len = if file_size <= 256 * 256 {
            256
        } else {
            (isqrt(file_size) & !127).min(u64::from(MAX_BLOCK_LEN))
        };
        let blocks = file_size / block_len + 1;
        let bits = bit_length(file_size.saturating_add(1 << 24)) + bit_length(blocks);
        let strong_len = (2 + (bits + 7) / 8).min(MAX_STRONG_LEN);

        Self {
            block_len: u32::try_from(block_len).unwrap_or(MAX_BLOCK_LEN),
            strong_len,
        }
    }

    /// Check both lengths.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlockSize` or `InvalidHashLength` if out of range.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BLOCK_LEN..=MAX_BLOCK_LEN).contains(&self.block_len) {
            return Err(StreamError::InvalidBlockSize(self.block_len));
        }
        if !(MIN_STRONG_LEN..=MAX_STRONG_LEN).contains(&self.strong_len) {
            return Err(StreamError::InvalidHashLength(self.strong_len));
        }
        Ok(())
    }

    /// Encoded size of one block record.
    #[must_use]
    pub const fn record_len(&self) -> usize {
        4 + self.strong_len as usize
    }

    fn encode_header(&self) -> [u8; SIGNATURE_HEADER_LEN] {
        let mut buf = [0u8; SIGNATURE_HEADER_LEN];
        buf[0..4].copy_from_slice(&SIGNATURE_MAGIC);
        buf[4..8].copy_from_slice(&self.block_len.to_be_bytes());
        buf[8..12].copy_from_slice(&self.strong_len.to_be_bytes());
        buf
    }

    fn decode_header(buf: &[u8]) -> Result<Self> {
        if buf[0..4] != SIGNATURE_MAGIC {
            return Err(StreamError::InvalidSignature(format!(
                "bad magic: expected {SIGNATURE_MAGIC:?}, got {:?}",
                &buf[0..4]
            )));
        }
        Self::new(be_u32(&buf[4..8]), be_u32(&buf[8..12]))
    }
}

fn bit_length(x: u64) -> u32 {
    u64::BITS - x.leading_zeros()
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn isqrt(n: u64) -> u64 {
    let mut root = (n as f64).sqrt() as u64;
    while root.checked_mul(root).map_or(true, |sq| sq > n) {
        root -= 1;
    }
    while (root + 1).checked_mul(root + 1).is_some_and(|sq| sq <= n) {
        root += 1;
    }
    root
}

/// Signature for a single block in the basis file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSignature {
    /// Block index (0-based position in file).
    pub index: u32,
    /// Rolling checksum for fast matching.
    pub weak_hash: u32,
    /// Strong hash; only the first `strong_len` bytes are meaningful.
    pub strong_hash: StrongHash,
}

impl BlockSignature {
    /// Compute the signature of one block.
    #[must_use]
    pub fn compute(index: u32, data: &[u8], strong_len: u32) -> Self {
        let strong = StrongHash::compute(data);
        Self {
            index,
            weak_hash: RollingChecksum::new(data).digest(),
            strong_hash: StrongHash::from_prefix(strong.truncated(strong_len as usize)),
        }
    }

    fn encode_into(&self, strong_len: u32, queue: &mut OutputQueue) {
        queue.extend(&self.weak_hash.to_be_bytes());
        queue.extend(self.strong_hash.truncated(strong_len as usize));
    }
}

/// Complete signature of a basis file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Block and strong hash lengths.
    pub params: SignatureParams,
    /// Signatures for each block, in file order.
    pub blocks: Vec<BlockSignature>,
}

impl Signature {
    /// Create an empty signature.
    #[must_use]
    pub const fn new(params: SignatureParams) -> Self {
        Self {
            params,
            blocks: Vec::new(),
        }
    }

    /// Compute the signature of an in-memory basis.
    #[must_use]
    pub fn generate(data: &[u8], params: SignatureParams) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let blocks = data
            .chunks(params.block_len as usize)
            .enumerate()
            .map(|(i, chunk)| BlockSignature::compute(i as u32, chunk, params.strong_len))
            .collect();
        Self { params, blocks }
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the signature covers no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Build the lookup index used by the delta job.
    #[must_use]
    pub fn into_table(self) -> SignatureTable {
        SignatureTable::from_signature(self)
    }
}

/// Lookup index for block matching.
///
/// Two levels: rolling checksum to candidate blocks (`FxHashMap`, fast for
/// `u32` keys), then truncated strong hash to confirm.
#[derive(Debug)]
pub struct SignatureTable {
    weak_index: FxHashMap<u32, Vec<usize>>,
    signature: Signature,
}

impl SignatureTable {
    /// Index a signature.
    #[must_use]
    pub fn from_signature(signature: Signature) -> Self {
        let mut weak_index: FxHashMap<u32, Vec<usize>> =
            FxHashMap::with_capacity_and_hasher(signature.blocks.len(), rustc_hash::FxBuildHasher);

        for (i, block) in signature.blocks.iter().enumerate() {
            weak_index.entry(block.weak_hash).or_default().push(i);
        }

        Self {
            weak_index,
            signature,
        }
    }

    /// Find the block whose checksum is `weak` and whose content hashes like `data`.
    #[must_use]
    pub fn find_match(&self, weak: u32, data: &[u8]) -> Option<&BlockSignature> {
        let candidates = self.weak_index.get(&weak)?;
        let strong = StrongHash::compute(data);
        let len = self.signature.params.strong_len as usize;

        candidates
            .iter()
            .map(|&i| &self.signature.blocks[i])
            .find(|sig| sig.strong_hash.eq_truncated(&strong, len))
    }

    /// Whether any block has checksum `weak`.
    #[must_use]
    pub fn has_weak_match(&self, weak: u32) -> bool {
        self.weak_index.contains_key(&weak)
    }

    /// Number of distinct checksums.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.weak_index.len()
    }

    /// Get the underlying signature.
    #[must_use]
    pub const fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Block length.
    #[must_use]
    pub const fn block_len(&self) -> u32 {
        self.signature.params.block_len
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.signature.blocks.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signature.blocks.is_empty()
    }
}

/// Job that turns a basis stream into a signature stream.
#[derive(Debug)]
pub struct SignatureJob {
    params: SignatureParams,
    block: Vec<u8>,
    next_index: u32,
    queue: OutputQueue,
    finished: bool,
}

impl SignatureJob {
    /// Start a signature with validated parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlockSize` or `InvalidHashLength` if out of range.
    pub fn new(params: SignatureParams) -> Result<Self> {
        params.validate()?;
        let mut queue = OutputQueue::new();
        queue.extend(&params.encode_header());
        Ok(Self {
            params,
            block: Vec::with_capacity(params.block_len as usize),
            next_index: 0,
            queue,
            finished: false,
        })
    }

    /// Blocks encoded so far.
    #[must_use]
    pub const fn blocks(&self) -> u32 {
        self.next_index
    }

    fn emit_block(&mut self) {
        let sig = BlockSignature::compute(self.next_index, &self.block, self.params.strong_len);
        sig.encode_into(self.params.strong_len, &mut self.queue);
        self.next_index = self.next_index.saturating_add(1);
        self.block.clear();
    }
}

impl Job for SignatureJob {
    fn step(&mut self, input: &mut Window, output: &mut Window) -> Result<JobStatus> {
        self.queue.drain_into(output);
        if !self.queue.is_empty() {
            return Ok(JobStatus::Blocked);
        }

        let block_len = self.params.block_len as usize;
        while !input.is_empty() {
            let take = (block_len - self.block.len()).min(input.len());
            self.block.extend_from_slice(&input.data()[..take]);
            input.consume(take);
            if self.block.len() == block_len {
                self.emit_block();
            }
        }

        if input.is_exhausted() && !self.finished {
            if !self.block.is_empty() {
                self.emit_block();
            }
            self.finished = true;
        }

        self.queue.drain_into(output);
        if self.finished && self.queue.is_empty() {
            Ok(JobStatus::Done)
        } else {
            Ok(JobStatus::Blocked)
        }
    }
}

/// Job that parses a signature stream into a [`Signature`].
///
/// Produces no output; take the result with [`into_signature`](Self::into_signature).
#[derive(Debug, Default)]
pub struct LoadSignatureJob {
    field: FieldBuffer,
    signature: Option<Signature>,
    done: bool,
}

impl LoadSignatureJob {
    /// Start loading.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The loaded signature.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` if the job has not completed.
    pub fn into_signature(self) -> Result<Signature> {
        match self.signature {
            Some(signature) if self.done => Ok(signature),
            _ => Err(StreamError::InvalidSignature(
                "signature stream incomplete".to_string(),
            )),
        }
    }
}

impl Job for LoadSignatureJob {
    fn step(&mut self, input: &mut Window, _output: &mut Window) -> Result<JobStatus> {
        while !input.is_empty() {
            match self.signature.as_ref().map(|s| s.params) {
                None => {
                    let Some(head) = self.field.fill(input, SIGNATURE_HEADER_LEN) else {
                        break;
                    };
                    let params = SignatureParams::decode_header(head)?;
                    self.field.clear();
                    self.signature = Some(Signature::new(params));
                }
                Some(params) => {
                    let Some(record) = self.field.fill(input, params.record_len()) else {
                        break;
                    };
                    let weak_hash = be_u32(&record[..4]);
                    let strong_hash = StrongHash::from_prefix(&record[4..]);
                    self.field.clear();
                    if let Some(signature) = self.signature.as_mut() {
                        #[allow(clippy::cast_possible_truncation)]
                        let index = signature.blocks.len() as u32;
                        signature.blocks.push(BlockSignature {
                            index,
                            weak_hash,
                            strong_hash,
                        });
                    }
                }
            }
        }

        if !input.is_exhausted() {
            return Ok(JobStatus::Blocked);
        }
        if self.signature.is_none() {
            return Err(StreamError::InvalidSignature(
                "stream ended before signature header".to_string(),
            ));
        }
        if self.field.is_partial() {
            return Err(StreamError::InvalidSignature(
                "stream ended inside a block record".to_string(),
            ));
        }
        self.done = true;
        Ok(JobStatus::Done)
    }
}
