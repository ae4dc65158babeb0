//! Role drivers: one pump run per transfer phase.
//!
//! A [`Session`] pairs each job with its source and sink:
//!
//! | Driver              | Source          | Job                  | Sink          |
//! |---------------------|-----------------|----------------------|---------------|
//! | `send_signature`    | basis file      | [`SignatureJob`]     | socket        |
//! | `receive_signature` | socket          | [`LoadSignatureJob`] | none          |
//! | `send_delta`        | new file        | [`DeltaJob`]         | socket        |
//! | `receive_patch`     | socket          | [`PatchJob`]         | patched file  |
//!
//! The generic drivers (`generate_signature`, `load_signature`,
//! `generate_delta`, `apply_patch`) accept any [`Source`]/[`Sink`] and back
//! both the socket roles and the local file-to-file commands.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::delta::{DeltaJob, DeltaStats};
use crate::error::{Result, StreamError};
use crate::frame::MAX_FRAME_LEN;
use crate::patch::PatchJob;
use crate::pump::{Pump, PumpConfig, PumpStats};
use crate::signature::{
    LoadSignatureJob, Signature, SignatureJob, SignatureParams, SignatureTable, MAX_BLOCK_LEN,
    MAX_STRONG_LEN, MIN_BLOCK_LEN, MIN_STRONG_LEN,
};
use crate::transport::{
    Basis, FileSink, FileSource, NullSink, Sink, SocketSink, SocketSource, Source,
};

/// Suffix appended to the basis file name for the patched output.
pub const PATCHED_SUFFIX: &str = ".new";

/// Configuration for transfer sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Window capacity for every pump run (1-32767).
    pub capacity: usize,
    /// Block length override; recommended from the basis size when `None`.
    pub block_len: Option<u32>,
    /// Strong hash length override; recommended from the basis size when `None`.
    pub strong_len: Option<u32>,
    /// Verify the delta checksum after patching.
    pub verify_checksum: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_FRAME_LEN,
            block_len: None,
            strong_len: None,
            verify_checksum: true,
        }
    }
}

impl SessionConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns `Argument` for a bad capacity, `InvalidBlockSize` or
    /// `InvalidHashLength` for out-of-range overrides.
    pub fn validate(&self) -> Result<()> {
        PumpConfig {
            capacity: self.capacity,
        }
        .validate()?;

        if let Some(len) = self.block_len {
            if !(MIN_BLOCK_LEN..=MAX_BLOCK_LEN).contains(&len) {
                return Err(StreamError::InvalidBlockSize(len));
            }
        }
        if let Some(len) = self.strong_len {
            if !(MIN_STRONG_LEN..=MAX_STRONG_LEN).contains(&len) {
                return Err(StreamError::InvalidHashLength(len));
            }
        }
        Ok(())
    }

    /// Signature parameters for a basis of `file_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is out of range.
    pub fn signature_params(&self, file_size: u64) -> Result<SignatureParams> {
        let recommended = SignatureParams::recommended(file_size);
        SignatureParams::new(
            self.block_len.unwrap_or(recommended.block_len),
            self.strong_len.unwrap_or(recommended.strong_len),
        )
    }
}

/// Builder for sessions with custom configuration.
///
/// # Example
///
/// ```rust
/// use deltastream::SessionBuilder;
///
/// let session = SessionBuilder::new()
///     .capacity(4096)
///     .block_len(1024)
///     .build()
///     .unwrap();
/// assert_eq!(session.config().capacity, 4096);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the window capacity.
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Override the block length.
    #[must_use]
    pub const fn block_len(mut self, len: u32) -> Self {
        self.config.block_len = Some(len);
        self
    }

    /// Override the strong hash length.
    #[must_use]
    pub const fn strong_len(mut self, len: u32) -> Self {
        self.config.strong_len = Some(len);
        self
    }

    /// Enable or disable checksum verification after patching.
    #[must_use]
    pub const fn verify_checksum(mut self, verify: bool) -> Self {
        self.config.verify_checksum = verify;
        self
    }

    /// Validate and build the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<Session> {
        self.config.validate()?;
        let pump = Pump::new(PumpConfig {
            capacity: self.config.capacity,
        })?;
        Ok(Session {
            config: self.config,
            pump,
        })
    }
}

/// Transfer engine running the role drivers.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    config: SessionConfig,
    pump: Pump,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            config: SessionConfig::default(),
            pump: Pump::default(),
        }
    }
}

impl Session {
    /// Create a session with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stream the signature of a `file_size`-byte basis from `source` to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if any pump phase fails.
    pub fn generate_signature<S, K>(
        &self,
        file_size: u64,
        source: &mut S,
        sink: &mut K,
    ) -> Result<PumpStats>
    where
        S: Source + ?Sized,
        K: Sink + ?Sized,
    {
        let params = self.config.signature_params(file_size)?;
        let mut job = SignatureJob::new(params)?;
        let stats = self.pump.run(source, &mut job, sink)?;
        info!(
            file_size,
            block_len = params.block_len,
            strong_len = params.strong_len,
            blocks = job.blocks(),
            bytes_out = stats.bytes_out,
            "signature sent"
        );
        Ok(stats)
    }

    /// Read a signature stream from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is malformed or a pump phase fails.
    pub fn load_signature<S>(&self, source: &mut S) -> Result<Signature>
    where
        S: Source + ?Sized,
    {
        let mut job = LoadSignatureJob::new();
        let stats = self.pump.run(source, &mut job, &mut NullSink)?;
        let signature = job.into_signature()?;
        info!(
            blocks = signature.block_count(),
            block_len = signature.params.block_len,
            bytes_in = stats.bytes_in,
            "signature received"
        );
        Ok(signature)
    }

    /// Stream the delta of `source` against `table` to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if any pump phase fails.
    pub fn generate_delta<S, K>(
        &self,
        table: &SignatureTable,
        source: &mut S,
        sink: &mut K,
    ) -> Result<DeltaStats>
    where
        S: Source + ?Sized,
        K: Sink + ?Sized,
    {
        let mut job = DeltaJob::new(table);
        let stats = self.pump.run(source, &mut job, sink)?;
        let delta = job.stats();
        info!(
            copy_ops = delta.copy_ops,
            literal_ops = delta.literal_ops,
            bytes_copied = delta.bytes_copied,
            bytes_literal = delta.bytes_literal,
            bytes_out = stats.bytes_out,
            "delta sent"
        );
        Ok(delta)
    }

    /// Apply the delta read from `source` to `basis`, writing to `sink`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if the delta is malformed, the basis cannot be read,
    /// or a pump phase fails.
    pub fn apply_patch<B, S, K>(&self, basis: B, source: &mut S, sink: &mut K) -> Result<u64>
    where
        B: Basis,
        S: Source + ?Sized,
        K: Sink + ?Sized,
    {
        let mut job = PatchJob::new(basis, self.config.verify_checksum)?;
        let stats = self.pump.run(source, &mut job, sink)?;
        info!(
            basis_size = job.basis_size(),
            written = job.written(),
            bytes_in = stats.bytes_in,
            "patch applied"
        );
        Ok(job.written())
    }

    /// Send the signature of the basis at `path` over `socket`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the send fails.
    pub fn send_signature<W: Write>(&self, path: &Path, socket: W) -> Result<PumpStats> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        self.generate_signature(
            file_size,
            &mut FileSource::new(file),
            &mut SocketSink::new(socket),
        )
    }

    /// Receive a signature from `socket` and build its lookup index.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is malformed or the receive fails.
    pub fn receive_signature<R: Read>(&self, socket: R) -> Result<SignatureTable> {
        let signature = self.load_signature(&mut SocketSource::new(socket))?;
        Ok(signature.into_table())
    }

    /// Send the delta of the file at `path` against `table` over `socket`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the send fails.
    pub fn send_delta<W: Write>(
        &self,
        path: &Path,
        table: &SignatureTable,
        socket: W,
    ) -> Result<DeltaStats> {
        let file = File::open(path)?;
        self.generate_delta(table, &mut FileSource::new(file), &mut SocketSink::new(socket))
    }

    /// Receive a delta from `socket` and write the patched basis to `output`.
    ///
    /// A failed patch leaves the partial output on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the delta is malformed, a file cannot be opened,
    /// or the receive fails.
    pub fn receive_patch<R: Read>(&self, socket: R, basis: &Path, output: &Path) -> Result<u64> {
        let basis = File::open(basis)?;
        let out = File::create(output)?;
        self.apply_patch(basis, &mut SocketSource::new(socket), &mut FileSink::new(out))
    }

    /// Write the signature of the file at `basis` into `output`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be opened or a pump phase fails.
    pub fn signature_file(&self, basis: &Path, output: &Path) -> Result<PumpStats> {
        let file = File::open(basis)?;
        let file_size = file.metadata()?.len();
        let out = File::create(output)?;
        self.generate_signature(file_size, &mut FileSource::new(file), &mut FileSink::new(out))
    }

    /// Write the delta of `new_file` against the signature file `signature` into `output`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be opened, the signature is
    /// malformed, or a pump phase fails.
    pub fn delta_file(
        &self,
        signature: &Path,
        new_file: &Path,
        output: &Path,
    ) -> Result<DeltaStats> {
        let table = self
            .load_signature(&mut FileSource::new(File::open(signature)?))?
            .into_table();
        let source = File::open(new_file)?;
        let out = File::create(output)?;
        self.generate_delta(&table, &mut FileSource::new(source), &mut FileSink::new(out))
    }

    /// Apply the delta file `delta` to `basis`, writing `output`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be opened, the delta is malformed,
    /// or a pump phase fails.
    pub fn patch_file(&self, basis: &Path, delta: &Path, output: &Path) -> Result<u64> {
        let basis = File::open(basis)?;
        let source = File::open(delta)?;
        let out = File::create(output)?;
        self.apply_patch(basis, &mut FileSource::new(source), &mut FileSink::new(out))
    }
}

/// Output path for the patched copy of `path`: its name with `suffix` appended.
#[must_use]
pub fn patched_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
