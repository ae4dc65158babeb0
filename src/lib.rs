//! # Deltastream
//!
//! Streaming delta transfer over a framed byte stream.
//!
//! Deltastream moves a file between two peers rsync-style: the side holding
//! the old version sends a block signature, the side holding the new version
//! answers with a delta, and the first side patches its copy. Every phase
//! runs through one bounded-memory pump.
//!
//! ## Features
//!
//! - **Framing**: 2-byte header with a 15-bit length and an end-of-stream flag
//! - **Pump**: fixed input and output windows with tail carry-over
//! - **Jobs**: incremental signature, delta and patch transforms
//! - **Rolling Checksum**: Adler-32 variant for O(1) window sliding
//! - **Strong Hash**: truncated BLAKE3 for block verification
//!
//! ## Example
//!
//! ```rust
//! use deltastream::{FileSink, FileSource, SessionBuilder, SocketSink, SocketSource};
//! use std::io::Cursor;
//!
//! let session = SessionBuilder::new().capacity(64).build().unwrap();
//! let basis = b"original file content".to_vec();
//! let modified = b"modified file content".to_vec();
//!
//! // Signature of the basis, framed as it would travel over a socket
//! let mut wire = Vec::new();
//! session
//!     .generate_signature(
//!         basis.len() as u64,
//!         &mut FileSource::new(basis.as_slice()),
//!         &mut SocketSink::new(&mut wire),
//!     )
//!     .unwrap();
//! let table = session
//!     .load_signature(&mut SocketSource::new(wire.as_slice()))
//!     .unwrap()
//!     .into_table();
//!
//! // Delta of the modified file against it
//! let mut delta = Vec::new();
//! session
//!     .generate_delta(
//!         &table,
//!         &mut FileSource::new(modified.as_slice()),
//!         &mut SocketSink::new(&mut delta),
//!     )
//!     .unwrap();
//!
//! // Patch the basis
//! let mut output = FileSink::new(Vec::new());
//! session
//!     .apply_patch(
//!         Cursor::new(basis),
//!         &mut SocketSource::new(delta.as_slice()),
//!         &mut output,
//!     )
//!     .unwrap();
//! assert_eq!(output.into_inner(), modified);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

mod checksum;
mod delta;
mod error;
pub mod frame;
mod hash;
pub mod net;
mod patch;
mod pump;
mod session;
mod signature;
mod staging;
mod transport;
mod window;

pub use checksum::RollingChecksum;
pub use delta::{DeltaJob, DeltaOp, DeltaStats, DELTA_MAGIC, MAX_LITERAL_RUN};
pub use error::{ErrorKind, Result, StreamError};
pub use frame::{FrameHeader, MAX_FRAME_LEN};
pub use hash::StrongHash;
pub use patch::PatchJob;
pub use pump::{Job, JobStatus, Pump, PumpConfig, PumpStats};
pub use session::{patched_path, Session, SessionBuilder, SessionConfig, PATCHED_SUFFIX};
pub use signature::{
    BlockSignature, LoadSignatureJob, Signature, SignatureJob, SignatureParams, SignatureTable,
    SIGNATURE_MAGIC,
};
pub use transport::{
    Basis, FileSink, FileSource, NullSink, Pulled, Sink, SocketSink, SocketSource, Source,
};
pub use window::Window;
