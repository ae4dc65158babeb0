//! The streaming pump: source → job → sink through two fixed windows.
//!
//! One iteration refills the input window from the source (unless the stream
//! already ended), steps the job once, and drains whatever output the job
//! produced into the sink. The loop ends when the job reports
//! [`JobStatus::Done`], after one final drain.

use tracing::{debug, warn};

use crate::error::{Result, StreamError};
use crate::frame::MAX_FRAME_LEN;
use crate::transport::{Sink, Source};
use crate::window::Window;

/// What a job reports after one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Needs more input and/or an empty output window before it can continue.
    Blocked,
    /// The transform is complete.
    Done,
}

/// An incremental transform driven one step at a time.
///
/// A step consumes bytes from the front of `input` and appends bytes to the
/// back of `output`. It must not block or perform stream I/O. The input
/// window's end flag tells the job that no more bytes will arrive, so it can
/// flush whatever it still holds.
///
/// Returning an error is the job's failure state; the pump aborts.
pub trait Job {
    /// Advance the transform.
    ///
    /// # Errors
    ///
    /// Returns an error if the transform cannot continue.
    fn step(&mut self, input: &mut Window, output: &mut Window) -> Result<JobStatus>;
}

/// Pump configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    /// Size of both the input and the output window.
    pub capacity: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_FRAME_LEN,
        }
    }
}

impl PumpConfig {
    /// Check that the capacity is usable with framed sinks.
    ///
    /// # Errors
    ///
    /// Returns `Argument` if the capacity is zero or larger than one frame.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.capacity > MAX_FRAME_LEN {
            return Err(StreamError::Argument(format!(
                "window capacity must be 1-{MAX_FRAME_LEN}, got {}",
                self.capacity
            )));
        }
        Ok(())
    }
}

/// Counters from one pump run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Loop iterations.
    pub iterations: u64,
    /// Calls to [`Source::pull`].
    pub pulls: u64,
    /// Bytes pulled from the source.
    pub bytes_in: u64,
    /// Bytes pushed to the sink.
    pub bytes_out: u64,
}

/// The generic source → job → sink engine.
///
/// Windows are allocated per run, so one `Pump` can serve any number of
/// runs, including concurrent ones on different threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pump {
    config: PumpConfig,
}

impl Pump {
    /// Create a pump.
    ///
    /// # Errors
    ///
    /// Returns `Argument` if the configuration is invalid.
    pub fn new(config: PumpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create a pump with the given window capacity.
    ///
    /// # Errors
    ///
    /// Returns `Argument` if the capacity is invalid.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::new(PumpConfig { capacity })
    }

    /// Window capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Run `job` to completion.
    ///
    /// # Errors
    ///
    /// Fails on the first refill, step or drain error. Nothing is retried.
    pub fn run<S, J, K>(&self, source: &mut S, job: &mut J, sink: &mut K) -> Result<PumpStats>
    where
        S: Source + ?Sized,
        J: Job + ?Sized,
        K: Sink + ?Sized,
    {
        let drains = sink.accepts_output();
        let mut input = Window::with_capacity(self.config.capacity);
        let mut output = Window::with_capacity(if drains { self.config.capacity } else { 0 });
        let mut stats = PumpStats::default();

        loop {
            stats.iterations += 1;

            if !input.is_end() {
                input.compact();
                if input.room() > 0 {
                    let pulled = source.pull(input.spare_mut()).map_err(|e| {
                        warn!(phase = "refill", error = %e, "pump aborted");
                        e
                    })?;
                    stats.pulls += 1;
                    input.commit(pulled.len);
                    stats.bytes_in += pulled.len as u64;
                    if pulled.end || pulled.len == 0 {
                        input.mark_end();
                        debug!(bytes_in = stats.bytes_in, "source reached end of stream");
                    }
                }
            }

            let status = job.step(&mut input, &mut output).map_err(|e| {
                warn!(phase = "step", error = %e, "pump aborted");
                e
            })?;
            let done = status == JobStatus::Done;

            if drains && (done || !output.is_empty()) {
                sink.push(output.data(), done).map_err(|e| {
                    warn!(phase = "drain", error = %e, "pump aborted");
                    e
                })?;
                stats.bytes_out += output.len() as u64;
                output.clear();
            }

            if done {
                debug!(
                    iterations = stats.iterations,
                    pulls = stats.pulls,
                    bytes_in = stats.bytes_in,
                    bytes_out = stats.bytes_out,
                    "pump finished"
                );
                return Ok(stats);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FileSink, FileSource, NullSink, Pulled};
    use std::io::Cursor;

    /// Consumes whole records of `record` bytes and emits each reversed.
    ///
    /// Finishes once the input has ended and fewer than `record` bytes remain;
    /// a short final record is emitted as-is.
    struct Reverser {
        record: usize,
        pending: Vec<u8>,
        seen_tails: Vec<Vec<u8>>,
    }

    impl Reverser {
        fn new(record: usize) -> Self {
            Self {
                record,
                pending: Vec::new(),
                seen_tails: Vec::new(),
            }
        }
    }

    impl Job for Reverser {
        fn step(&mut self, input: &mut Window, output: &mut Window) -> Result<JobStatus> {
            let written = output.write(&self.pending);
            self.pending.drain(..written);
            if !self.pending.is_empty() {
                return Ok(JobStatus::Blocked);
            }

            while input.len() >= self.record {
                let mut rec = input.data()[..self.record].to_vec();
                input.consume(self.record);
                rec.reverse();
                self.pending.extend_from_slice(&rec);
            }
            if !input.is_empty() {
                self.seen_tails.push(input.data().to_vec());
            }
            if input.is_end() && input.len() < self.record {
                let tail = input.data().to_vec();
                input.consume(tail.len());
                self.pending.extend_from_slice(&tail);
            }

            let written = output.write(&self.pending);
            self.pending.drain(..written);
            if input.is_exhausted() && self.pending.is_empty() {
                Ok(JobStatus::Done)
            } else {
                Ok(JobStatus::Blocked)
            }
        }
    }

    fn reversed_records(data: &[u8], record: usize) -> Vec<u8> {
        data.chunks(record)
            .flat_map(|chunk| {
                if chunk.len() == record {
                    chunk.iter().rev().copied().collect::<Vec<_>>()
                } else {
                    chunk.to_vec()
                }
            })
            .collect()
    }

    /// Source that records every call and fails if pulled after its end.
    struct CountingSource {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
        pulls: usize,
        ended: bool,
    }

    impl Source for CountingSource {
        fn pull(&mut self, buf: &mut [u8]) -> Result<Pulled> {
            assert!(!self.ended, "pulled after end of stream");
            assert!(!buf.is_empty(), "pulled with no room");
            self.pulls += 1;
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            if n == 0 {
                self.ended = true;
            }
            Ok(Pulled { len: n, end: false })
        }
    }

    struct FailingJob;

    impl Job for FailingJob {
        fn step(&mut self, _input: &mut Window, _output: &mut Window) -> Result<JobStatus> {
            Err(StreamError::TransformFailed("corrupt input".to_string()))
        }
    }

    /// Finishes immediately without output.
    struct NoopJob;

    impl Job for NoopJob {
        fn step(&mut self, _input: &mut Window, _output: &mut Window) -> Result<JobStatus> {
            Ok(JobStatus::Done)
        }
    }

    #[test]
    fn config_validation() {
        assert!(Pump::with_capacity(0).is_err());
        assert!(Pump::with_capacity(MAX_FRAME_LEN + 1).is_err());
        assert_eq!(Pump::with_capacity(4).unwrap().capacity(), 4);
        assert_eq!(Pump::default().capacity(), MAX_FRAME_LEN);
    }

    #[test]
    fn output_is_exact_concatenation_with_tiny_windows() {
        let data: Vec<u8> = (0..=255).cycle().take(1000).collect();
        let pump = Pump::with_capacity(4).unwrap();
        let mut source = FileSource::new(Cursor::new(data.clone()));
        let mut sink = FileSink::new(Vec::new());
        let mut job = Reverser::new(3);

        let stats = pump.run(&mut source, &mut job, &mut sink).unwrap();

        assert_eq!(sink.into_inner(), reversed_records(&data, 3));
        assert_eq!(stats.bytes_in, 1000);
        assert_eq!(stats.bytes_out, 1000);
    }

    #[test]
    fn leftover_tail_carried_over_in_order() {
        // Source delivers 2 bytes at a time, job consumes 3-byte records:
        // every other refill leaves a 1- or 2-byte tail in the window.
        let data = b"abcdefghijklmnopq".to_vec();
        let pump = Pump::with_capacity(4).unwrap();
        let mut source = CountingSource {
            data: data.clone(),
            pos: 0,
            chunk: 2,
            pulls: 0,
            ended: false,
        };
        let mut sink = FileSink::new(Vec::new());
        let mut job = Reverser::new(3);

        pump.run(&mut source, &mut job, &mut sink).unwrap();

        assert_eq!(sink.into_inner(), b"cbafedihglkjonmpq".to_vec());
        assert!(!job.seen_tails.is_empty());
        for tail in &job.seen_tails {
            let at = data
                .windows(tail.len())
                .position(|w| w == tail.as_slice());
            assert!(at.is_some(), "tail {tail:?} not a contiguous run of input");
        }
    }

    #[test]
    fn source_not_pulled_after_end_of_stream() {
        let pump = Pump::with_capacity(8).unwrap();
        let mut source = CountingSource {
            data: vec![1u8; 20],
            pos: 0,
            chunk: 5,
            pulls: 0,
            ended: false,
        };
        let mut sink = FileSink::new(Vec::new());
        let mut job = Reverser::new(4);

        let stats = pump.run(&mut source, &mut job, &mut sink).unwrap();

        // The CountingSource asserts on any pull after its zero-length read.
        assert!(source.ended);
        assert_eq!(stats.pulls, source.pulls as u64);
    }

    #[test]
    fn job_failure_aborts() {
        let pump = Pump::default();
        let mut source = FileSource::new(Cursor::new(b"data".to_vec()));
        let mut sink = FileSink::new(Vec::new());
        let err = pump.run(&mut source, &mut FailingJob, &mut sink).unwrap_err();
        assert!(matches!(err, StreamError::TransformFailed(_)));
        assert!(sink.into_inner().is_empty());
    }

    #[test]
    fn drain_failure_aborts() {
        let mut storage = [0u8; 2];
        let pump = Pump::with_capacity(16).unwrap();
        let mut source = FileSource::new(Cursor::new(b"abcdefgh".to_vec()));
        let mut sink = FileSink::new(&mut storage[..]);
        let err = pump
            .run(&mut source, &mut Reverser::new(4), &mut sink)
            .unwrap_err();
        assert!(matches!(err, StreamError::Io(_)));
    }

    #[test]
    fn null_sink_gets_no_output_window() {
        struct AssertNoOutput;
        impl Job for AssertNoOutput {
            fn step(&mut self, input: &mut Window, output: &mut Window) -> Result<JobStatus> {
                assert_eq!(output.capacity(), 0);
                let n = input.len();
                input.consume(n);
                Ok(if input.is_end() {
                    JobStatus::Done
                } else {
                    JobStatus::Blocked
                })
            }
        }

        let pump = Pump::with_capacity(4).unwrap();
        let mut source = FileSource::new(Cursor::new(vec![0u8; 10]));
        let stats = pump
            .run(&mut source, &mut AssertNoOutput, &mut NullSink)
            .unwrap();
        assert_eq!(stats.bytes_in, 10);
        assert_eq!(stats.bytes_out, 0);
    }

    #[test]
    fn done_without_output_still_pushes_final_marker() {
        struct Recorder(Vec<(usize, bool)>);
        impl Sink for Recorder {
            fn push(&mut self, chunk: &[u8], last: bool) -> Result<()> {
                self.0.push((chunk.len(), last));
                Ok(())
            }
        }

        let pump = Pump::default();
        let mut source = FileSource::new(Cursor::new(Vec::new()));
        let mut sink = Recorder(Vec::new());
        pump.run(&mut source, &mut NoopJob, &mut sink).unwrap();
        assert_eq!(sink.0, vec![(0, true)]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::transport::{FileSink, FileSource};
    use proptest::prelude::*;
    use std::io::Cursor;

    /// Copies input to output unchanged, as much as fits.
    struct Passthrough;

    impl Job for Passthrough {
        fn step(&mut self, input: &mut Window, output: &mut Window) -> Result<JobStatus> {
            let n = output.write(input.data());
            input.consume(n);
            Ok(if input.is_exhausted() {
                JobStatus::Done
            } else {
                JobStatus::Blocked
            })
        }
    }

    proptest! {
        /// Output equals input for any capacity
        #[test]
        fn passthrough_is_identity(
            data in prop::collection::vec(any::<u8>(), 0..5000),
            capacity in 1usize..64
        ) {
            let pump = Pump::with_capacity(capacity).unwrap();
            let mut source = FileSource::new(Cursor::new(data.clone()));
            let mut sink = FileSink::new(Vec::new());
            let stats = pump.run(&mut source, &mut Passthrough, &mut sink).unwrap();
            prop_assert_eq!(stats.bytes_out, data.len() as u64);
            prop_assert_eq!(sink.into_inner(), data);
        }
    }
}
