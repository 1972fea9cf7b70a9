//! Audiosync core - progressive lag estimation between two audio streams.
//!
//! Two producers fill two append-only sample buffers concurrently: one with
//! live capture of the desktop output, one with a decode of a remotely
//! fetched stream. After each of a short ladder of growing prefix lengths,
//! the matcher runs an FFT-based circular cross-correlation over both
//! prefixes and stops early once the correlation peak is confident enough.
//!
//! - [`correlator`] - the FFT cross-correlation kernel
//! - [`buffer`] - single-writer sample buffers with snapshot reads
//! - [`coordinator`] - watermarks, stop flag, and the progress condvar
//! - [`ladder`] - the escalating interval sequence
//! - [`producer`] - the contract both stream backends run under
//! - [`matcher`] - per-interval match attempts and early termination
//! - [`supervisor`] - thread lifecycle and the final [`RunReport`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use audiosync_core::{supervisor, SyncConfig, RunOutcome};
//!
//! let report = supervisor::run(capture_source, download_source, SyncConfig::default())?;
//! if let RunOutcome::Matched { lag, confidence } = report.outcome {
//!     println!("stream trails playback by {lag} samples ({confidence:.2})");
//! }
//! ```

pub mod buffer;
pub mod coordinator;
pub mod correlator;
pub mod ladder;
pub mod matcher;
pub mod producer;
pub mod supervisor;

pub use buffer::{BufferError, BufferReader, BufferWriter, sample_buffer};
pub use coordinator::{Channel, Coordinator, Failure, RungWait};
pub use correlator::{CorrelateError, Correlation, Correlator};
pub use ladder::{IntervalLadder, LadderError};
pub use matcher::{MatchOutcome, Matcher};
pub use producer::{SampleSource, SourceError};
pub use supervisor::{RunOutcome, RunReport, Session, SetupError, StopHandle, SyncConfig};

/// Sample rate every stream must deliver, fixed at build time.
///
/// Both producers source mono `f32` PCM at this rate; backends that cannot
/// are expected to resample or reject the stream.
pub const SAMPLE_RATE: u32 = 48_000;

/// Default confidence a correlation peak must reach to accept a lag
/// estimate. Confidence is normalized (an exact copy scores close to 1.0),
/// so one threshold applies uniformly across intervals and input levels.
pub const MIN_CONFIDENCE: f32 = 0.5;
