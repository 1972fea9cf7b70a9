//! Thread lifecycle for one synchronization run.
//!
//! The supervisor allocates both buffers, spawns one named thread per
//! producer, drives the matcher on the calling thread, and always raises
//! the stop flag on the way out so producers never outlive the decision.
//! Producers are then joined with a bounded timeout; one that fails to
//! exit (a backend stuck in a blocking read) is detached and reported in
//! the [`RunReport`] rather than treated as fatal.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::buffer::sample_buffer;
use crate::coordinator::{Channel, Coordinator};
use crate::ladder::IntervalLadder;
use crate::matcher::{MatchOutcome, Matcher};
use crate::producer::{self, SampleSource};
use crate::{MIN_CONFIDENCE, SAMPLE_RATE};

/// How often a pending join re-checks the producer thread.
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// The escalating correlation intervals; the last rung fixes the
    /// buffer capacity.
    pub ladder: IntervalLadder,
    /// Confidence a correlation peak must reach to accept a lag.
    pub min_confidence: f32,
    /// How long to wait for each producer to exit after the stop flag.
    pub join_timeout: Duration,
}

impl SyncConfig {
    /// Defaults with a caller-supplied ladder; the join timeout scales to
    /// twice the last interval in wall-clock.
    pub fn with_ladder(ladder: IntervalLadder) -> Self {
        let join_timeout = default_join_timeout(&ladder);
        Self {
            ladder,
            min_confidence: MIN_CONFIDENCE,
            join_timeout,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::with_ladder(IntervalLadder::default())
    }
}

fn default_join_timeout(ladder: &IntervalLadder) -> Duration {
    let longest = Duration::from_secs_f64(ladder.capacity() as f64 / f64::from(SAMPLE_RATE));
    longest * 2
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// A correlation peak cleared the threshold.
    Matched {
        /// Samples by which the download stream trails the capture stream;
        /// negative when it leads.
        lag: i64,
        /// Normalized confidence at the winning interval.
        confidence: f32,
    },
    /// The ladder was exhausted (or cut short) without a confident peak.
    NoMatch,
    /// A producer backend failed before a match was found.
    Failed {
        /// Which producer failed.
        channel: Channel,
        /// The backend's description of the failure.
        reason: String,
    },
}

/// What a run concluded, plus lifecycle annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// The terminal outcome.
    pub outcome: RunOutcome,
    /// Producers that did not exit within the join timeout and were
    /// detached. Non-fatal, but worth surfacing: their backends may still
    /// hold resources.
    pub stalled: Vec<Channel>,
}

/// Failures before the run proper starts.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The OS refused a producer thread.
    #[error("failed to spawn {channel} producer thread: {source}")]
    Spawn {
        /// The producer that could not be spawned.
        channel: Channel,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Requests a cooperative stop of a running session from another thread
/// (for example a SIGINT handler).
#[derive(Clone)]
pub struct StopHandle {
    coordinator: Arc<Coordinator>,
}

impl StopHandle {
    /// Raise the stop flag; producers and matcher wind down cooperatively.
    pub fn stop(&self) {
        self.coordinator.request_stop();
    }
}

/// One synchronization run: owns the coordinator so a [`StopHandle`] can
/// be taken before the run starts.
pub struct Session {
    config: SyncConfig,
    coordinator: Arc<Coordinator>,
}

impl Session {
    /// Prepare a session with the given tunables.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            coordinator: Arc::new(Coordinator::new()),
        }
    }

    /// A handle that can stop this session from any thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            coordinator: Arc::clone(&self.coordinator),
        }
    }

    /// Run to completion: spawn producers, drive the matcher, join.
    pub fn run<A, B>(self, capture: A, download: B) -> Result<RunReport, SetupError>
    where
        A: SampleSource + 'static,
        B: SampleSource + 'static,
    {
        let Session {
            config,
            coordinator,
        } = self;
        let capacity = config.ladder.capacity();
        let (capture_writer, capture_reader) = sample_buffer(capacity);
        let (download_writer, download_reader) = sample_buffer(capacity);

        tracing::debug!(
            capacity,
            intervals = config.ladder.len(),
            min_confidence = config.min_confidence,
            "starting synchronization run"
        );

        let capture_handle = spawn_producer(
            capture,
            capture_writer,
            Channel::Capture,
            &config.ladder,
            &coordinator,
        )?;
        let download_handle = match spawn_producer(
            download,
            download_writer,
            Channel::Download,
            &config.ladder,
            &coordinator,
        ) {
            Ok(handle) => handle,
            Err(err) => {
                coordinator.request_stop();
                join_within(capture_handle, Channel::Capture, config.join_timeout);
                return Err(err);
            }
        };

        let mut matcher = Matcher::new(config.ladder.clone(), config.min_confidence);
        let outcome = matcher.run(&capture_reader, &download_reader, &coordinator);

        // The matcher raises the flag on every path; belt and braces for
        // future return paths.
        coordinator.request_stop();

        let deadline = Instant::now() + config.join_timeout;
        let mut stalled = Vec::new();
        for (channel, handle) in [
            (Channel::Capture, capture_handle),
            (Channel::Download, download_handle),
        ] {
            if !join_before(handle, channel, deadline) {
                stalled.push(channel);
            }
        }

        let outcome = match outcome {
            MatchOutcome::Matched { lag, confidence } => {
                tracing::info!(lag, confidence, "lag estimate accepted");
                RunOutcome::Matched { lag, confidence }
            }
            MatchOutcome::NoMatch => match coordinator.failure() {
                Some(failure) => {
                    tracing::error!(channel = %failure.channel, reason = %failure.reason, "run failed");
                    RunOutcome::Failed {
                        channel: failure.channel,
                        reason: failure.reason,
                    }
                }
                None => {
                    tracing::info!("ladder exhausted without a confident peak");
                    RunOutcome::NoMatch
                }
            },
        };

        Ok(RunReport { outcome, stalled })
    }
}

/// Convenience wrapper for callers that do not need a [`StopHandle`].
pub fn run<A, B>(capture: A, download: B, config: SyncConfig) -> Result<RunReport, SetupError>
where
    A: SampleSource + 'static,
    B: SampleSource + 'static,
{
    Session::new(config).run(capture, download)
}

fn spawn_producer<S: SampleSource + 'static>(
    source: S,
    writer: crate::buffer::BufferWriter,
    channel: Channel,
    ladder: &IntervalLadder,
    coordinator: &Arc<Coordinator>,
) -> Result<JoinHandle<()>, SetupError> {
    let ladder = ladder.clone();
    let coordinator = Arc::clone(coordinator);
    thread::Builder::new()
        .name(format!("{channel}-producer"))
        .spawn(move || producer::run(source, writer, channel, &ladder, &coordinator))
        .map_err(|source| SetupError::Spawn { channel, source })
}

fn join_within(handle: JoinHandle<()>, channel: Channel, timeout: Duration) -> bool {
    join_before(handle, channel, Instant::now() + timeout)
}

/// Join a producer before `deadline`. On timeout the handle is dropped,
/// detaching the thread, and `false` is returned.
fn join_before(handle: JoinHandle<()>, channel: Channel, deadline: Instant) -> bool {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(%channel, "producer did not exit within the join timeout");
            return false;
        }
        thread::sleep(JOIN_POLL);
    }
    // The producer loop neither panics nor returns a value; a join error
    // here would mean a bug in a source's Drop, which we still absorb.
    let _ = handle.join();
    true
}
