//! Per-interval match attempts and the early-stop decision.
//!
//! The matcher walks the interval ladder in order. For each rung it waits
//! until both streams have finalized that many samples, snapshots the two
//! prefixes, zero-pads them past twice the prefix length (so the circular
//! correlation behaves linearly over the lags of interest), and correlates.
//! The first rung whose confidence clears the threshold wins; the stop
//! flag goes up and the signed lag is returned. Numeric trouble on one
//! rung skips that rung only.

use crate::buffer::BufferReader;
use crate::coordinator::{Coordinator, RungWait};
use crate::correlator::Correlator;
use crate::ladder::IntervalLadder;

/// What a completed matcher pass concluded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    /// A correlation peak cleared the confidence threshold.
    Matched {
        /// Samples by which the download stream trails the capture stream;
        /// negative when it leads.
        lag: i64,
        /// Normalized peak confidence at the winning interval.
        confidence: f32,
    },
    /// Every reachable interval was tried without clearing the threshold.
    NoMatch,
}

/// Drives the interval ladder over two sample buffers.
pub struct Matcher {
    ladder: IntervalLadder,
    min_confidence: f32,
    correlator: Correlator,
}

impl Matcher {
    /// A matcher for the given ladder and confidence threshold.
    pub fn new(ladder: IntervalLadder, min_confidence: f32) -> Self {
        Self {
            ladder,
            min_confidence,
            correlator: Correlator::new(),
        }
    }

    /// Run the ladder to completion or first match.
    ///
    /// Raises the stop flag before returning, whatever the outcome, so
    /// producers never outlive the decision.
    pub fn run(
        &mut self,
        capture: &BufferReader,
        download: &BufferReader,
        coordinator: &Coordinator,
    ) -> MatchOutcome {
        let rungs = self.ladder.rungs().to_vec();
        for (rung, interval) in rungs.into_iter().enumerate() {
            match coordinator.wait_for(interval) {
                RungWait::Ready => {}
                RungWait::Stopped => {
                    tracing::debug!(rung, interval, "stopped while waiting for interval");
                    return MatchOutcome::NoMatch;
                }
                RungWait::Starved => {
                    tracing::debug!(rung, interval, "a stream ended below this interval");
                    coordinator.request_stop();
                    return MatchOutcome::NoMatch;
                }
            }

            let (Ok(mut a), Ok(mut b)) = (capture.snapshot(interval), download.snapshot(interval))
            else {
                // A published watermark always covers its interval; treat a
                // short snapshot like any other per-rung failure.
                continue;
            };

            let padded = padded_len(interval);
            a.resize(padded, 0.0);
            b.resize(padded, 0.0);

            match self.correlator.correlate(&a, &b) {
                Ok(correlation) => {
                    let lag = fold_lag(correlation.peak_index, padded);
                    tracing::debug!(
                        rung,
                        interval,
                        lag,
                        confidence = correlation.confidence,
                        "match attempt"
                    );
                    if correlation.confidence >= self.min_confidence {
                        coordinator.request_stop();
                        return MatchOutcome::Matched {
                            lag,
                            confidence: correlation.confidence,
                        };
                    }
                }
                Err(err) => {
                    tracing::warn!(rung, interval, error = %err, "skipping interval");
                }
            }
        }

        coordinator.request_stop();
        MatchOutcome::NoMatch
    }
}

/// Transform length for an interval: past `2n − 1` so no lag in
/// `[-(n−1), n−1]` wraps, rounded up to a power of two for the FFT.
pub fn padded_len(interval: usize) -> usize {
    (2 * interval - 1).next_power_of_two()
}

/// Fold a circular peak index into a signed lag: indices past the midpoint
/// are negative lags wrapped around the transform length.
fn fold_lag(peak_index: usize, len: usize) -> i64 {
    if peak_index <= len / 2 {
        peak_index as i64
    } else {
        peak_index as i64 - len as i64
    }
}
