//! The uniform loop both stream backends run under.
//!
//! A producer pulls mono samples from its backend in bounded chunks,
//! appends them to its buffer, publishes the watermark, and wakes the
//! matcher whenever the watermark crosses the next interval boundary. The
//! stop flag is polled between backend reads, so a stop request takes
//! effect within one chunk of backend latency. End of stream before the
//! first interval is a fatal adapter condition; after it, a normal end of
//! input.

use crate::buffer::BufferWriter;
use crate::coordinator::{Channel, Coordinator};
use crate::ladder::IntervalLadder;

/// Samples requested from the backend per read. Bounds the latency of
/// stop-flag polling to one chunk (~85 ms at 48 kHz).
pub const READ_CHUNK: usize = 4096;

/// Error reported by a producer backend.
///
/// Backends keep their own typed errors; at the contract boundary only the
/// human-readable reason survives, which is what the run outcome carries.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SourceError(String);

impl SourceError {
    /// Wrap a backend failure description.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A blocking producer backend delivering mono `f32` samples at the
/// build-time sample rate.
pub trait SampleSource: Send {
    /// Read up to `out.len()` samples, blocking until at least one is
    /// available. `Ok(0)` means the stream has ended.
    fn read(&mut self, out: &mut [f32]) -> Result<usize, SourceError>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read(&mut self, out: &mut [f32]) -> Result<usize, SourceError> {
        (**self).read(out)
    }
}

/// Drive one source against its buffer until the buffer fills, the stream
/// ends, the backend fails, or a stop is requested.
///
/// Always records the producer's exit with the coordinator (waking the
/// matcher once) and drops the source on the way out, releasing whatever
/// backend resources it holds.
pub fn run<S: SampleSource>(
    mut source: S,
    mut writer: BufferWriter,
    channel: Channel,
    ladder: &IntervalLadder,
    coordinator: &Coordinator,
) {
    let capacity = writer.capacity();
    let mut boundaries = ladder.rungs().iter().copied().peekable();
    let mut chunk = vec![0.0_f32; READ_CHUNK];
    let mut written = 0_usize;

    loop {
        if coordinator.is_stopped() {
            tracing::debug!(%channel, written, "stop requested, producer exiting");
            break;
        }
        if written == capacity {
            tracing::debug!(%channel, written, "buffer full, producer exiting");
            break;
        }

        let want = chunk.len().min(capacity - written);
        match source.read(&mut chunk[..want]) {
            Ok(0) => {
                if written < ladder.first() {
                    tracing::error!(%channel, written, "stream ended before the first interval");
                    coordinator.fail(
                        channel,
                        format!("stream ended after {written} samples, before the first interval"),
                    );
                } else {
                    tracing::debug!(%channel, written, "stream ended");
                }
                break;
            }
            Ok(count) => {
                match writer.append(&chunk[..count]) {
                    Ok(len) => written = len,
                    Err(err) => {
                        // Unreachable with the clamp above; surface it
                        // rather than losing samples silently.
                        coordinator.fail(channel, err.to_string());
                        break;
                    }
                }
                let mut crossed = false;
                while boundaries.peek().is_some_and(|&boundary| written >= boundary) {
                    boundaries.next();
                    crossed = true;
                }
                coordinator.advance(channel, written, crossed);
                if crossed {
                    tracing::debug!(%channel, watermark = written, "interval boundary reached");
                }
            }
            Err(err) => {
                tracing::error!(%channel, error = %err, "producer backend failed");
                coordinator.fail(channel, err.to_string());
                break;
            }
        }
    }

    coordinator.finish(channel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::sample_buffer;
    use crate::coordinator::RungWait;

    /// Emits a fixed sample sequence in caller-sized chunks, then EOF.
    struct SliceSource {
        data: Vec<f32>,
        pos: usize,
    }

    impl SliceSource {
        fn new(data: Vec<f32>) -> Self {
            Self { data, pos: 0 }
        }
    }

    impl SampleSource for SliceSource {
        fn read(&mut self, out: &mut [f32]) -> Result<usize, SourceError> {
            let n = out.len().min(self.data.len() - self.pos);
            out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// Emits some samples, then reports a backend failure.
    struct FailingSource {
        remaining: usize,
        reason: &'static str,
    }

    impl SampleSource for FailingSource {
        fn read(&mut self, out: &mut [f32]) -> Result<usize, SourceError> {
            if self.remaining == 0 {
                return Err(SourceError::new(self.reason));
            }
            let n = out.len().min(self.remaining);
            out[..n].fill(0.5);
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_fills_buffer_and_signals_boundaries() {
        let ladder = IntervalLadder::from_base(100, 3).unwrap();
        let (writer, reader) = sample_buffer(ladder.capacity());
        let coordinator = Coordinator::new();

        run(
            SliceSource::new(vec![0.25; 1000]),
            writer,
            Channel::Capture,
            &ladder,
            &coordinator,
        );

        // Clamped to capacity even though the source had more to give.
        assert_eq!(reader.len(), 300);
        let (capture, _) = coordinator.watermarks();
        assert_eq!(capture, 300);
        assert!(!coordinator.is_stopped());
    }

    #[test]
    fn test_eof_before_first_interval_is_a_failure() {
        let ladder = IntervalLadder::from_base(100, 3).unwrap();
        let (writer, _reader) = sample_buffer(ladder.capacity());
        let coordinator = Coordinator::new();

        run(
            SliceSource::new(vec![0.25; 40]),
            writer,
            Channel::Download,
            &ladder,
            &coordinator,
        );

        let failure = coordinator.failure().unwrap();
        assert_eq!(failure.channel, Channel::Download);
        assert!(coordinator.is_stopped());
    }

    #[test]
    fn test_eof_after_first_interval_is_a_normal_end() {
        let ladder = IntervalLadder::from_base(100, 3).unwrap();
        let (writer, reader) = sample_buffer(ladder.capacity());
        let coordinator = Coordinator::new();

        run(
            SliceSource::new(vec![0.25; 150]),
            writer,
            Channel::Download,
            &ladder,
            &coordinator,
        );

        assert!(coordinator.failure().is_none());
        assert!(!coordinator.is_stopped());
        assert_eq!(reader.len(), 150);
        // Later intervals are reported unreachable rather than waited on.
        assert_eq!(coordinator.wait_for(200), RungWait::Starved);
    }

    #[test]
    fn test_backend_error_sets_failure() {
        let ladder = IntervalLadder::from_base(100, 3).unwrap();
        let (writer, _reader) = sample_buffer(ladder.capacity());
        let coordinator = Coordinator::new();

        run(
            FailingSource {
                remaining: 120,
                reason: "connection lost",
            },
            writer,
            Channel::Capture,
            &ladder,
            &coordinator,
        );

        let failure = coordinator.failure().unwrap();
        assert_eq!(failure.channel, Channel::Capture);
        assert_eq!(failure.reason, "connection lost");
    }

    #[test]
    fn test_stop_flag_halts_appends() {
        let ladder = IntervalLadder::from_base(100, 3).unwrap();
        let (writer, reader) = sample_buffer(ladder.capacity());
        let coordinator = Coordinator::new();
        coordinator.request_stop();

        run(
            SliceSource::new(vec![0.25; 1000]),
            writer,
            Channel::Capture,
            &ladder,
            &coordinator,
        );

        assert_eq!(reader.len(), 0);
    }
}
