//! Run-wide progress state: watermarks, stop flag, and the wait primitive.
//!
//! One mutex guards both stream watermarks, the producer-exit flags, the
//! write-once stop flag, and the first recorded failure. One condvar is
//! broadcast whenever any of those change in a way a waiter could care
//! about: a watermark crossing an interval boundary, a producer exiting,
//! or the stop flag flipping. The matcher's wait condition is a
//! conjunction over both watermarks, which is why a single mutex covers
//! them both rather than one per stream.

use parking_lot::{Condvar, Mutex};
use std::fmt;

/// Identifies one of the two sample streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Live capture of the local playback monitor.
    Capture,
    /// Decode of the remotely fetched stream.
    Download,
}

impl Channel {
    fn index(self) -> usize {
        match self {
            Channel::Capture => 0,
            Channel::Download => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Capture => f.write_str("capture"),
            Channel::Download => f.write_str("download"),
        }
    }
}

/// A fatal producer error, recorded once per run.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Which producer failed.
    pub channel: Channel,
    /// The backend's description of what went wrong.
    pub reason: String,
}

/// Outcome of waiting for an interval to become correlatable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RungWait {
    /// Both watermarks reached the interval.
    Ready,
    /// The stop flag was raised first.
    Stopped,
    /// A producer exited below the interval; it can never be reached.
    Starved,
}

#[derive(Default)]
struct State {
    watermarks: [usize; 2],
    exited: [bool; 2],
    stopped: bool,
    failure: Option<Failure>,
}

/// Shared progress state for one synchronization run.
#[derive(Default)]
pub struct Coordinator {
    state: Mutex<State>,
    progress: Condvar,
}

impl Coordinator {
    /// Fresh state: zero watermarks, stop flag down.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a stream's new watermark. Watermarks only move forward;
    /// waiters are woken when `notify` is set (the append crossed an
    /// interval boundary).
    pub fn advance(&self, channel: Channel, len: usize, notify: bool) {
        let mut state = self.state.lock();
        let mark = &mut state.watermarks[channel.index()];
        debug_assert!(len >= *mark, "watermark must not move backwards");
        *mark = len.max(*mark);
        if notify {
            self.progress.notify_all();
        }
    }

    /// Record that a producer has exited, waking anyone waiting on its
    /// watermark.
    pub fn finish(&self, channel: Channel) {
        let mut state = self.state.lock();
        state.exited[channel.index()] = true;
        self.progress.notify_all();
    }

    /// Raise the stop flag. Idempotent; the flag never comes back down
    /// within a run.
    pub fn request_stop(&self) {
        let mut state = self.state.lock();
        if !state.stopped {
            state.stopped = true;
            self.progress.notify_all();
        }
    }

    /// Record a fatal producer error and raise the stop flag. Only the
    /// first failure of a run is kept.
    pub fn fail(&self, channel: Channel, reason: String) {
        let mut state = self.state.lock();
        if state.failure.is_none() {
            state.failure = Some(Failure { channel, reason });
        }
        state.stopped = true;
        self.progress.notify_all();
    }

    /// Whether the stop flag is up.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// The first recorded producer failure, if any.
    pub fn failure(&self) -> Option<Failure> {
        self.state.lock().failure.clone()
    }

    /// Current `(capture, download)` watermarks.
    pub fn watermarks(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.watermarks[0], state.watermarks[1])
    }

    /// Block until both watermarks reach `interval`, the stop flag is
    /// raised, or a producer exits without ever being able to reach it.
    pub fn wait_for(&self, interval: usize) -> RungWait {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return RungWait::Stopped;
            }
            if state.watermarks.iter().all(|&w| w >= interval) {
                return RungWait::Ready;
            }
            if state
                .watermarks
                .iter()
                .zip(state.exited.iter())
                .any(|(&w, &exited)| exited && w < interval)
            {
                return RungWait::Starved;
            }
            self.progress.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_ready_when_both_reach() {
        let coordinator = Arc::new(Coordinator::new());
        let waiter = Arc::clone(&coordinator);
        let handle = thread::spawn(move || waiter.wait_for(100));

        thread::sleep(Duration::from_millis(10));
        coordinator.advance(Channel::Capture, 120, true);
        thread::sleep(Duration::from_millis(10));
        coordinator.advance(Channel::Download, 100, true);

        assert_eq!(handle.join().unwrap(), RungWait::Ready);
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let coordinator = Arc::new(Coordinator::new());
        let waiter = Arc::clone(&coordinator);
        let handle = thread::spawn(move || waiter.wait_for(100));

        thread::sleep(Duration::from_millis(10));
        coordinator.request_stop();

        assert_eq!(handle.join().unwrap(), RungWait::Stopped);
    }

    #[test]
    fn test_early_exit_reports_starvation() {
        let coordinator = Coordinator::new();
        coordinator.advance(Channel::Capture, 200, true);
        coordinator.advance(Channel::Download, 50, true);
        coordinator.finish(Channel::Download);

        assert_eq!(coordinator.wait_for(100), RungWait::Starved);
        // An interval both sides already cover is still servable.
        assert_eq!(coordinator.wait_for(50), RungWait::Ready);
    }

    #[test]
    fn test_first_failure_wins_and_stops() {
        let coordinator = Coordinator::new();
        coordinator.fail(Channel::Download, "decoder died".into());
        coordinator.fail(Channel::Capture, "too late".into());

        assert!(coordinator.is_stopped());
        let failure = coordinator.failure().unwrap();
        assert_eq!(failure.channel, Channel::Download);
        assert_eq!(failure.reason, "decoder died");
    }

    #[test]
    fn test_stop_is_write_once() {
        let coordinator = Coordinator::new();
        coordinator.request_stop();
        coordinator.request_stop();
        assert!(coordinator.is_stopped());
    }
}
