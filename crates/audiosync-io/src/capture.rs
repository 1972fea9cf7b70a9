//! Live capture of the desktop output via the sound server.
//!
//! Opens a blocking PulseAudio record stream on the monitor source of the
//! default sink, so the samples are exactly what the local speakers are
//! playing. The server resamples to the requested spec, which keeps the
//! stream at the build-time rate regardless of the sink's native format.

use audiosync_core::{SAMPLE_RATE, SampleSource, SourceError};
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;

use crate::{BYTES_PER_SAMPLE, decode_f32le};

/// The sound server's alias for the default sink's monitor source.
pub const DEFAULT_MONITOR: &str = "@DEFAULT_MONITOR@";

/// Errors from opening the capture stream.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The record stream could not be opened.
    #[error("failed to open record stream on '{device}': {source}")]
    Connect {
        /// The monitor source that was requested.
        device: String,
        /// The sound server's error.
        #[source]
        source: libpulse_binding::error::PAErr,
    },
}

/// A blocking record stream on a playback monitor.
pub struct MonitorSource {
    stream: Simple,
    bytes: Vec<u8>,
}

impl MonitorSource {
    /// Connect to a monitor source, or the default sink's monitor when
    /// `device` is `None`.
    pub fn connect(device: Option<&str>) -> Result<Self, CaptureError> {
        let device = device.unwrap_or(DEFAULT_MONITOR);
        let spec = Spec {
            format: Format::F32le,
            channels: 1,
            rate: SAMPLE_RATE,
        };
        let stream = Simple::new(
            None,
            "audiosync",
            Direction::Record,
            Some(device),
            "playback monitor",
            &spec,
            None,
            None,
        )
        .map_err(|source| CaptureError::Connect {
            device: device.to_string(),
            source,
        })?;

        tracing::info!(device, rate = SAMPLE_RATE, "capturing playback monitor");
        Ok(Self {
            stream,
            bytes: Vec::new(),
        })
    }
}

impl SampleSource for MonitorSource {
    fn read(&mut self, out: &mut [f32]) -> Result<usize, SourceError> {
        let want = out.len() * BYTES_PER_SAMPLE;
        self.bytes.resize(want, 0);
        self.stream
            .read(&mut self.bytes[..want])
            .map_err(|err| SourceError::new(format!("monitor read failed: {err}")))?;
        decode_f32le(&self.bytes[..want], out);
        Ok(out.len())
    }
}
