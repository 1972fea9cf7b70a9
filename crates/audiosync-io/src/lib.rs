//! Stream backends for audiosync.
//!
//! Both backends implement the core's
//! [`SampleSource`](audiosync_core::SampleSource) contract and deliver
//! mono `f32` PCM at the build-time sample rate:
//!
//! - [`MonitorSource`]: a blocking PulseAudio record stream on the
//!   monitor of the default output sink - whatever the desktop is playing.
//! - [`DecodeSource`]: a decode subprocess (ffmpeg by default) turning a
//!   remote URL into raw samples on a pipe.

mod capture;
mod download;

pub use capture::{CaptureError, DEFAULT_MONITOR, MonitorSource};
pub use download::{DecodeError, DecodeSource};

/// Bytes per mono `f32` frame on the wire.
pub(crate) const BYTES_PER_SAMPLE: usize = 4;

/// Reinterpret little-endian `f32` frames into samples.
///
/// `bytes` must hold exactly `out.len()` whole frames.
pub(crate) fn decode_f32le(bytes: &[u8], out: &mut [f32]) {
    debug_assert_eq!(bytes.len(), out.len() * BYTES_PER_SAMPLE);
    for (sample, raw) in out.iter_mut().zip(bytes.chunks_exact(BYTES_PER_SAMPLE)) {
        *sample = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_f32le() {
        let bytes = [
            0x00, 0x00, 0x80, 0x3f, // 1.0
            0x00, 0x00, 0x00, 0x40, // 2.0
            0x00, 0x00, 0x80, 0xbf, // -1.0
        ];
        let mut out = [0.0f32; 3];
        decode_f32le(&bytes, &mut out);
        assert_eq!(out, [1.0, 2.0, -1.0]);
    }
}
