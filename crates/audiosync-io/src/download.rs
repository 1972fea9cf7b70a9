//! Remote stream decode via a subprocess pipe.
//!
//! Spawns a decoder (ffmpeg by default) that fetches the URL and writes
//! raw little-endian `f32` mono frames at the build-time sample rate to
//! its stdout. The source reads whole frames off the pipe, carrying any
//! split frame across reads, and kills the child when dropped - which is
//! how a stop request terminates the subprocess.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};

use audiosync_core::{SAMPLE_RATE, SampleSource, SourceError};

use crate::{BYTES_PER_SAMPLE, decode_f32le};

/// Errors from launching the decode subprocess.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The decoder binary could not be started.
    #[error("failed to spawn decoder '{program}': {source}")]
    Spawn {
        /// The program that was attempted.
        program: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The child was spawned without a usable stdout pipe.
    #[error("decoder '{program}' has no stdout pipe")]
    MissingStdout {
        /// The program that was spawned.
        program: String,
    },
}

/// A decode subprocess delivering mono `f32` frames on a pipe.
pub struct DecodeSource {
    child: Child,
    stdout: ChildStdout,
    bytes: Vec<u8>,
    carry: Vec<u8>,
}

impl DecodeSource {
    /// Decode `url` with ffmpeg: audio only, downmixed to mono, resampled
    /// to the build-time rate, raw `f32le` on stdout.
    pub fn spawn(url: &str) -> Result<Self, DecodeError> {
        let rate = SAMPLE_RATE.to_string();
        Self::with_command(
            "ffmpeg",
            [
                "-nostdin", "-loglevel", "error", "-i", url, "-vn", "-ac", "1", "-ar",
                rate.as_str(), "-f", "f32le", "pipe:1",
            ],
        )
    }

    /// Spawn an arbitrary decode command. Whatever it writes to stdout is
    /// consumed as little-endian `f32` mono frames at the build-time rate.
    pub fn with_command<I, S>(program: &str, args: I) -> Result<Self, DecodeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DecodeError::MissingStdout {
            program: program.to_string(),
        })?;

        tracing::info!(program, pid = child.id(), "decoder started");
        Ok(Self {
            child,
            stdout,
            bytes: Vec::new(),
            carry: Vec::new(),
        })
    }

    /// Handle end of pipe: reap the child and map a non-zero exit status
    /// to a backend error.
    fn finish(&mut self, leftover: usize) -> Result<usize, SourceError> {
        if leftover > 0 {
            tracing::debug!(leftover, "discarding trailing partial frame");
        }
        match self.child.wait() {
            Ok(status) if status.success() => Ok(0),
            Ok(status) => Err(SourceError::new(format!("decoder exited with {status}"))),
            Err(err) => Err(SourceError::new(format!("failed to reap decoder: {err}"))),
        }
    }
}

impl SampleSource for DecodeSource {
    fn read(&mut self, out: &mut [f32]) -> Result<usize, SourceError> {
        let want = out.len() * BYTES_PER_SAMPLE;
        self.bytes.resize(want, 0);

        // Start from any split frame left over by the previous read.
        let mut filled = self.carry.len();
        self.bytes[..filled].copy_from_slice(&self.carry);
        self.carry.clear();

        // Block until at least one whole frame is in hand.
        while filled < BYTES_PER_SAMPLE {
            let n = self
                .stdout
                .read(&mut self.bytes[filled..])
                .map_err(|err| SourceError::new(format!("decoder pipe read failed: {err}")))?;
            if n == 0 {
                return self.finish(filled);
            }
            filled += n;
        }

        let frames = filled / BYTES_PER_SAMPLE;
        let whole = frames * BYTES_PER_SAMPLE;
        self.carry.extend_from_slice(&self.bytes[whole..filled]);
        decode_f32le(&self.bytes[..whole], &mut out[..frames]);
        Ok(frames)
    }
}

impl Drop for DecodeSource {
    fn drop(&mut self) {
        // Already-reaped children make both calls fail; that is fine.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
