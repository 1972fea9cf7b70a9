//! C embedding interface.
//!
//! Exposes a single call for hosts that want the lag estimate without the
//! CLI: pass a URL, get the matched lag in samples or a sentinel. Each
//! call runs a complete synchronization session with default settings; no
//! state survives between calls.

use std::ffi::{CStr, c_char};

use audiosync_core::{RunOutcome, SyncConfig, supervisor};
use audiosync_io::{DecodeSource, MonitorSource};

/// Returned when no lag could be measured: the URL was invalid, a backend
/// could not be started, a stream failed, or no interval produced a
/// confident peak. Lag itself is signed, so the sentinel sits outside any
/// reachable value.
pub const AUDIOSYNC_NO_LAG: i64 = i64::MIN;

/// Measure how many samples the stream at `url` trails local playback.
///
/// Returns the lag in samples at 48 kHz (negative when the stream leads),
/// or [`AUDIOSYNC_NO_LAG`].
///
/// # Safety
///
/// `url` must be a valid NUL-terminated C string, or null (which yields
/// the sentinel).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn audiosync_get_lag(url: *const c_char) -> i64 {
    if url.is_null() {
        return AUDIOSYNC_NO_LAG;
    }
    let Ok(url) = unsafe { CStr::from_ptr(url) }.to_str() else {
        return AUDIOSYNC_NO_LAG;
    };
    measure(url).unwrap_or(AUDIOSYNC_NO_LAG)
}

fn measure(url: &str) -> Option<i64> {
    let capture = MonitorSource::connect(None)
        .map_err(|err| tracing::error!(error = %err, "capture setup failed"))
        .ok()?;
    let download = DecodeSource::spawn(url)
        .map_err(|err| tracing::error!(error = %err, "decoder setup failed"))
        .ok()?;

    let report = supervisor::run(capture, download, SyncConfig::default())
        .map_err(|err| tracing::error!(error = %err, "run setup failed"))
        .ok()?;

    match report.outcome {
        RunOutcome::Matched { lag, .. } => Some(lag),
        RunOutcome::NoMatch | RunOutcome::Failed { .. } => None,
    }
}
