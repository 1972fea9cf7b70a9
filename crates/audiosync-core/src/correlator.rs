//! Circular cross-correlation via FFT with normalized peak confidence.
//!
//! The correlator answers one question: by how many samples does stream `b`
//! trail stream `a`? It computes the circular cross-correlation
//!
//! ```text
//! R_ab(τ) = IFFT( conj(A(f)) · B(f) )
//! ```
//!
//! where `A`, `B` are the DFTs of the inputs, and scans `|R|` for its peak.
//! The peak position is the lag estimate; the peak magnitude, divided by
//! the product of the input L2 norms, is the confidence. By Cauchy-Schwarz
//! the confidence of an exact copy is 1.0 and uncorrelated material scores
//! near zero, so a single fixed threshold works at any input level.
//!
//! Inputs are treated as periodic with period equal to their length. The
//! caller decides whether and how far to zero-pad before correlating; the
//! correlator itself transforms at exactly the length it is given.
//!
//! # References
//!
//! - Oppenheim & Schafer, "Discrete-Time Signal Processing" (3rd ed.), section 2.8.

use rustfft::{FftPlanner, num_complex::Complex};

/// Result of one correlation: the peak position and its normalized height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    /// Index of the correlation peak in `[0, n)`, interpreted modulo the
    /// correlated length: `b` appears delayed relative to `a` by this many
    /// samples.
    pub peak_index: usize,
    /// Peak magnitude of `|R|` divided by `‖a‖₂ · ‖b‖₂`, in `[0, ~1]`.
    pub confidence: f32,
}

/// Errors from [`Correlator::correlate`].
#[derive(Debug, thiserror::Error)]
pub enum CorrelateError {
    /// Fewer than two samples per input; there is no lag to estimate.
    #[error("correlation needs at least 2 samples per input, got {0}")]
    InsufficientData(usize),

    /// Inputs of different lengths cannot be circularly correlated.
    #[error("correlation input lengths differ: {a} vs {b}")]
    MismatchedLengths {
        /// Length of the first input.
        a: usize,
        /// Length of the second input.
        b: usize,
    },

    /// The inputs contain non-finite values; the peak scan would be
    /// meaningless.
    #[error("non-finite values in correlation input")]
    NumericFailure,
}

/// FFT cross-correlation kernel.
///
/// Owns an [`FftPlanner`] so plans are cached across calls with the same
/// length (the matcher reuses one correlator for every interval). rustfft
/// plan construction is thread-safe, so no process-wide lock is needed;
/// each `Correlator` value is independent and `Send`.
pub struct Correlator {
    planner: FftPlanner<f32>,
}

impl Correlator {
    /// Create a correlator with an empty plan cache.
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Circularly cross-correlate two equal-length real vectors.
    ///
    /// Returns the peak index `d ∈ [0, n)` - how many samples `b` appears
    /// delayed relative to `a`, modulo `n` - and the normalized confidence.
    /// Inputs of all-zero (or vanishing) energy yield a peak at 0 with
    /// confidence 0.0 rather than an error.
    pub fn correlate(&mut self, a: &[f32], b: &[f32]) -> Result<Correlation, CorrelateError> {
        if a.len() != b.len() {
            return Err(CorrelateError::MismatchedLengths {
                a: a.len(),
                b: b.len(),
            });
        }
        let n = a.len();
        if n < 2 {
            return Err(CorrelateError::InsufficientData(n));
        }

        let norm_a = l2_norm(a);
        let norm_b = l2_norm(b);
        if !norm_a.is_finite() || !norm_b.is_finite() {
            return Err(CorrelateError::NumericFailure);
        }
        let denom = norm_a * norm_b;
        if denom < 1e-12 {
            // Silence against anything correlates with nothing.
            return Ok(Correlation {
                peak_index: 0,
                confidence: 0.0,
            });
        }

        let fft = self.planner.plan_fft_forward(n);
        let ifft = self.planner.plan_fft_inverse(n);

        let mut buf_a: Vec<Complex<f32>> = a.iter().map(|&v| Complex::new(v, 0.0)).collect();
        let mut buf_b: Vec<Complex<f32>> = b.iter().map(|&v| Complex::new(v, 0.0)).collect();

        fft.process(&mut buf_a);
        fft.process(&mut buf_b);

        // conj(A) · B: the product's phase carries the shift of b against a.
        for (ca, cb) in buf_a.iter_mut().zip(buf_b.iter()) {
            *ca = ca.conj() * cb;
        }

        ifft.process(&mut buf_a);

        // rustfft does not normalize the inverse transform.
        let scale = 1.0 / n as f32;

        // Absolute-value scan, including the index-0 comparand, so an
        // anti-phase peak at the origin is not missed.
        let mut peak_index = 0;
        let mut peak = (buf_a[0].re * scale).abs();
        for (i, c) in buf_a.iter().enumerate().skip(1) {
            let mag = (c.re * scale).abs();
            if mag > peak {
                peak = mag;
                peak_index = i;
            }
        }

        Ok(Correlation {
            peak_index,
            confidence: peak / denom,
        })
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

fn l2_norm(x: &[f32]) -> f32 {
    x.iter().map(|&v| v * v).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sr: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sr).sin())
            .collect()
    }

    /// Simple reproducible PRNG for white noise.
    fn white_noise(n: usize, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state as i32 as f32) / (i32::MAX as f32)
            })
            .collect()
    }

    fn rotate(x: &[f32], d: usize) -> Vec<f32> {
        let n = x.len();
        (0..n).map(|i| x[(i + n - d) % n]).collect()
    }

    #[test]
    fn test_autocorrelation_peaks_at_zero() {
        let x = sine(440.0, 48000.0, 4096);
        let c = Correlator::new().correlate(&x, &x).unwrap();

        assert_eq!(c.peak_index, 0, "self-correlation peak must sit at lag 0");
        assert!(
            (c.confidence - 1.0).abs() < 1e-3,
            "normalized self-correlation should be ~1.0, got {}",
            c.confidence
        );
    }

    #[test]
    fn test_circular_shift_recovers_lag() {
        let x = white_noise(2048, 0xC0FFEE);
        for d in [1usize, 37, 512, 2047] {
            let y = rotate(&x, d);
            let c = Correlator::new().correlate(&x, &y).unwrap();
            assert_eq!(c.peak_index, d, "expected peak at lag {d}");
            assert!(
                (c.confidence - 1.0).abs() < 1e-3,
                "circular shift preserves energy, confidence was {}",
                c.confidence
            );
        }
    }

    #[test]
    fn test_confidence_is_amplitude_invariant() {
        let x = white_noise(1024, 7);
        let y = rotate(&x, 100);
        let loud: Vec<f32> = y.iter().map(|v| v * 50.0).collect();

        let mut correlator = Correlator::new();
        let quiet = correlator.correlate(&x, &y).unwrap();
        let scaled = correlator.correlate(&x, &loud).unwrap();

        assert_eq!(quiet.peak_index, scaled.peak_index);
        assert!(
            (quiet.confidence - scaled.confidence).abs() < 1e-3,
            "normalization must cancel input gain: {} vs {}",
            quiet.confidence,
            scaled.confidence
        );
    }

    #[test]
    fn test_uncorrelated_noise_scores_low() {
        let x = white_noise(8192, 1);
        let y = white_noise(8192, 2);
        let c = Correlator::new().correlate(&x, &y).unwrap();
        assert!(
            c.confidence < 0.2,
            "independent noise should score near zero, got {}",
            c.confidence
        );
    }

    #[test]
    fn test_silence_yields_zero_confidence() {
        let x = vec![0.0f32; 256];
        let y = white_noise(256, 3);
        let c = Correlator::new().correlate(&x, &y).unwrap();
        assert_eq!(c.peak_index, 0);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_insufficient_data() {
        let mut correlator = Correlator::new();
        assert!(matches!(
            correlator.correlate(&[], &[]),
            Err(CorrelateError::InsufficientData(0))
        ));
        assert!(matches!(
            correlator.correlate(&[1.0], &[1.0]),
            Err(CorrelateError::InsufficientData(1))
        ));
    }

    #[test]
    fn test_mismatched_lengths() {
        let mut correlator = Correlator::new();
        assert!(matches!(
            correlator.correlate(&[1.0, 2.0], &[1.0, 2.0, 3.0]),
            Err(CorrelateError::MismatchedLengths { a: 2, b: 3 })
        ));
    }

    #[test]
    fn test_non_finite_input_is_numeric_failure() {
        let mut x = white_noise(64, 9);
        x[10] = f32::NAN;
        let y = white_noise(64, 9);
        assert!(matches!(
            Correlator::new().correlate(&x, &y),
            Err(CorrelateError::NumericFailure)
        ));
    }

    #[test]
    fn test_anti_phase_peak_found_by_absolute_scan() {
        let x = sine(440.0, 48000.0, 4096);
        let y: Vec<f32> = x.iter().map(|v| -v).collect();
        let c = Correlator::new().correlate(&x, &y).unwrap();
        assert_eq!(c.peak_index, 0);
        assert!((c.confidence - 1.0).abs() < 1e-3);
    }
}
