//! Generic stateful FIR stage, shared by the compensation filter and the
//! Kaiser-window decimating filter (C5). The persisted delay line and
//! decimation-phase counter are exactly what keeps a call boundary
//! indistinguishable from the middle of a long run (§4.5 invariant).

use std::collections::VecDeque;

use num_complex::Complex32;

/// Direct-form FIR with a persisted tap-delay line.
#[derive(Clone)]
pub struct FirFilter {
    taps: Vec<f32>,
    history: VecDeque<Complex32>,
}

impl FirFilter {
    pub fn new(taps: Vec<f32>) -> Self {
        let history_len = taps.len().saturating_sub(1);
        Self {
            taps,
            history: VecDeque::from(vec![Complex32::new(0.0, 0.0); history_len]),
        }
    }

    pub fn num_taps(&self) -> usize {
        self.taps.len()
    }

    /// Consumes one new input sample, returns the filtered output sample.
    pub fn process_sample(&mut self, x: Complex32) -> Complex32 {
        let n = self.taps.len();
        let mut acc = Complex32::new(0.0, 0.0);
        // window, oldest-to-newest: history[0..] followed by x.
        for (k, &tap) in self.taps.iter().enumerate() {
            let age = n - 1 - k;
            let sample = if age == 0 {
                x
            } else if age - 1 < self.history.len() {
                self.history[self.history.len() - age]
            } else {
                Complex32::new(0.0, 0.0)
            };
            acc += sample * tap;
        }
        if !self.history.is_empty() {
            self.history.push_back(x);
            self.history.pop_front();
        }
        acc
    }

    /// Resets the delay line to silence. Only called on a genuine
    /// discontinuity, never on an ordinary call boundary (§4.5).
    pub fn reset(&mut self) {
        for s in self.history.iter_mut() {
            *s = Complex32::new(0.0, 0.0);
        }
    }
}

/// A [`FirFilter`] plus a persisted decimation-phase counter: only every
/// `rate`-th filtered sample is retained. `rate == 1` degenerates to a
/// plain (non-decimating) FIR stage, used for the CIC compensation filter.
#[derive(Clone)]
pub struct DecimatingFir {
    fir: FirFilter,
    rate: usize,
    phase: usize,
}

impl DecimatingFir {
    pub fn new(taps: Vec<f32>, rate: usize) -> Self {
        assert!(rate >= 1, "decimation rate must be at least 1");
        Self {
            fir: FirFilter::new(taps),
            rate,
            phase: 0,
        }
    }

    pub fn process(&mut self, input: &[Complex32]) -> Vec<Complex32> {
        let mut out = Vec::with_capacity(input.len() / self.rate + 1);
        for &x in input {
            let y = self.fir.process_sample(x);
            if self.phase == 0 {
                out.push(y);
            }
            self.phase += 1;
            if self.phase == self.rate {
                self.phase = 0;
            }
        }
        out
    }

    pub fn reset(&mut self) {
        self.fir.reset();
        self.phase = 0;
    }
}

/// Modified Bessel function of the first kind, order 0, via its power
/// series — standard building block for generating Kaiser window
/// coefficients. Converges quickly for the beta values used here (< 15).
pub fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let half_x_sq = (x / 2.0) * (x / 2.0);
    for k in 1..=40 {
        term *= half_x_sq / (k as f64 * k as f64);
        sum += term;
        if term < sum * 1e-16 {
            break;
        }
    }
    sum
}

/// Generates a linear-phase Kaiser-windowed lowpass FIR with `num_taps`
/// coefficients, cutoff `cutoff_normalized` (fraction of the input
/// Nyquist rate), and shape parameter `beta`.
pub fn kaiser_lowpass(num_taps: usize, cutoff_normalized: f64, beta: f64) -> Vec<f32> {
    assert!(num_taps >= 3 && num_taps % 2 == 1, "expect an odd tap count");
    let m = (num_taps - 1) as f64;
    let i0_beta = bessel_i0(beta);
    let mut taps = Vec::with_capacity(num_taps);
    let mut sum = 0.0f64;
    for n in 0..num_taps {
        let nf = n as f64;
        let centered = nf - m / 2.0;
        let sinc = if centered.abs() < 1e-12 {
            2.0 * cutoff_normalized
        } else {
            (2.0 * std::f64::consts::PI * cutoff_normalized * centered).sin()
                / (std::f64::consts::PI * centered)
        };
        let ratio = (centered / (m / 2.0)).clamp(-1.0, 1.0);
        let window = bessel_i0(beta * (1.0 - ratio * ratio).sqrt()) / i0_beta;
        let tap = sinc * window;
        sum += tap;
        taps.push(tap);
    }
    // Normalize for unity DC gain.
    taps.iter().map(|&t| (t / sum) as f32).collect()
}

/// Short FIR correcting the CIC's sinc-droop in the decimated passband, per
/// §4.5. Coefficients are a fixed, pre-computed compensation kernel rather
/// than derived at runtime.
pub fn cic_compensation_taps() -> Vec<f32> {
    // Symmetric 7-tap compensator boosting the passband edge against the
    // CIC's (sin(x)/x)^N droop; pragmatic fixed design rather than an
    // analytically inverted sinc (which is numerically unstable near DC).
    vec![
        -0.0144, -0.0503, 0.0453, 1.0388, 0.0453, -0.0503, -0.0144,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bessel_i0_matches_known_values() {
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-9);
        // I0(1) ~= 1.2660658
        assert!((bessel_i0(1.0) - 1.2660658).abs() < 1e-6);
    }

    #[test]
    fn kaiser_lowpass_has_unity_dc_gain() {
        let taps = kaiser_lowpass(41, 0.1, 6.0);
        let dc_gain: f32 = taps.iter().sum();
        assert!((dc_gain - 1.0).abs() < 1e-4);
    }

    #[test]
    fn decimating_fir_preserves_phase_across_calls() {
        let taps = vec![0.25f32, 0.5, 0.25];
        let mut split = DecimatingFir::new(taps.clone(), 4);
        let mut whole = DecimatingFir::new(taps, 4);

        let signal: Vec<Complex32> = (0..40)
            .map(|i| Complex32::new((i as f32 * 0.1).sin(), 0.0))
            .collect();

        let whole_out = whole.process(&signal);

        let mut split_out = Vec::new();
        for chunk in signal.chunks(7) {
            split_out.extend(split.process(chunk));
        }

        assert_eq!(whole_out.len(), split_out.len());
        for (a, b) in whole_out.iter().zip(split_out.iter()) {
            assert!((a - b).norm() < 1e-6, "{:?} vs {:?}", a, b);
        }
    }
}
