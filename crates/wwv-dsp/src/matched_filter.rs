//! Phase-invariant quadrature matched filter shared by the startup (C3)
//! and streaming (C4) tone detectors.
//!
//! Two correlation templates (sine and cosine of the tone frequency) are
//! convolved against the envelope-demodulated input; correlation
//! magnitude is `sqrt(Cs^2 + Cc^2)`, which makes the detector invariant to
//! the tone's unknown carrier phase. The peak is refined to sub-sample
//! precision with a quadratic fit across the three samples around the
//! maximum, and the phase at the peak gives a further sub-sample
//! refinement plus a Doppler estimate via the phase slope across
//! adjacent per-minute peaks (§4.4).

use num_complex::Complex32;

/// One matched-filter evaluation against a known marker shape.
#[derive(Debug, Clone, Copy)]
pub struct FilterPeak {
    /// Index (in input samples) of the best-fit peak, before sub-sample refinement.
    pub index: usize,
    /// Sub-sample offset in `[-0.5, 0.5)` refining `index`, from quadratic interpolation.
    pub sub_sample_offset: f64,
    /// Correlation magnitude at the peak.
    pub magnitude: f64,
    /// Phase of the complex correlation at the peak, radians.
    pub phase_rad: f64,
    /// Estimated SNR in dB: peak magnitude vs. median magnitude elsewhere in the search window.
    pub snr_db: f64,
}

/// Builds sine/cosine correlation templates for `tone_hz` at `sample_rate_hz`,
/// windowed to `duration_ms` — the expected on/off shape of the per-minute
/// marker tone (800 ms for WWV/WWVH, 500 ms for CHU per §4.3).
pub fn marker_templates(tone_hz: f64, sample_rate_hz: f64, duration_ms: f64) -> (Vec<f32>, Vec<f32>) {
    let n = ((duration_ms / 1000.0) * sample_rate_hz).round() as usize;
    let mut sine = Vec::with_capacity(n);
    let mut cosine = Vec::with_capacity(n);
    for i in 0..n {
        let t = i as f64 / sample_rate_hz;
        let phase = 2.0 * std::f64::consts::PI * tone_hz * t;
        sine.push(phase.sin() as f32);
        cosine.push(phase.cos() as f32);
    }
    (sine, cosine)
}

/// Real envelope (magnitude) of a complex IQ buffer, the input the matched
/// filter actually correlates against.
pub fn envelope(samples: &[Complex32]) -> Vec<f32> {
    samples.iter().map(|s| s.norm()).collect()
}

/// Runs the quadrature matched filter over `signal` (envelope-demodulated
/// real samples) using `sine`/`cosine` templates of equal length, searching
/// the whole signal for the best-correlating offset.
///
/// Processing gain scales with `sqrt(template_len)`, matching the coarse
/// full-duration detection pass in §4.3 step 1.
pub fn matched_filter_search(signal: &[f32], sine: &[f32], cosine: &[f32]) -> Option<FilterPeak> {
    let template_len = sine.len();
    if signal.len() < template_len || template_len == 0 {
        return None;
    }
    let n_positions = signal.len() - template_len + 1;
    let mut magnitudes = Vec::with_capacity(n_positions);
    let mut phases = Vec::with_capacity(n_positions);

    for pos in 0..n_positions {
        let window = &signal[pos..pos + template_len];
        let mut cs = 0.0f64;
        let mut cc = 0.0f64;
        for i in 0..template_len {
            cs += window[i] as f64 * sine[i] as f64;
            cc += window[i] as f64 * cosine[i] as f64;
        }
        magnitudes.push((cs * cs + cc * cc).sqrt());
        phases.push(cc.atan2(cs));
    }

    let (best_idx, &best_mag) = magnitudes
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;

    let sub_sample_offset = quadratic_peak_offset(&magnitudes, best_idx);

    let mut sorted = magnitudes.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = sorted[sorted.len() / 2].max(1e-12);
    let snr_db = 20.0 * (best_mag / median).log10();

    Some(FilterPeak {
        index: best_idx,
        sub_sample_offset,
        magnitude: best_mag,
        phase_rad: phases[best_idx],
        snr_db,
    })
}

/// Quadratic (parabolic) interpolation around a discrete peak at `index`,
/// using its two neighbours, to recover a sub-sample offset.
fn quadratic_peak_offset(magnitudes: &[f64], index: usize) -> f64 {
    if index == 0 || index + 1 >= magnitudes.len() {
        return 0.0;
    }
    let y0 = magnitudes[index - 1];
    let y1 = magnitudes[index];
    let y2 = magnitudes[index + 1];
    let denom = y0 - 2.0 * y1 + y2;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    0.5 * (y0 - y2) / denom
}

/// Doppler estimate from the phase slope between two matched-filter peaks
/// separated by `dt_seconds` (typically one minute apart), at carrier
/// `tone_hz`.
pub fn phase_slope_doppler_hz(phase_a: f64, phase_b: f64, dt_seconds: f64, tone_hz: f64) -> f64 {
    let mut dphase = phase_b - phase_a;
    while dphase > std::f64::consts::PI {
        dphase -= 2.0 * std::f64::consts::PI;
    }
    while dphase < -std::f64::consts::PI {
        dphase += 2.0 * std::f64::consts::PI;
    }
    let _ = tone_hz;
    dphase / (2.0 * std::f64::consts::PI * dt_seconds)
}

/// Narrowband (+/-50 Hz) notch applied before the matched filter to
/// suppress intermodulation products at 400/700 Hz (§4.4 "harmonic
/// contamination mitigation"). A second-order IIR notch, applied
/// zero-phase by filtering forward then backward over the buffer (this
/// stage operates on a fixed buffer, not a streaming call, so the
/// zero-phase trick is cheap and avoids group-delay bias in the marker
/// onset estimate).
pub fn notch_filter(signal: &mut [f32], notch_hz: f64, sample_rate_hz: f64, q: f64) {
    let omega = 2.0 * std::f64::consts::PI * notch_hz / sample_rate_hz;
    let alpha = omega.sin() / (2.0 * q);
    let cos_omega = omega.cos();

    let b0 = 1.0;
    let b1 = -2.0 * cos_omega;
    let b2 = 1.0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_omega;
    let a2 = 1.0 - alpha;

    apply_biquad(signal, b0, b1, b2, a0, a1, a2);
    signal.reverse();
    apply_biquad(signal, b0, b1, b2, a0, a1, a2);
    signal.reverse();
}

fn apply_biquad(signal: &mut [f32], b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) {
    let (mut x1, mut x2, mut y1, mut y2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for s in signal.iter_mut() {
        let x0 = *s as f64;
        let y0 = (b0 / a0) * x0 + (b1 / a0) * x1 + (b2 / a0) * x2
            - (a1 / a0) * y1
            - (a2 / a0) * y2;
        x2 = x1;
        x1 = x0;
        y2 = y1;
        y1 = y0;
        *s = y0 as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_envelope(freq_hz: f64, rate_hz: f64, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| {
                let t = i as f64 / rate_hz;
                (2.0 * std::f64::consts::PI * freq_hz * t).cos().abs() as f32
            })
            .collect()
    }

    #[test]
    fn matched_filter_finds_known_onset() {
        let rate = 3000.0;
        let (sine, cosine) = marker_templates(1000.0, rate, 800.0);
        let template_len = sine.len();
        let silence = vec![0.0f32; 500];
        let mut signal = silence.clone();
        let t: Vec<f32> = (0..template_len)
            .map(|i| {
                let time = i as f64 / rate;
                (2.0 * std::f64::consts::PI * 1000.0 * time).cos() as f32
            })
            .collect();
        signal.extend(t);
        signal.extend(vec![0.0f32; 500]);

        let peak = matched_filter_search(&signal, &sine, &cosine).unwrap();
        assert_eq!(peak.index, 500);
        assert!(peak.snr_db > 10.0);
    }

    #[test]
    fn notch_filter_attenuates_target_frequency() {
        let rate = 3000.0;
        let mut signal = tone_envelope(400.0, rate, 1024);
        let power_before: f64 = signal.iter().map(|s| (*s as f64).powi(2)).sum();
        notch_filter(&mut signal, 400.0, rate, 10.0);
        let power_after: f64 = signal.iter().map(|s| (*s as f64).powi(2)).sum();
        assert!(power_after < power_before * 0.5);
    }
}
