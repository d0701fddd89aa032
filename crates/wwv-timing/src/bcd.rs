//! BCD time-code correlator (half of C6): cross-correlates the
//! demodulated 100 Hz subcarrier against a per-minute reference template
//! and reports the peak(s) in the resulting correlation envelope. Both
//! WWV and WWVH transmit the same subcarrier, so a single channel with
//! both stations present shows two peaks (§4.6).

/// One peak found in the BCD correlation envelope.
#[derive(Debug, Clone, Copy)]
pub struct BcdPeak {
    pub lag_samples: usize,
    pub amplitude: f64,
}

/// Builds the expected 100 Hz subcarrier BCD reference for `minute_of_hour`,
/// a fixed pattern of marker/binary pulses (simplified to the envelope
/// shape correlation cares about: binary-coded-decimal digit encoding is
/// out of scope for the correlator itself, which only needs a pulse-train
/// reference common to both stations).
pub fn bcd_reference_template(minute_of_hour: u32, sample_rate_hz: f64) -> Vec<f32> {
    let seconds = 60usize;
    let samples_per_second = sample_rate_hz as usize;
    let mut template = vec![0.0f32; seconds * samples_per_second];
    for second in 0..seconds {
        let bit = bcd_bit_for_second(minute_of_hour, second);
        let pulse_width_ms = match bit {
            BcdBit::Zero => 200.0,
            BcdBit::One => 500.0,
            BcdBit::Marker => 800.0,
        };
        let pulse_samples = ((pulse_width_ms / 1000.0) * sample_rate_hz) as usize;
        let start = second * samples_per_second;
        for i in 0..pulse_samples.min(samples_per_second) {
            template[start + i] = 1.0;
        }
    }
    template
}

#[derive(Debug, Clone, Copy)]
enum BcdBit {
    Zero,
    One,
    Marker,
}

fn bcd_bit_for_second(minute_of_hour: u32, second: usize) -> BcdBit {
    // Position markers at the IRIG-style frame boundaries (seconds 0, 9,
    // 19, 29, ..., 59); otherwise encode bits of `minute_of_hour` across
    // the remaining positions. This is a faithful-enough shape for
    // cross-correlation: the correlator only needs the pulse envelope to
    // repeat per minute, not a bit-exact time decode (time decoding is out
    // of this component's contract — discrimination only consumes
    // correlation amplitude/lag, not the decoded value).
    if second % 10 == 9 {
        return BcdBit::Marker;
    }
    let bit_index = second % 10;
    let bit = (minute_of_hour >> bit_index) & 1;
    if bit == 1 {
        BcdBit::One
    } else {
        BcdBit::Zero
    }
}

/// Cross-correlates `signal` against `template`, returning every local
/// maximum above `threshold_fraction` of the global peak — at most two are
/// meaningful per §4.6 (dual-peak = both stations present).
pub fn correlate_and_find_peaks(signal: &[f32], template: &[f32], threshold_fraction: f64, min_peak_separation: usize) -> Vec<BcdPeak> {
    if signal.len() < template.len() || template.is_empty() {
        return Vec::new();
    }
    let n_positions = signal.len() - template.len() + 1;
    let mut envelope = Vec::with_capacity(n_positions);
    for pos in 0..n_positions {
        let mut acc = 0.0f64;
        for i in 0..template.len() {
            acc += signal[pos + i] as f64 * template[i] as f64;
        }
        envelope.push(acc);
    }

    let global_max = envelope.iter().cloned().fold(f64::MIN, f64::max);
    if global_max <= 0.0 {
        return Vec::new();
    }
    let threshold = global_max * threshold_fraction;

    let mut peaks = Vec::new();
    for i in 0..envelope.len() {
        let v = envelope[i];
        if v < threshold {
            continue;
        }
        let is_local_max = (i == 0 || envelope[i - 1] <= v) && (i + 1 == envelope.len() || envelope[i + 1] <= v);
        if !is_local_max {
            continue;
        }
        if peaks
            .iter()
            .any(|p: &BcdPeak| (p.lag_samples as i64 - i as i64).unsigned_abs() < min_peak_separation as u64)
        {
            continue;
        }
        peaks.push(BcdPeak {
            lag_samples: i,
            amplitude: v,
        });
    }
    peaks.sort_by(|a, b| b.amplitude.partial_cmp(&a.amplitude).unwrap());
    peaks.truncate(2);
    peaks
}

/// Differential delay between two peaks, in milliseconds, at `sample_rate_hz`.
pub fn differential_delay_ms(peaks: &[BcdPeak], sample_rate_hz: f64) -> Option<f64> {
    if peaks.len() < 2 {
        return None;
    }
    let lag_diff = (peaks[0].lag_samples as i64 - peaks[1].lag_samples as i64).unsigned_abs();
    Some(lag_diff as f64 / sample_rate_hz * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_station_yields_one_peak() {
        let rate = 200.0;
        let template = bcd_reference_template(17, rate);
        let signal = template.clone();
        let peaks = correlate_and_find_peaks(&signal, &template, 0.5, (rate * 0.001) as usize);
        assert_eq!(peaks.len(), 1);
    }

    #[test]
    fn two_stations_12ms_apart_yield_two_peaks() {
        // Scenario S2: WWV + WWVH with 12ms differential delay.
        let rate = 2000.0; // fine enough to resolve 12ms = 24 samples
        let template = bcd_reference_template(5, rate);
        let offset_samples = (0.012 * rate) as usize;
        let mut signal = vec![0.0f32; template.len() + offset_samples + 10];
        for (i, &v) in template.iter().enumerate() {
            signal[i] += v;
            signal[i + offset_samples] += v * 0.8;
        }
        let peaks = correlate_and_find_peaks(&signal, &template, 0.5, (rate * 0.005) as usize);
        assert_eq!(peaks.len(), 2);
        let delay = differential_delay_ms(&peaks, rate).unwrap();
        assert!((delay - 12.0).abs() < 2.0, "delay={delay}");
    }
}
