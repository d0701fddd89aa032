//! Streaming tone detector (C4): runs per minute on 3 kHz decimated audio,
//! producing a `ToneDetection` for every station/frequency enabled on the
//! channel (§4.4).

use num_complex::Complex32;
use wwv_core::{Station, ToneDetection, WwvError};

use crate::matched_filter::{envelope, marker_templates, matched_filter_search, notch_filter, phase_slope_doppler_hz};

/// Input sample rate the streaming detector expects (§4.4 "decimated to 3 kHz").
pub const STREAMING_SAMPLE_RATE_HZ: f64 = 3000.0;

/// Below this SNR, a detection is reported but excluded from `D_clock` updates.
pub const POOR_SNR_THRESHOLD_DB: f64 = 6.0;

/// Two candidate detections within this many dB of each other are ambiguous.
pub const AMBIGUOUS_MARGIN_DB: f64 = 3.0;

/// Frequencies the streaming detector always searches for, independent of
/// the channel's station hint, because the minute-aware discriminator
/// needs all of them (§4.6 features 1, 3, 4).
pub const CANDIDATE_TONES_HZ: [f64; 5] = [1000.0, 1200.0, 500.0, 600.0, 440.0];

/// Intermodulation products notched out before the matched filter runs
/// (§4.4 "harmonic-contamination mitigation").
const NOTCH_FREQUENCIES_HZ: [f64; 2] = [400.0, 700.0];

/// Matched-filter window for the 500/600/440 Hz exclusive-minute and
/// station-ID features (§4.6 features 3, 4), distinct from the marker
/// tone's full 800/500 ms window.
const EXCLUSIVE_FEATURE_TONE_DURATION_MS: f64 = 200.0;

pub struct StreamingDetector {
    /// Last detection per tone, kept to compute Doppler via phase slope
    /// across adjacent (typically one-minute-apart) peaks.
    last_detection: std::collections::HashMap<u64, (f64, f64)>, // tone_hz bits -> (phase_rad, utc)
}

impl Default for StreamingDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingDetector {
    pub fn new() -> Self {
        Self {
            last_detection: std::collections::HashMap::new(),
        }
    }

    /// Runs the matched filter for every candidate tone against a 1s
    /// window (+/-500ms around the expected minute boundary per §4.4).
    /// Returns a detection (possibly low-SNR) for each tone the template
    /// search could score, plus any `WwvError` failure-mode annotations
    /// that fired (`TonePoorSnr`, `TonesAmbiguous`).
    pub fn detect_minute(
        &mut self,
        station: Station,
        minute_utc: f64,
        samples: &[Complex32],
    ) -> (Vec<ToneDetection>, Vec<WwvError>) {
        let mut env = envelope(samples);
        for &notch_hz in &NOTCH_FREQUENCIES_HZ {
            notch_filter(&mut env, notch_hz, STREAMING_SAMPLE_RATE_HZ, 10.0);
        }

        let mut detections = Vec::new();
        let mut errors = Vec::new();
        let mut scored: Vec<(f64, f64)> = Vec::new(); // (tone_hz, snr_db) for ambiguity check

        for &tone_hz in &CANDIDATE_TONES_HZ {
            let duration_ms = if tone_hz == station.marker_tone_hz() {
                station.marker_duration_ms()
            } else {
                EXCLUSIVE_FEATURE_TONE_DURATION_MS
            };
            let (sine, cosine) = marker_templates(tone_hz, STREAMING_SAMPLE_RATE_HZ, duration_ms);
            let Some(peak) = matched_filter_search(&env, &sine, &cosine) else {
                continue;
            };

            scored.push((tone_hz, peak.snr_db));

            if peak.snr_db < POOR_SNR_THRESHOLD_DB {
                errors.push(WwvError::TonePoorSnr {
                    snr_db: peak.snr_db,
                    threshold_db: POOR_SNR_THRESHOLD_DB,
                });
                continue;
            }

            let key = tone_hz.to_bits();
            let timing_error_ms =
                (peak.index as f64 + peak.sub_sample_offset) / STREAMING_SAMPLE_RATE_HZ * 1000.0;

            detections.push(ToneDetection {
                station,
                tone_frequency_hz: tone_hz,
                onset_rtp_ts: peak.index as f64 + peak.sub_sample_offset,
                timing_error_ms,
                snr_db: peak.snr_db,
                confidence: (peak.snr_db / 30.0).clamp(0.0, 1.0),
                phase_rad: peak.phase_rad,
            });

            self.last_detection.insert(key, (peak.phase_rad, minute_utc));
        }

        if let (Some(&(_, snr_1000)), Some(&(_, snr_1200))) = (
            scored.iter().find(|(f, _)| *f == 1000.0),
            scored.iter().find(|(f, _)| *f == 1200.0),
        ) {
            if (snr_1000 - snr_1200).abs() < AMBIGUOUS_MARGIN_DB {
                errors.push(WwvError::TonesAmbiguous);
            }
        }

        (detections, errors)
    }

    /// Doppler estimate for `tone_hz`, using the phase at the current
    /// detection vs. the last one recorded for that tone (§4.4).
    pub fn doppler_hz(&self, tone_hz: f64, current_phase_rad: f64, current_utc: f64) -> Option<f64> {
        let key = tone_hz.to_bits();
        let (last_phase, last_utc) = *self.last_detection.get(&key)?;
        let dt = current_utc - last_utc;
        if dt <= 0.0 {
            return None;
        }
        Some(phase_slope_doppler_hz(last_phase, current_phase_rad, dt, tone_hz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker_signal(tone_hz: f64, rate: f64, total_secs: f64, onset_sec: f64, duration_ms: f64, snr_scale: f32) -> Vec<Complex32> {
        let n = (total_secs * rate) as usize;
        let onset = (onset_sec * rate) as usize;
        let marker_len = ((duration_ms / 1000.0) * rate) as usize;
        (0..n)
            .map(|i| {
                if i >= onset && i < onset + marker_len {
                    let t = (i - onset) as f64 / rate;
                    let phase = 2.0 * std::f64::consts::PI * tone_hz * t;
                    Complex32::new(snr_scale * phase.cos() as f32, snr_scale * phase.sin() as f32)
                } else {
                    Complex32::new(0.0, 0.0)
                }
            })
            .collect()
    }

    #[test]
    fn clean_wwv_minute_detects_with_low_timing_error() {
        let rate = STREAMING_SAMPLE_RATE_HZ;
        let signal = marker_signal(1000.0, rate, 2.0, 0.5, 800.0, 10.0);
        let mut detector = StreamingDetector::new();
        let (detections, errors) = detector.detect_minute(Station::Wwv, 0.0, &signal);
        let d = detections
            .iter()
            .find(|d| d.tone_frequency_hz == 1000.0)
            .expect("1000Hz marker should be detected");
        assert!(d.snr_db > POOR_SNR_THRESHOLD_DB);
        assert!(errors.iter().all(|e| !matches!(e, WwvError::TonesAmbiguous)));
    }

    #[test]
    fn poor_snr_reported_but_excluded() {
        let rate = STREAMING_SAMPLE_RATE_HZ;
        let signal = marker_signal(1000.0, rate, 2.0, 0.5, 800.0, 0.02);
        let mut detector = StreamingDetector::new();
        let (_detections, errors) = detector.detect_minute(Station::Wwv, 0.0, &signal);
        assert!(errors
            .iter()
            .any(|e| matches!(e, WwvError::TonePoorSnr { .. })));
    }
}
