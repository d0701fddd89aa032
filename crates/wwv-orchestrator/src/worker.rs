//! Per-channel worker (C13): owns the resequencer (C1), the archive
//! writer (C2), tone/discrimination state (C4/C6), the Kalman
//! accumulator (C9), and the channel's `TimeSnap` — exactly the five
//! things §4.13 names.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use num_complex::Complex32;
use parking_lot::Mutex;
use tracing::{info, warn};
use wwv_core::{
    ChannelDescriptor, ClockOffsetMeasurement, GapCause, GapEntry, Station, TimeSnap, WwvError,
    WwvResult,
};
use wwv_dsp::fir::{kaiser_lowpass, DecimatingFir};
use wwv_dsp::matched_filter::envelope;
use wwv_dsp::streaming::STREAMING_SAMPLE_RATE_HZ;
use wwv_dsp::{fallback_time_snap, StartupBuffer, StreamingDetector};
use wwv_ingest::archive::{ArchiveConfig, ArchiveSegment, SegmentMeta};
use wwv_ingest::resequencer::{Emission, Resequencer, ResequencerConfig};
use wwv_propagation::{enumerate_candidates, select_mode, IonosphericModel, LatLon};
use wwv_product::ClockOffsetRecord;
use wwv_state::StateStore;
use wwv_timing::bcd::{bcd_reference_template, correlate_and_find_peaks};
use wwv_timing::discriminator::{WWV_EXCLUSIVE_MINUTES, WWVH_EXCLUSIVE_MINUTES};
use wwv_timing::{
    discriminate, FeatureVector, GroundTruthValidator, KalmanState, LogisticWeights,
    MultiBroadcastFusion, ProcessNoise, ValidationSample,
};

use crate::config::Phase2Config;
use crate::registry::CalibrationRegistry;

/// Minimum tap count for the channel-rate -> streaming-rate prefilter.
/// Odd, per `kaiser_lowpass`'s requirement.
const TONE_DECIMATOR_TAPS: usize = 63;
const TONE_DECIMATOR_BETA: f64 = 7.0;

/// Builds a `DecimatingFir` bringing `channel_rate_hz` down to
/// approximately `STREAMING_SAMPLE_RATE_HZ`, the input C4 expects (§4.4).
/// This is a different decimation path from C5's fixed 20kHz->10Hz
/// `Decimator` used by Phase 3; the channel rate rarely divides evenly
/// into 3 kHz, so the rate is rounded rather than asserted exact.
fn build_tone_decimator(channel_rate_hz: u32) -> DecimatingFir {
    let rate = ((channel_rate_hz as f64) / STREAMING_SAMPLE_RATE_HZ)
        .round()
        .max(1.0) as usize;
    let cutoff = (STREAMING_SAMPLE_RATE_HZ / channel_rate_hz as f64 / 2.0).clamp(0.01, 0.45);
    let taps = kaiser_lowpass(TONE_DECIMATOR_TAPS, cutoff, TONE_DECIMATOR_BETA);
    DecimatingFir::new(taps, rate)
}

/// The station a known-exclusive minute (§4.6) belongs to, or `None` on
/// an ordinary minute where both stations may be on air.
fn exclusive_minute_station(minute_of_hour: u32) -> Option<Station> {
    if WWV_EXCLUSIVE_MINUTES.contains(&minute_of_hour) {
        Some(Station::Wwv)
    } else if WWVH_EXCLUSIVE_MINUTES.contains(&minute_of_hour) {
        Some(Station::Wwvh)
    } else {
        None
    }
}

/// Everything a worker needs that outlives any single packet or minute:
/// shared, read-only, or cheaply cloned state (§4.13, §5 "Immutable
/// after construction").
pub struct WorkerContext {
    pub descriptor: ChannelDescriptor,
    pub receiver_location: LatLon,
    pub phase2: Phase2Config,
    pub archive: ArchiveConfig,
    pub ionosphere: Arc<dyn IonosphericModel>,
    pub calibration: Arc<CalibrationRegistry>,
    pub validator: Arc<Mutex<GroundTruthValidator>>,
    pub convergence_store: Arc<StateStore<HashMap<String, KalmanState>>>,
    pub time_snap_store: Arc<StateStore<Option<TimeSnap>>>,
    /// Append-only per-minute `D_clock` CSV, the hand-off file Phase 3
    /// reads (`wwv_state::filenames::CLOCK_OFFSET_SERIES`).
    pub clock_offset_csv_path: PathBuf,
}

/// One channel's live processing state.
pub struct ChannelWorker {
    ctx: WorkerContext,
    resequencer: Resequencer,
    archive_segment: Option<ArchiveSegment>,
    startup_buffer: Option<StartupBuffer>,
    time_snap: Option<TimeSnap>,
    detector: StreamingDetector,
    fusion: MultiBroadcastFusion,
    discrimination_weights: LogisticWeights,
    tone_decimator: DecimatingFir,
    minute_buffer: Vec<Complex32>,
    last_packet_utc: f64,
    silence_flagged: bool,
}

impl ChannelWorker {
    /// Builds a fresh worker, restoring its Kalman trackers and `TimeSnap`
    /// from the last checkpoint under `ctx`'s state stores (§4.13, §7).
    pub fn new(ctx: WorkerContext, now_utc: f64) -> Self {
        let resequencer = Resequencer::new(ResequencerConfig {
            sample_rate_hz: ctx.descriptor.sample_rate_hz,
            max_gap_secs: 10.0,
        });

        let saved_states = ctx.convergence_store.load_or_reinit(|states: &HashMap<String, KalmanState>| {
            for state in states.values() {
                state.validate(now_utc, ctx.phase2.reset_on_drift_ms_per_min)?;
            }
            Ok(())
        });
        let mut fusion = MultiBroadcastFusion::new();
        fusion.restore_states(saved_states, ProcessNoise::default(), ctx.phase2.innovation_sigma);

        let time_snap = ctx.time_snap_store.load_or_reinit(|_| Ok(()));
        let startup_buffer = if time_snap.is_some() {
            None
        } else {
            Some(StartupBuffer::new(ctx.descriptor.sample_rate_hz as f64))
        };

        let tone_decimator = build_tone_decimator(ctx.descriptor.sample_rate_hz);

        Self {
            resequencer,
            archive_segment: None,
            startup_buffer,
            time_snap,
            detector: StreamingDetector::new(),
            fusion,
            discrimination_weights: LogisticWeights::default(),
            tone_decimator,
            minute_buffer: Vec::new(),
            last_packet_utc: now_utc,
            silence_flagged: false,
            ctx,
        }
    }

    /// Checkpoints the Kalman trackers and current `TimeSnap` to disk
    /// (§4.13 "periodic state checkpoint cadence", §7 versioned state).
    pub fn checkpoint(&self) -> WwvResult<()> {
        self.ctx.convergence_store.save(&self.fusion.states())?;
        self.ctx.time_snap_store.save(&self.time_snap)?;
        Ok(())
    }

    pub fn time_snap(&self) -> Option<&TimeSnap> {
        self.time_snap.as_ref()
    }

    fn ensure_archive_open(&mut self, now_utc: f64, start_rtp_ts: u32, ssrc: u32) -> WwvResult<()> {
        if self.archive_segment.is_some() {
            return Ok(());
        }
        let meta = SegmentMeta {
            channel_name: self.ctx.descriptor.name.clone(),
            center_freq_hz: self.ctx.descriptor.center_frequency_hz,
            sample_rate_hz: self.ctx.descriptor.sample_rate_hz,
            start_utc_system: now_utc,
            start_rtp_ts,
            ssrc,
        };
        self.archive_segment = Some(ArchiveSegment::create(&self.ctx.archive, meta, now_utc)?);
        Ok(())
    }

    /// Rotates the current archive segment if its configured duration has
    /// elapsed, closing the old file and opening a fresh one.
    pub fn maybe_rotate_archive(&mut self, now_utc: f64) -> WwvResult<()> {
        let should_rotate = self
            .archive_segment
            .as_ref()
            .map(|seg| seg.should_rotate(now_utc, self.ctx.archive.file_duration_sec))
            .unwrap_or(false);
        if should_rotate {
            if let Some(seg) = self.archive_segment.take() {
                let path = seg.close()?;
                info!(path = %path.display(), channel = %self.ctx.descriptor.name, "rotated archive segment");
            }
        }
        Ok(())
    }

    /// Feeds one RTP packet through the resequencer, emitting real and
    /// gap-filled samples into the archive and (until a `TimeSnap` is
    /// established) the startup detection buffer. Real samples are also
    /// decimated toward `STREAMING_SAMPLE_RATE_HZ` and accumulated for the
    /// next periodic `process_minute` call (§4.4).
    pub fn handle_packet(&mut self, packet: wwv_core::Packet, now_utc: f64) -> WwvResult<()> {
        self.last_packet_utc = now_utc;
        self.silence_flagged = false;

        self.ensure_archive_open(now_utc, packet.rtp_ts, packet.ssrc)?;
        let outcome = self.resequencer.ingest(packet);
        match outcome {
            wwv_ingest::resequencer::IngestOutcome::ResyncRequired => {
                warn!(channel = %self.ctx.descriptor.name, "resequencer resync required");
            }
            wwv_ingest::resequencer::IngestOutcome::TooOld => return Err(WwvError::PacketTooOld),
            wwv_ingest::resequencer::IngestOutcome::Duplicate => return Err(WwvError::PacketDuplicate),
            wwv_ingest::resequencer::IngestOutcome::Buffered => {}
        }

        for emission in self.resequencer.drain() {
            match emission {
                Emission::Samples { rtp_ts, samples } => {
                    if let Some(seg) = self.archive_segment.as_mut() {
                        seg.append_samples(&samples);
                    }
                    if let Some(buf) = self.startup_buffer.as_mut() {
                        if !samples.is_empty() {
                            buf.push(rtp_ts, &samples);
                        }
                    }
                    if !samples.is_empty() {
                        let decimated = self.tone_decimator.process(&samples);
                        self.minute_buffer.extend(decimated);
                    }
                }
                Emission::Gap(gap) => {
                    if let Some(seg) = self.archive_segment.as_mut() {
                        seg.record_gap(gap);
                    }
                }
                Emission::Discontinuity { cause } => {
                    warn!(channel = %self.ctx.descriptor.name, ?cause, "discontinuity");
                    if let Some(seg) = self.archive_segment.as_mut() {
                        seg.record_gap(GapEntry {
                            start_index: self.resequencer.emitted_samples(),
                            n_zeros: 0,
                            cause,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks whether the source has been silent longer than the
    /// resequencer's configured `max_gap_secs`, and if so records a
    /// `source_unavailable` discontinuity and forces a resync on the next
    /// packet rather than bridging an unbounded gap (§4.1, §5, §204).
    pub fn check_silence_timeout(&mut self, now_utc: f64) {
        if self.silence_flagged {
            return;
        }
        let elapsed = now_utc - self.last_packet_utc;
        if elapsed <= self.resequencer.max_gap_secs() {
            return;
        }
        warn!(channel = %self.ctx.descriptor.name, elapsed_secs = elapsed, "source silent past max_gap_secs");
        if let Some(seg) = self.archive_segment.as_mut() {
            seg.record_gap(GapEntry {
                start_index: self.resequencer.emitted_samples(),
                n_zeros: 0,
                cause: GapCause::SourceUnavailable,
            });
        }
        self.resequencer.mark_unsynced();
        self.silence_flagged = true;
    }

    /// Records `count` packets the inbound queue had to evict under
    /// back-pressure as queue-overflow discontinuities in the gap
    /// manifest (§5, §204).
    pub fn record_queue_overflow(&mut self, count: u64) {
        if count == 0 {
            return;
        }
        warn!(channel = %self.ctx.descriptor.name, count, "queue overflow recorded in gap manifest");
        if let Some(seg) = self.archive_segment.as_mut() {
            for _ in 0..count {
                seg.record_gap(GapEntry {
                    start_index: self.resequencer.emitted_samples(),
                    n_zeros: 0,
                    cause: GapCause::QueueOverflow,
                });
            }
        }
    }

    /// Attempts startup tone detection once the startup buffer has
    /// accumulated enough samples, adopting its result as the channel's
    /// first `TimeSnap` on success (§4.3).
    pub fn try_establish_time_snap(&mut self, station_hint: Station, wall_clock_utc_hint: f64) {
        let Some(buf) = self.startup_buffer.as_ref() else {
            return;
        };
        if !buf.is_full() {
            return;
        }
        if let Some(detection) = buf.detect(station_hint) {
            let snap = detection.into_time_snap(self.ctx.descriptor.sample_rate_hz, wall_clock_utc_hint);
            self.adopt_time_snap(snap);
            self.startup_buffer = None;
        }
    }

    /// Falls back to NTP or unsynchronised wall-clock once the startup
    /// window has elapsed without a tone detection (§4.3 tiered fallback).
    /// A no-op once a `TimeSnap` already exists, since the tiered-adoption
    /// rule in [`Self::adopt_time_snap`] would reject a downgrade anyway.
    pub fn apply_fallback_time_snap(&mut self, station_hint: Station, ntp_offset_ms: Option<f64>, wall_clock_utc: f64) {
        if self.time_snap.is_some() {
            return;
        }
        let snap = fallback_time_snap(
            ntp_offset_ms,
            wall_clock_utc,
            self.ctx.descriptor.sample_rate_hz,
            station_hint,
        );
        self.adopt_time_snap(snap);
        self.startup_buffer = None;
    }

    /// Adopts `candidate` only if it upgrades the current `TimeSnap`
    /// (§3/§8 property 2: monotonic tier, never downgrades).
    pub fn adopt_time_snap(&mut self, candidate: TimeSnap) {
        let should_adopt = match &self.time_snap {
            None => true,
            Some(current) => current.is_upgraded_by(&candidate),
        };
        if should_adopt {
            info!(channel = %self.ctx.descriptor.name, source = ?candidate.source, "adopted TimeSnap");
            self.time_snap = Some(candidate);
        }
    }

    /// Drains whatever decimated streaming samples have accumulated since
    /// the last call and, if any, runs them through `process_minute`. A
    /// no-op when nothing has arrived since the last check (§4.4, §4.13
    /// "periodic_tone_check_sec cadence").
    pub fn maybe_process_minute(&mut self, station: Station, minute_utc: f64) -> Vec<WwvError> {
        if self.minute_buffer.is_empty() {
            return Vec::new();
        }
        let samples = std::mem::take(&mut self.minute_buffer);
        self.process_minute(station, minute_utc, &samples)
    }

    /// Builds the five-feature discrimination vector (§4.6) from the
    /// streaming tone detections and a BCD cross-correlation pass over
    /// the same decimated minute.
    fn build_feature_vector(
        &self,
        station: Station,
        minute_utc: f64,
        minute_of_hour: u32,
        detections: &[wwv_core::ToneDetection],
        marker: &wwv_core::ToneDetection,
        streaming_samples: &[Complex32],
    ) -> FeatureVector {
        let snr_of = |tone_hz: f64| -> Option<f64> {
            detections
                .iter()
                .find(|d| (d.tone_frequency_hz - tone_hz).abs() < 1.0)
                .map(|d| d.snr_db)
        };

        let tone_power_ratio_db = snr_of(1000.0).unwrap_or(0.0) - snr_of(1200.0).unwrap_or(0.0);
        let exclusive_tone_presence = snr_of(500.0).unwrap_or(0.0) - snr_of(600.0).unwrap_or(0.0);
        let station_id_presence = (snr_of(440.0).unwrap_or(0.0) / 20.0).tanh();

        let template = bcd_reference_template(minute_of_hour, STREAMING_SAMPLE_RATE_HZ);
        let env = envelope(streaming_samples);
        let min_separation = (STREAMING_SAMPLE_RATE_HZ * 0.005) as usize;
        let peaks = correlate_and_find_peaks(&env, &template, 0.5, min_separation.max(1));
        let bcd_amplitude_ratio = match peaks.as_slice() {
            [a, b] if (a.amplitude + b.amplitude) > 0.0 => {
                (a.amplitude - b.amplitude) / (a.amplitude + b.amplitude)
            }
            _ => 0.0,
        };

        let doppler_cross_check = self
            .detector
            .doppler_hz(station.marker_tone_hz(), marker.phase_rad, minute_utc)
            .unwrap_or(0.0)
            .tanh();

        FeatureVector {
            tone_power_ratio_db,
            bcd_amplitude_ratio,
            exclusive_tone_presence,
            station_id_presence,
            doppler_cross_check,
        }
    }

    /// Appends one row to this channel's `clock_offset.csv`, writing a
    /// header only the first time the file is created (§6).
    fn append_clock_offset_record(&self, record: &ClockOffsetRecord) -> WwvResult<()> {
        let path = &self.ctx.clock_offset_csv_path;
        let write_header = !path.exists();
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(write_header).from_writer(file);
        writer.serialize(record).map_err(|e| WwvError::Serde(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }

    /// Runs tone detection + discrimination + propagation-mode solving
    /// for one decimated minute of samples, feeding the result into this
    /// worker's Kalman fusion accumulator and ground-truth validator
    /// (§4.4, §4.6, §4.8, §4.9, §4.10). A minute whose discrimination
    /// comes back uncertain is skipped before it ever reaches the Kalman
    /// tracker (§4.6 "uncertain minutes do not update D_clock").
    pub fn process_minute(
        &mut self,
        station: Station,
        minute_utc: f64,
        streaming_samples: &[Complex32],
    ) -> Vec<WwvError> {
        let (detections, mut errors) = self.detector.detect_minute(station, minute_utc, streaming_samples);

        let marker = detections
            .iter()
            .find(|d| (d.tone_frequency_hz - station.marker_tone_hz()).abs() < 1.0)
            .cloned();
        let Some(marker) = marker else {
            return errors;
        };

        let minute_of_hour = ((minute_utc / 60.0).floor() as i64).rem_euclid(60) as u32;
        let features = self.build_feature_vector(station, minute_utc, minute_of_hour, &detections, &marker, streaming_samples);
        let discrimination = discriminate(minute_utc, minute_of_hour, features, &self.discrimination_weights);

        if let Some(expected) = exclusive_minute_station(minute_of_hour) {
            if let Some(dominant) = discrimination.dominant {
                self.ctx.validator.lock().ingest(ValidationSample::SilentMinuteCrossCheck {
                    station,
                    expected,
                    discriminated: dominant,
                });
            }
        }

        if discrimination.dominant.is_none() {
            errors.push(WwvError::DiscriminationUncertain {
                max_p: discrimination.p_wwv.max(discrimination.p_wwvh),
            });
            return errors;
        }

        let candidates = enumerate_candidates(
            station,
            self.ctx.receiver_location,
            self.ctx.descriptor.center_frequency_hz / 1.0e6,
            minute_utc,
            self.ctx.ionosphere.as_ref(),
        );
        let observed_delay_ms = marker.timing_error_ms;
        let Some(selection) = select_mode(&candidates, observed_delay_ms) else {
            return errors;
        };

        self.ctx.validator.lock().ingest(ValidationSample::PropagationConsistency {
            station,
            mode: selection.mode,
            measured_delay_ms: observed_delay_ms,
            predicted_delay_ms: selection.predicted_delay_ms,
            tolerance_ms: selection.uncertainty_ms.max(0.5),
        });

        let d_clock_ms = observed_delay_ms - selection.predicted_delay_ms;
        let key = self.ctx.descriptor.station_freq_key(station);
        let calibration_offset_ms = self.ctx.calibration.offset_ms(&key);

        let measurement = ClockOffsetMeasurement {
            utc: minute_utc,
            station,
            freq_mhz: self.ctx.descriptor.center_frequency_hz / 1.0e6,
            d_clock_ms,
            propagation_delay_ms: selection.predicted_delay_ms,
            mode: selection.mode,
            confidence: marker.confidence.min(selection.confidence),
            uncertainty_ms: selection.uncertainty_ms,
        };

        let minutes_since_epoch = minute_utc / 60.0;
        match self.fusion.ingest(
            &key,
            &measurement,
            minutes_since_epoch,
            ProcessNoise::default(),
            self.ctx.phase2.innovation_sigma,
            calibration_offset_ms,
        ) {
            Ok(()) => {
                let record = ClockOffsetRecord {
                    system_time: minute_utc,
                    utc_time: minute_utc - d_clock_ms / 1000.0,
                    d_clock_ms,
                    station,
                    frequency_mhz: measurement.freq_mhz,
                    propagation_delay_ms: selection.predicted_delay_ms,
                    propagation_mode: selection.mode,
                    confidence: measurement.confidence,
                    uncertainty_ms: selection.uncertainty_ms,
                };
                if let Err(e) = self.append_clock_offset_record(&record) {
                    errors.push(e);
                }
                if let Some(rec_ms) = self.ctx.validator.lock().recommended_calibration_offset_ms(station) {
                    self.ctx.calibration.set_offset_ms(&key, rec_ms);
                }
            }
            Err(e) => errors.push(e),
        }

        errors
    }

    pub fn fused_d_clock_ms(&self) -> Option<(f64, f64)> {
        self.fusion.fused_d_clock_ms()
    }

    pub fn kalman_state(&mut self, station_freq_key: &str) -> &KalmanState {
        self.fusion
            .tracker_mut(station_freq_key, ProcessNoise::default(), self.ctx.phase2.innovation_sigma)
            .state()
    }

    /// Flushes every packet the resequencer can still drain in order and
    /// closes the archive cleanly (§5 shutdown policy). Packets that
    /// never became contiguous (a permanent gap at the tail) are left
    /// undrained rather than force-resynced, since shutdown should not
    /// fabricate a discontinuity the source never reported.
    pub fn shutdown(mut self) -> WwvResult<Option<PathBuf>> {
        self.checkpoint()?;
        for emission in self.resequencer.drain() {
            if let (Emission::Samples { samples, .. }, Some(seg)) = (emission, self.archive_segment.as_mut()) {
                seg.append_samples(&samples);
            }
        }
        match self.archive_segment.take() {
            Some(seg) => Ok(Some(seg.close()?)),
            None => Ok(None),
        }
    }
}
