//! Top-level orchestrator (C13): spawns one worker thread per configured
//! channel, routes inbound RTP packets to the right one by SSRC, and owns
//! everything shared across channels — the calibration registry, the
//! ionospheric model, the ground-truth validator, and the periodic state
//! checkpoint cadence (§4.13, §5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};
use wwv_core::{ChannelDescriptor, Packet, Station, StationHint, WwvResult};
use wwv_ingest::archive::ArchiveConfig;
use wwv_propagation::{CalibratedModel, IonosphericModel, IriClimatology, LatLon, ParametricDiurnal, StaticDayNight};
use wwv_state::{filenames, StateStore};
use wwv_timing::{GroundTruthValidator, ValidatorState};

use crate::config::{IonosphereTierConfig, PipelineConfig};
use crate::queue::BoundedPacketQueue;
use crate::registry::CalibrationRegistry;
use crate::worker::{ChannelWorker, WorkerContext};

/// Wall-clock poll interval a worker thread uses while idle, so it can
/// notice the shutdown flag without busy-spinning (§5).
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn build_ionosphere(tier: IonosphereTierConfig) -> Arc<dyn IonosphericModel> {
    match tier {
        IonosphereTierConfig::Climatology => Arc::new(CalibratedModel::new(IriClimatology)),
        IonosphereTierConfig::ParametricDiurnal => Arc::new(CalibratedModel::new(ParametricDiurnal::default())),
        IonosphereTierConfig::StaticDayNight => Arc::new(CalibratedModel::new(StaticDayNight::default())),
    }
}

/// The `Station` a channel's worker attempts startup detection against.
/// `Shared` channels try WWV first; co-channel WWVH is still recovered
/// by the periodic discriminator (C6) once streaming detection starts.
fn primary_station(hint: StationHint) -> Station {
    match hint {
        StationHint::Wwv | StationHint::Shared => Station::Wwv,
        StationHint::Wwvh => Station::Wwvh,
        StationHint::Chu => Station::Chu,
    }
}

/// A running channel: its inbound queue and the thread draining it.
struct ChannelHandle {
    ssrc: u32,
    queue: Arc<BoundedPacketQueue>,
    join: JoinHandle<ChannelWorker>,
}

/// Owns every channel worker, the shared calibration registry, and the
/// ground-truth validator. Constructed once from a [`PipelineConfig`] and
/// driven for the life of the process via [`Orchestrator::route_packet`];
/// the caller is expected to invoke [`Orchestrator::checkpoint_shared_state`]
/// on its own cadence, then tear down with [`Orchestrator::shutdown`].
pub struct Orchestrator {
    config: PipelineConfig,
    registry: Arc<CalibrationRegistry>,
    validator: Arc<Mutex<GroundTruthValidator>>,
    validator_store: Arc<StateStore<ValidatorState>>,
    channels: Vec<ChannelHandle>,
    shutdown_flag: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Builds every channel worker and spawns its thread. `now_utc` seeds
    /// each worker's silence-check clock and is used as the startup
    /// instant for state-age validation on load.
    pub fn start(config: PipelineConfig, now_utc: f64) -> WwvResult<Self> {
        std::fs::create_dir_all(&config.state_root)?;

        let registry = Arc::new(CalibrationRegistry::new());
        let calibration_store: StateStore<HashMap<String, f64>> = StateStore::new(
            config.state_root.join(filenames::BROADCAST_CALIBRATION),
            wwv_state::BROADCAST_CALIBRATION_SCHEMA_VERSION,
        );
        for (key, offset_ms) in calibration_store.load_or_reinit(|_| Ok(())) {
            registry.set_offset_ms(&key, offset_ms);
        }

        let validator_store = Arc::new(StateStore::new(
            config.state_root.join(filenames::VALIDATOR_STATE),
            wwv_state::VALIDATOR_STATE_SCHEMA_VERSION,
        ));
        let validator_state = validator_store.load_or_reinit(|_| Ok(()));
        let validator = Arc::new(Mutex::new(GroundTruthValidator::from_state(validator_state)));

        let ionosphere = build_ionosphere(config.ionosphere_tier);
        let receiver_location = LatLon {
            lat_deg: config.receiver_location.lat_deg,
            lon_deg: config.receiver_location.lon_deg,
        };
        let archive_config = ArchiveConfig {
            root: config.archive.root.clone(),
            file_duration_sec: config.archive.file_duration_sec,
            compression_level: config.archive.compression_level,
        };

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let mut channels = Vec::with_capacity(config.channels.len());

        for channel in &config.channels {
            let descriptor = ChannelDescriptor {
                name: channel.name.clone(),
                center_frequency_hz: channel.center_freq_hz,
                sample_rate_hz: channel.sample_rate_hz,
                station_hint: channel.station_hint,
                ssrc: channel.ssrc,
            };
            let channel_state_root = config.state_root.join(&channel.name);
            std::fs::create_dir_all(&channel_state_root)?;

            let ctx = WorkerContext {
                descriptor,
                receiver_location,
                phase2: config.phase2.clone(),
                archive: archive_config.clone(),
                ionosphere: ionosphere.clone(),
                calibration: registry.clone(),
                validator: validator.clone(),
                convergence_store: Arc::new(StateStore::new(
                    channel_state_root.join(filenames::CONVERGENCE_STATE),
                    wwv_state::CONVERGENCE_STATE_SCHEMA_VERSION,
                )),
                time_snap_store: Arc::new(StateStore::new(
                    channel_state_root.join(filenames::TIME_SNAP),
                    wwv_state::TIME_SNAP_SCHEMA_VERSION,
                )),
                clock_offset_csv_path: channel_state_root.join(filenames::CLOCK_OFFSET_SERIES),
            };

            let queue = Arc::new(BoundedPacketQueue::new(config.queue_capacity));
            let worker = ChannelWorker::new(ctx, now_utc);
            let station_hint = channel.station_hint;

            let thread_queue = queue.clone();
            let thread_shutdown = shutdown_flag.clone();
            let startup_buffer_sec = config.phase2.startup_buffer_sec;
            let checkpoint_interval_sec = config.phase2.periodic_tone_check_sec;
            let channel_name = channel.name.clone();

            let join = std::thread::spawn(move || {
                run_channel_worker(
                    worker,
                    thread_queue,
                    thread_shutdown,
                    station_hint,
                    startup_buffer_sec,
                    checkpoint_interval_sec,
                    now_utc,
                    channel_name,
                )
            });

            channels.push(ChannelHandle {
                ssrc: channel.ssrc,
                queue,
                join,
            });
        }

        Ok(Self {
            config,
            registry,
            validator,
            validator_store,
            channels,
            shutdown_flag,
        })
    }

    /// Routes one inbound packet to the channel worker matching its SSRC,
    /// applying the bounded-queue back-pressure policy (§5). Packets for
    /// an unrecognised SSRC are dropped and logged.
    pub fn route_packet(&self, packet: Packet) {
        match self.channels.iter().find(|c| c.ssrc == packet.ssrc) {
            Some(channel) => {
                if matches!(
                    channel.queue.push(packet),
                    crate::queue::PushOutcome::AcceptedWithEviction
                ) {
                    warn!(ssrc = channel.ssrc, "channel queue overflow, oldest packet dropped");
                }
            }
            None => warn!(ssrc = packet.ssrc, "packet for unrecognised SSRC, dropping"),
        }
    }

    pub fn registry(&self) -> &Arc<CalibrationRegistry> {
        &self.registry
    }

    /// Builds Phase 3's corrected, day-packaged product for `utc_day`
    /// (days since the Unix epoch) from each channel's raw archive and
    /// its `clock_offset.csv` hand-off file (§4.11, §4.12). Explicitly
    /// caller-driven, like [`Self::checkpoint_shared_state`]: Phase 3
    /// reads from disk rather than running off the live packet path, so
    /// there is no internal daily timer here.
    pub fn generate_daily_package(&self, utc_day: i64) -> WwvResult<PathBuf> {
        let day_start = utc_day as f64 * 86400.0;
        let day_end = day_start + 86400.0;
        let phase3_root = self.config.state_root.join("phase3").join(utc_day.to_string());

        let mut subchannels = Vec::new();
        for channel in &self.config.channels {
            let station = primary_station(channel.station_hint);
            let csv_path = self.config.state_root.join(&channel.name).join(filenames::CLOCK_OFFSET_SERIES);
            let series = match wwv_product::ClockOffsetSeries::load_csv(&csv_path) {
                Ok(series) if !series.is_empty() => series,
                _ => {
                    warn!(channel = %channel.name, "no clock offset series yet, skipping from daily package");
                    continue;
                }
            };

            let raw = collect_day_samples(&self.config.archive.root, &channel.name, day_start, day_end)?;
            if raw.is_empty() {
                continue;
            }

            let key = format!("{:?}_{:.3}", station, channel.center_freq_hz / 1.0e6);
            let calibration_offset_ms = self.registry.offset_ms(&key);
            let meta = wwv_product::CorrectedProductMeta {
                channel_name: channel.name.clone(),
                center_freq_hz: channel.center_freq_hz,
                station_name: format!("{station:?}"),
                clock_offset_series_version: wwv_state::CLOCK_OFFSET_SERIES_SCHEMA_VERSION,
                calibration_offset_ms,
            };
            let product_path = phase3_root.join(format!("{}.h5", channel.name));
            let written = wwv_product::generate_corrected_product(&raw, &series, &meta, &product_path)?;
            let samples = wwv_product::read_corrected_product_iq(&written)?;

            subchannels.push(wwv_product::SubchannelInput {
                channel_name: channel.name.clone(),
                center_freq_hz: channel.center_freq_hz,
                station_name: meta.station_name,
                calibration_offset_ms,
                expected_sample_count: (86400.0 * self.config.phase3.output_rate_hz) as u64,
                samples,
            });
        }

        wwv_product::package_day(&subchannels, utc_day, &phase3_root)
    }

    pub fn validator(&self) -> &Arc<Mutex<GroundTruthValidator>> {
        &self.validator
    }

    /// Persists the calibration registry snapshot and the ground-truth
    /// validator's accumulated statistics. Per-channel Kalman/TimeSnap
    /// state is checkpointed independently by each worker thread.
    pub fn checkpoint_shared_state(&self) -> WwvResult<()> {
        let calibration_store: StateStore<HashMap<String, f64>> = StateStore::new(
            self.config.state_root.join(filenames::BROADCAST_CALIBRATION),
            wwv_state::BROADCAST_CALIBRATION_SCHEMA_VERSION,
        );
        calibration_store.save(&self.registry.snapshot())?;

        let validator = self.validator.lock();
        self.validator_store.save(validator.state())?;
        Ok(())
    }

    /// Graceful shutdown (§5): signals every worker thread, waits up to
    /// `shutdown_deadline_sec` for them to flush and checkpoint, then
    /// returns. Rust has no safe way to force-kill a thread, so a worker
    /// that doesn't notice the flag in time is logged and left to finish
    /// on its own; the process exit (not this call) is the actual hard
    /// stop in that scenario.
    pub fn shutdown(self) -> WwvResult<()> {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.checkpoint_shared_state()?;

        let deadline = Duration::from_secs_f64(self.config.shutdown_deadline_sec.max(0.0));
        let start = std::time::Instant::now();
        for channel in self.channels {
            let remaining = deadline.saturating_sub(start.elapsed());
            info!(ssrc = channel.ssrc, "waiting for channel worker to finish");
            match join_with_timeout(channel.join, remaining) {
                Some(worker) => match worker.shutdown() {
                    Ok(Some(path)) => info!(path = %path.display(), ssrc = channel.ssrc, "closed archive segment on shutdown"),
                    Ok(None) => {}
                    Err(e) => warn!(ssrc = channel.ssrc, error = %e, "error closing archive on shutdown"),
                },
                None => warn!(ssrc = channel.ssrc, "channel worker did not finish within shutdown deadline"),
            }
        }
        Ok(())
    }
}

/// Scans `archive_root` for raw segments belonging to `channel_name`
/// that overlap `[day_start, day_end)`, reading each back and keeping
/// only the samples whose per-sample system time falls inside the day
/// (§4.11 "raw archive is tagged by system time only").
fn collect_day_samples(
    archive_root: &std::path::Path,
    channel_name: &str,
    day_start: f64,
    day_end: f64,
) -> WwvResult<Vec<wwv_product::TimedSample>> {
    let mut raw = Vec::new();
    let prefix = format!("{channel_name}_");
    let entries = match std::fs::read_dir(archive_root) {
        Ok(entries) => entries,
        Err(_) => return Ok(raw),
    };
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if !file_name.starts_with(&prefix) || !file_name.ends_with(".h5") {
            continue;
        }
        let (meta, samples) = wwv_ingest::archive::read_segment(entry.path())?;
        let segment_end = meta.start_utc_system + samples.len() as f64 / meta.sample_rate_hz as f64;
        if segment_end <= day_start || meta.start_utc_system >= day_end {
            continue;
        }
        for (i, sample) in samples.into_iter().enumerate() {
            let t_sys = meta.start_utc_system + i as f64 / meta.sample_rate_hz as f64;
            if t_sys >= day_start && t_sys < day_end {
                raw.push(wwv_product::TimedSample { t_sys, sample });
            }
        }
    }
    Ok(raw)
}

/// Joins `handle` but gives up (without leaking or detaching, since
/// `JoinHandle` has no safe abandon-and-continue primitive) once
/// `timeout` elapses, polling via a short sleep loop.
fn join_with_timeout(handle: JoinHandle<ChannelWorker>, timeout: Duration) -> Option<ChannelWorker> {
    let start = std::time::Instant::now();
    while !handle.is_finished() {
        if start.elapsed() >= timeout {
            return None;
        }
        std::thread::sleep(WORKER_POLL_INTERVAL.min(timeout));
    }
    handle.join().ok()
}

/// Body of a channel worker thread: pulls packets off its queue, feeds
/// them to the resequencer/archive, attempts `TimeSnap` establishment
/// until the startup window elapses (falling back to NTP/wall clock per
/// §4.3), and checkpoints its Kalman/TimeSnap state on `checkpoint_interval_sec`
/// cadence. Returns the worker so the caller can finish closing its
/// archive segment.
#[allow(clippy::too_many_arguments)]
fn run_channel_worker(
    mut worker: ChannelWorker,
    queue: Arc<BoundedPacketQueue>,
    shutdown_flag: Arc<AtomicBool>,
    station_hint: StationHint,
    startup_buffer_sec: f64,
    checkpoint_interval_sec: f64,
    started_at_utc: f64,
    channel_name: String,
) -> ChannelWorker {
    let station = primary_station(station_hint);
    let mut fallback_deadline = started_at_utc + startup_buffer_sec;
    let mut wall_clock_utc = started_at_utc;
    let mut next_checkpoint_utc = started_at_utc + checkpoint_interval_sec;
    let mut next_tone_check_utc = started_at_utc + checkpoint_interval_sec;

    loop {
        match queue.pop_timeout(WORKER_POLL_INTERVAL) {
            Some(packet) => {
                wall_clock_utc += WORKER_POLL_INTERVAL.as_secs_f64();
                if let Err(e) = worker.handle_packet(packet, wall_clock_utc) {
                    warn!(channel = %channel_name, error = %e, "packet handling error");
                }
                worker.try_establish_time_snap(station, wall_clock_utc);
                if let Err(e) = worker.maybe_rotate_archive(wall_clock_utc) {
                    warn!(channel = %channel_name, error = %e, "archive rotation error");
                }
            }
            None => {
                wall_clock_utc += WORKER_POLL_INTERVAL.as_secs_f64();
            }
        }

        worker.check_silence_timeout(wall_clock_utc);
        let overflow = queue.take_overflow_count();
        if overflow > 0 {
            worker.record_queue_overflow(overflow);
        }

        if worker.time_snap().is_none() && wall_clock_utc >= fallback_deadline {
            worker.apply_fallback_time_snap(station, None, wall_clock_utc);
            fallback_deadline = f64::INFINITY;
        }

        if wall_clock_utc >= next_tone_check_utc {
            for e in worker.maybe_process_minute(station, wall_clock_utc) {
                warn!(channel = %channel_name, error = %e, "minute processing error");
            }
            next_tone_check_utc = wall_clock_utc + checkpoint_interval_sec;
        }

        if wall_clock_utc >= next_checkpoint_utc {
            if let Err(e) = worker.checkpoint() {
                warn!(channel = %channel_name, error = %e, "periodic checkpoint failed");
            }
            next_checkpoint_utc = wall_clock_utc + checkpoint_interval_sec;
        }

        if shutdown_flag.load(Ordering::SeqCst) && queue.is_empty() {
            break;
        }
    }

    worker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveSurfaceConfig, ChannelConfig, Phase2Config, Phase3Config, ReceiverLocationConfig, RtpSourceConfig};

    fn test_config(state_root: std::path::PathBuf, archive_root: std::path::PathBuf) -> PipelineConfig {
        PipelineConfig {
            channels: vec![ChannelConfig {
                name: "wwv_5mhz".into(),
                center_freq_hz: 5_000_000.0,
                sample_rate_hz: 20_000,
                ssrc: 42,
                station_hint: StationHint::Wwv,
            }],
            rtp_source: RtpSourceConfig {
                multicast_group: "239.1.1.1".into(),
                port: 5004,
                interface: "eth0".into(),
            },
            receiver_location: ReceiverLocationConfig {
                lat_deg: 40.0,
                lon_deg: -105.0,
            },
            archive: ArchiveSurfaceConfig {
                root: archive_root,
                ..ArchiveSurfaceConfig::default()
            },
            phase2: Phase2Config::default(),
            phase3: Phase3Config::default(),
            ionosphere_tier: IonosphereTierConfig::StaticDayNight,
            state_root,
            queue_capacity: 64,
            shutdown_deadline_sec: 5.0,
        }
    }

    #[test]
    fn unrecognised_ssrc_is_dropped_not_panicking() {
        let state_dir = tempfile::tempdir().unwrap();
        let archive_dir = tempfile::tempdir().unwrap();
        let orchestrator =
            Orchestrator::start(test_config(state_dir.path().to_path_buf(), archive_dir.path().to_path_buf()), 0.0).unwrap();

        orchestrator.route_packet(Packet {
            seq: 0,
            rtp_ts: 0,
            ssrc: 9999,
            payload: Vec::new(),
        });

        orchestrator.shutdown().unwrap();
    }

    #[test]
    fn shutdown_checkpoints_and_closes_cleanly() {
        let state_dir = tempfile::tempdir().unwrap();
        let archive_dir = tempfile::tempdir().unwrap();
        let state_root = state_dir.path().to_path_buf();
        let orchestrator = Orchestrator::start(test_config(state_root.clone(), archive_dir.path().to_path_buf()), 0.0).unwrap();

        orchestrator.route_packet(Packet {
            seq: 0,
            rtp_ts: 0,
            ssrc: 42,
            payload: vec![num_complex::Complex32::new(0.0, 0.0); 320],
        });
        std::thread::sleep(Duration::from_millis(50));
        orchestrator.shutdown().unwrap();

        assert!(state_root.join("wwv_5mhz").join(filenames::TIME_SNAP).exists());
    }
}
