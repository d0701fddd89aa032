//! Raw archive writer (C2).
//!
//! Writes an append-only, lossless, time-tagged HDF5 container per hour per
//! channel: `/iq` (float32 N×2), `/gaps` (structured gap manifest),
//! `/meta` attributes. Tagged with *system time only* — precise UTC comes
//! from Phase 2's TimeSnap, applied at read time by Phase 3 (§4.2, §6).

use std::path::{Path, PathBuf};

use hdf5::File as H5File;
use tracing::{info, warn};
use wwv_core::{GapEntry, Sample, WwvError, WwvResult};

/// Per-file metadata written to `/meta` attributes.
#[derive(Debug, Clone)]
pub struct SegmentMeta {
    pub channel_name: String,
    pub center_freq_hz: f64,
    pub sample_rate_hz: u32,
    pub start_utc_system: f64,
    pub start_rtp_ts: u32,
    pub ssrc: u32,
}

/// Configuration for archive rotation and compression (§6, §4.2).
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub root: PathBuf,
    pub file_duration_sec: f64,
    pub compression_level: u8,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./archive"),
            file_duration_sec: 3600.0,
            compression_level: 9,
        }
    }
}

/// Single-writer-until-closed append target for one hour of raw IQ.
///
/// Never modified after `close()`. Rotation happens purely on wall-clock
/// duration, never on detection events, so downstream consumers can rely
/// on fixed, predictable file boundaries.
pub struct ArchiveSegment {
    file: H5File,
    path: PathBuf,
    meta: SegmentMeta,
    samples: Vec<Sample>,
    gaps: Vec<GapEntry>,
    opened_at_system: f64,
    compression_level: u8,
}

impl ArchiveSegment {
    pub fn create(config: &ArchiveConfig, meta: SegmentMeta, now_utc: f64) -> WwvResult<Self> {
        std::fs::create_dir_all(&config.root)?;
        let file_name = format!(
            "{}_{:.0}.h5",
            meta.channel_name,
            meta.start_utc_system.floor()
        );
        let path = config.root.join(file_name);
        let file = H5File::create(&path)
            .map_err(|e| WwvError::ArchiveWriteFailed(format!("create {path:?}: {e}")))?;
        info!(path = %path.display(), channel = %meta.channel_name, "opened raw archive segment");
        Ok(Self {
            file,
            path,
            meta,
            samples: Vec::new(),
            gaps: Vec::new(),
            opened_at_system: now_utc,
            compression_level: config.compression_level,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends samples to the in-memory segment buffer. The actual HDF5
    /// write happens at `close()`, matching the "append-only" contract
    /// while keeping the happy path a single contiguous dataset write.
    pub fn append_samples(&mut self, samples: &[Sample]) {
        self.samples.extend_from_slice(samples);
    }

    pub fn record_gap(&mut self, gap: GapEntry) {
        self.gaps.push(gap);
    }

    pub fn should_rotate(&self, now_utc: f64, file_duration_sec: f64) -> bool {
        now_utc - self.opened_at_system >= file_duration_sec
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Flushes `/iq`, `/gaps`, and `/meta` and closes the file. Byte-shuffle
    /// + deflate at `compression_level`, matching §6's "compression level 9
    /// with byte-shuffle".
    pub fn close(self) -> WwvResult<PathBuf> {
        let n = self.samples.len();
        let mut iq = ndarray::Array2::<f32>::zeros((n, 2));
        for (i, s) in self.samples.iter().enumerate() {
            iq[[i, 0]] = s.re;
            iq[[i, 1]] = s.im;
        }

        self.file
            .new_dataset::<f32>()
            .shuffle()
            .deflate(self.compression_level)
            .shape((n, 2))
            .create("iq")
            .and_then(|ds| ds.write(&iq))
            .map_err(|e| WwvError::ArchiveWriteFailed(format!("write /iq: {e}")))?;

        if !self.gaps.is_empty() {
            let gap_rows: Vec<(u64, u64, u8)> = self
                .gaps
                .iter()
                .map(|g| (g.start_index, g.n_zeros, g.cause as u8))
                .collect();
            let mut flat = ndarray::Array2::<u64>::zeros((gap_rows.len(), 2));
            for (i, (start, n_zeros, _cause)) in gap_rows.iter().enumerate() {
                flat[[i, 0]] = *start;
                flat[[i, 1]] = *n_zeros;
            }
            self.file
                .new_dataset::<u64>()
                .shape((gap_rows.len(), 2))
                .create("gaps")
                .and_then(|ds| ds.write(&flat))
                .map_err(|e| WwvError::ArchiveWriteFailed(format!("write /gaps: {e}")))?;
        }

        let meta_group = self
            .file
            .create_group("meta")
            .map_err(|e| WwvError::ArchiveWriteFailed(format!("create /meta: {e}")))?;
        write_str_attr(&meta_group, "channel_name", &self.meta.channel_name)?;
        write_f64_attr(&meta_group, "center_freq_hz", self.meta.center_freq_hz)?;
        write_f64_attr(
            &meta_group,
            "sample_rate_hz",
            self.meta.sample_rate_hz as f64,
        )?;
        write_f64_attr(
            &meta_group,
            "start_utc_system",
            self.meta.start_utc_system,
        )?;
        write_f64_attr(&meta_group, "start_rtp_ts", self.meta.start_rtp_ts as f64)?;
        write_f64_attr(&meta_group, "ssrc", self.meta.ssrc as f64)?;

        warn_on_unusual_gap_density(n, &self.gaps);

        drop(self.file);
        info!(path = %self.path.display(), samples = n, gaps = self.gaps.len(), "closed raw archive segment");
        Ok(self.path)
    }
}

/// Reads back a closed raw archive segment's samples and metadata, the
/// form Phase 3's daily package assembly needs to replay a day of Phase 1
/// archive into `generate_corrected_product` (§4.11, §4.12).
pub fn read_segment(path: impl AsRef<Path>) -> WwvResult<(SegmentMeta, Vec<Sample>)> {
    let path = path.as_ref();
    let file = H5File::open(path).map_err(|e| WwvError::ArchiveWriteFailed(format!("open {path:?}: {e}")))?;
    let iq: ndarray::Array2<f32> = file
        .dataset("iq")
        .and_then(|ds| ds.read_2d())
        .map_err(|e| WwvError::ArchiveWriteFailed(format!("read /iq: {e}")))?;
    let samples = (0..iq.shape()[0]).map(|i| Sample::new(iq[[i, 0]], iq[[i, 1]])).collect();

    let meta_group = file
        .group("meta")
        .map_err(|e| WwvError::ArchiveWriteFailed(format!("open /meta: {e}")))?;
    let meta = SegmentMeta {
        channel_name: read_str_attr(&meta_group, "channel_name")?,
        center_freq_hz: read_f64_attr(&meta_group, "center_freq_hz")?,
        sample_rate_hz: read_f64_attr(&meta_group, "sample_rate_hz")? as u32,
        start_utc_system: read_f64_attr(&meta_group, "start_utc_system")?,
        start_rtp_ts: read_f64_attr(&meta_group, "start_rtp_ts")? as u32,
        ssrc: read_f64_attr(&meta_group, "ssrc")? as u32,
    };
    Ok((meta, samples))
}

fn read_f64_attr(group: &hdf5::Group, name: &str) -> WwvResult<f64> {
    group
        .attr(name)
        .and_then(|a| a.read_scalar())
        .map_err(|e| WwvError::ArchiveWriteFailed(format!("attr {name}: {e}")))
}

fn read_str_attr(group: &hdf5::Group, name: &str) -> WwvResult<String> {
    let v: hdf5::types::VarLenUnicode = group
        .attr(name)
        .and_then(|a| a.read_scalar())
        .map_err(|e| WwvError::ArchiveWriteFailed(format!("attr {name}: {e}")))?;
    Ok(v.to_string())
}

fn write_f64_attr(group: &hdf5::Group, name: &str, value: f64) -> WwvResult<()> {
    group
        .new_attr::<f64>()
        .create(name)
        .and_then(|attr| attr.write_scalar(&value))
        .map_err(|e| WwvError::ArchiveWriteFailed(format!("attr {name}: {e}")))
}

fn write_str_attr(group: &hdf5::Group, name: &str, value: &str) -> WwvResult<()> {
    let varlen = hdf5::types::VarLenUnicode::from(value);
    group
        .new_attr::<hdf5::types::VarLenUnicode>()
        .create(name)
        .and_then(|attr| attr.write_scalar(&varlen))
        .map_err(|e| WwvError::ArchiveWriteFailed(format!("attr {name}: {e}")))
}

fn warn_on_unusual_gap_density(n_samples: usize, gaps: &[GapEntry]) {
    let zero_samples: u64 = gaps.iter().map(|g| g.n_zeros).sum();
    if n_samples > 0 && (zero_samples as f64 / n_samples as f64) > 0.1 {
        warn!(
            zero_samples,
            n_samples, "archive segment is more than 10% zero-filled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wwv_core::GapCause;

    #[test]
    fn round_trip_is_bit_identical() {
        // Property 7: writing then reading a raw archive yields bit-identical samples.
        let dir = tempfile::tempdir().unwrap();
        let config = ArchiveConfig {
            root: dir.path().to_path_buf(),
            file_duration_sec: 3600.0,
            compression_level: 6,
        };
        let meta = SegmentMeta {
            channel_name: "wwv_5mhz".into(),
            center_freq_hz: 5_000_000.0,
            sample_rate_hz: 16_000,
            start_utc_system: 1_700_000_000.0,
            start_rtp_ts: 0,
            ssrc: 42,
        };
        let mut seg = ArchiveSegment::create(&config, meta, 1_700_000_000.0).unwrap();
        let samples: Vec<Sample> = (0..100)
            .map(|i| Sample::new(i as f32 * 0.01, -(i as f32) * 0.02))
            .collect();
        seg.append_samples(&samples);
        seg.record_gap(GapEntry {
            start_index: 50,
            n_zeros: 10,
            cause: GapCause::PacketLoss,
        });
        let path = seg.close().unwrap();

        let file = H5File::open(&path).unwrap();
        let iq: ndarray::Array2<f32> = file.dataset("iq").unwrap().read_2d().unwrap();
        assert_eq!(iq.shape(), &[100, 2]);
        for (i, s) in samples.iter().enumerate() {
            assert_eq!(iq[[i, 0]], s.re);
            assert_eq!(iq[[i, 1]], s.im);
        }
    }
}
