//! Daily packager (C12): at end of UTC day, bundles every channel's
//! corrected product into one multi-subchannel container suitable for a
//! single atomic upload (§4.12).

use std::path::{Path, PathBuf};

use hdf5::File as H5File;
use tracing::info;
use wwv_core::{Sample, WwvError, WwvResult};

/// One channel's contribution to the daily container: its full day of
/// 10 Hz corrected IQ plus the attributes the packager documents
/// per-subchannel.
pub struct SubchannelInput {
    pub channel_name: String,
    pub center_freq_hz: f64,
    pub station_name: String,
    pub calibration_offset_ms: f64,
    pub samples: Vec<Sample>,
    /// Expected sample count for a full UTC day at 10 Hz (86400 * 10),
    /// used to compute this subchannel's completeness fraction.
    pub expected_sample_count: u64,
}

/// Day-wide completeness statistics written to the container's top-level
/// metadata (§4.12).
#[derive(Debug, Clone, Default)]
pub struct DayCompleteness {
    pub subchannel_count: u32,
    pub mean_completeness_fraction: f64,
    pub min_completeness_fraction: f64,
}

fn completeness_fraction(input: &SubchannelInput) -> f64 {
    if input.expected_sample_count == 0 {
        return 0.0;
    }
    (input.samples.len() as f64 / input.expected_sample_count as f64).min(1.0)
}

pub fn compute_day_completeness(inputs: &[SubchannelInput]) -> DayCompleteness {
    if inputs.is_empty() {
        return DayCompleteness::default();
    }
    let fractions: Vec<f64> = inputs.iter().map(completeness_fraction).collect();
    let mean = fractions.iter().sum::<f64>() / fractions.len() as f64;
    let min = fractions.iter().cloned().fold(f64::INFINITY, f64::min);
    DayCompleteness {
        subchannel_count: inputs.len() as u32,
        mean_completeness_fraction: mean,
        min_completeness_fraction: min,
    }
}

/// Writes one multi-subchannel HDF5 container for `utc_day` (days since
/// epoch), one group per input frequency, each carrying that subchannel's
/// day of 10 Hz IQ plus its own metadata block, and a top-level
/// completeness summary (§4.12: N subchannels, one per frequency).
pub fn package_day(inputs: &[SubchannelInput], utc_day: i64, output_root: impl AsRef<Path>) -> WwvResult<PathBuf> {
    if inputs.is_empty() {
        return Err(WwvError::ArchiveWriteFailed("no subchannels to package".into()));
    }
    let completeness = compute_day_completeness(inputs);

    let output_root = output_root.as_ref();
    std::fs::create_dir_all(output_root)?;
    let path = output_root.join(format!("day_{utc_day}.h5"));
    let file = H5File::create(&path).map_err(|e| WwvError::ArchiveWriteFailed(format!("create {path:?}: {e}")))?;

    let top_meta = file
        .create_group("meta")
        .map_err(|e| WwvError::ArchiveWriteFailed(format!("create /meta: {e}")))?;
    write_f64_attr(&top_meta, "utc_day", utc_day as f64)?;
    write_f64_attr(&top_meta, "subchannel_count", completeness.subchannel_count as f64)?;
    write_f64_attr(&top_meta, "mean_completeness_fraction", completeness.mean_completeness_fraction)?;
    write_f64_attr(&top_meta, "min_completeness_fraction", completeness.min_completeness_fraction)?;

    for input in inputs {
        let group_name = format!("subchannel_{}", input.channel_name);
        let group = file
            .create_group(&group_name)
            .map_err(|e| WwvError::ArchiveWriteFailed(format!("create /{group_name}: {e}")))?;

        let n = input.samples.len();
        let mut iq = ndarray::Array2::<f32>::zeros((n, 2));
        for (i, s) in input.samples.iter().enumerate() {
            iq[[i, 0]] = s.re;
            iq[[i, 1]] = s.im;
        }
        group
            .new_dataset::<f32>()
            .shuffle()
            .deflate(9)
            .shape((n, 2))
            .create("iq")
            .and_then(|ds| ds.write(&iq))
            .map_err(|e| WwvError::ArchiveWriteFailed(format!("write /{group_name}/iq: {e}")))?;

        write_f64_attr(&group, "center_freq_hz", input.center_freq_hz)?;
        write_str_attr(&group, "station", &input.station_name)?;
        write_f64_attr(&group, "calibration_offset_ms", input.calibration_offset_ms)?;
        write_f64_attr(&group, "completeness_fraction", completeness_fraction(input))?;
    }

    drop(file);
    info!(path = %path.display(), subchannels = inputs.len(), "wrote daily package");
    Ok(path)
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

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex32;

    fn input(name: &str, n_samples: usize, expected: u64) -> SubchannelInput {
        SubchannelInput {
            channel_name: name.into(),
            center_freq_hz: 5_000_000.0,
            station_name: "WWV".into(),
            calibration_offset_ms: 0.1,
            samples: vec![Complex32::new(0.0, 0.0); n_samples],
            expected_sample_count: expected,
        }
    }

    #[test]
    fn completeness_reflects_missing_samples() {
        let inputs = vec![input("a", 864_000, 864_000), input("b", 432_000, 864_000)];
        let c = compute_day_completeness(&inputs);
        assert_eq!(c.subchannel_count, 2);
        assert!((c.mean_completeness_fraction - 0.75).abs() < 1e-9);
        assert!((c.min_completeness_fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rejects_empty_input_set() {
        let result = package_day(&[], 19876, std::env::temp_dir());
        assert!(result.is_err());
    }
}
