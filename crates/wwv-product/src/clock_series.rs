//! Reader for the per-channel clock-offset CSV series (§6: "per-channel
//! CSV, one row per minute, columns `{system_time, utc_time, d_clock_ms,
//! station, frequency_mhz, propagation_delay_ms, propagation_mode,
//! confidence, uncertainty_ms}`"). Feeds C11's `t_utc = t_sys - D_clock(t_sys)`
//! mapping via linear interpolation between minute samples.

use std::path::Path;

use wwv_core::{PropagationMode, Station, WwvError, WwvResult};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClockOffsetRecord {
    pub system_time: f64,
    pub utc_time: f64,
    pub d_clock_ms: f64,
    pub station: Station,
    pub frequency_mhz: f64,
    pub propagation_delay_ms: f64,
    pub propagation_mode: PropagationMode,
    pub confidence: f64,
    pub uncertainty_ms: f64,
}

/// A loaded, time-sorted clock-offset series for one channel.
pub struct ClockOffsetSeries {
    records: Vec<ClockOffsetRecord>,
}

impl ClockOffsetSeries {
    pub fn from_records(mut records: Vec<ClockOffsetRecord>) -> Self {
        records.sort_by(|a, b| a.system_time.partial_cmp(&b.system_time).unwrap());
        Self { records }
    }

    pub fn load_csv(path: impl AsRef<Path>) -> WwvResult<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| WwvError::Serde(e.to_string()))?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            let record: ClockOffsetRecord = row.map_err(|e| WwvError::Serde(e.to_string()))?;
            records.push(record);
        }
        Ok(Self::from_records(records))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `D_clock(t_sys)` in milliseconds via linear interpolation between
    /// the two bracketing minute samples. Outside the series' range, the
    /// nearest endpoint's value is held constant (extrapolation would
    /// invent information the Kalman tracker never observed).
    pub fn d_clock_ms_at(&self, t_sys: f64) -> Option<f64> {
        if self.records.is_empty() {
            return None;
        }
        if self.records.len() == 1 {
            return Some(self.records[0].d_clock_ms);
        }
        if t_sys <= self.records[0].system_time {
            return Some(self.records[0].d_clock_ms);
        }
        let last = self.records.len() - 1;
        if t_sys >= self.records[last].system_time {
            return Some(self.records[last].d_clock_ms);
        }

        let idx = self.records.partition_point(|r| r.system_time <= t_sys);
        let before = &self.records[idx - 1];
        let after = &self.records[idx];
        let span = after.system_time - before.system_time;
        if span <= 0.0 {
            return Some(before.d_clock_ms);
        }
        let frac = (t_sys - before.system_time) / span;
        Some(before.d_clock_ms + frac * (after.d_clock_ms - before.d_clock_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(system_time: f64, d_clock_ms: f64) -> ClockOffsetRecord {
        ClockOffsetRecord {
            system_time,
            utc_time: system_time - d_clock_ms / 1000.0,
            d_clock_ms,
            station: Station::Wwv,
            frequency_mhz: 5.0,
            propagation_delay_ms: 4.5,
            propagation_mode: PropagationMode::OneHopF,
            confidence: 0.9,
            uncertainty_ms: 0.3,
        }
    }

    #[test]
    fn interpolates_linearly_between_minutes() {
        let series = ClockOffsetSeries::from_records(vec![record(0.0, 0.0), record(60.0, 6.0)]);
        let d = series.d_clock_ms_at(30.0).unwrap();
        assert!((d - 3.0).abs() < 1e-9);
    }

    #[test]
    fn holds_endpoint_outside_range() {
        let series = ClockOffsetSeries::from_records(vec![record(0.0, 1.0), record(60.0, 2.0)]);
        assert_eq!(series.d_clock_ms_at(-10.0).unwrap(), 1.0);
        assert_eq!(series.d_clock_ms_at(1000.0).unwrap(), 2.0);
    }

    #[test]
    fn empty_series_yields_none() {
        let series = ClockOffsetSeries::from_records(vec![]);
        assert!(series.d_clock_ms_at(0.0).is_none());
    }
}
