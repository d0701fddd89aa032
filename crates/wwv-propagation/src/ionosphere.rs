//! Ionospheric model (C7): pluggable layer-height/TEC lookup with three
//! runtime-selectable tiers and an additive learned-calibration
//! decorator, per §4.7 ("dynamic dispatch... expressed as an interface
//! with three concrete implementations and a composed calibration
//! decorator").

use std::f64::consts::PI;

/// Geographic point, decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

/// Layer height (km) and vertical TEC (TECU) lookup, parameterised by
/// UTC (seconds since epoch) and observation point.
pub trait IonosphericModel: Send + Sync {
    fn layer_height_km(&self, utc: f64, point: LatLon) -> f64;
    fn tec_tecu(&self, utc: f64, point: LatLon) -> f64;
}

fn local_hour_angle(utc: f64, lon_deg: f64) -> f64 {
    let utc_hour = (utc / 3600.0).rem_euclid(24.0);
    let local_hour = (utc_hour + lon_deg / 15.0).rem_euclid(24.0);
    local_hour
}

fn day_of_year(utc: f64) -> f64 {
    ((utc / 86400.0).rem_euclid(365.25)).floor()
}

/// Tier (a), preferred: an empirical climatology approximating IRI's
/// diurnal/seasonal F-layer behaviour (F2 peak height and vTEC) via a
/// harmonic fit. Not a literal IRI coefficient table — this system
/// consumes the climatology through an abstract interface and is
/// explicitly not in the business of replacing it (§1 non-goals).
pub struct IriClimatology;

impl IonosphericModel for IriClimatology {
    fn layer_height_km(&self, utc: f64, point: LatLon) -> f64 {
        let local_hour = local_hour_angle(utc, point.lon_deg);
        let day = day_of_year(utc);
        let seasonal = 10.0 * ((2.0 * PI * day / 365.25) - PI / 2.0).sin();
        let diurnal = 60.0 * (2.0 * PI * (local_hour - 14.0) / 24.0).cos();
        (300.0 - diurnal * 0.4 + seasonal).clamp(200.0, 450.0)
    }

    fn tec_tecu(&self, utc: f64, point: LatLon) -> f64 {
        let local_hour = local_hour_angle(utc, point.lon_deg);
        let day = day_of_year(utc);
        let seasonal = 1.0 + 0.3 * ((2.0 * PI * day / 365.25) - PI / 2.0).cos();
        let diurnal = ((local_hour - 14.0).abs() / 12.0).clamp(0.0, 1.0);
        let base = 40.0 * (1.0 - diurnal) + 5.0 * diurnal;
        (base * seasonal).max(2.0)
    }
}

/// Tier (b): a simpler parametric diurnal model, no seasonal term.
pub struct ParametricDiurnal {
    pub day_height_km: f64,
    pub night_height_km: f64,
    pub day_tec_tecu: f64,
    pub night_tec_tecu: f64,
}

impl Default for ParametricDiurnal {
    fn default() -> Self {
        Self {
            day_height_km: 300.0,
            night_height_km: 250.0,
            day_tec_tecu: 35.0,
            night_tec_tecu: 8.0,
        }
    }
}

impl ParametricDiurnal {
    fn day_fraction(&self, utc: f64, lon_deg: f64) -> f64 {
        let local_hour = local_hour_angle(utc, lon_deg);
        // smooth cosine transition centred on local noon, 2h twilight ramp
        let distance_from_noon = (local_hour - 12.0).abs().min(24.0 - (local_hour - 12.0).abs());
        (1.0 - (distance_from_noon / 12.0)).clamp(0.0, 1.0)
    }
}

impl IonosphericModel for ParametricDiurnal {
    fn layer_height_km(&self, utc: f64, point: LatLon) -> f64 {
        let f = self.day_fraction(utc, point.lon_deg);
        self.night_height_km + f * (self.day_height_km - self.night_height_km)
    }

    fn tec_tecu(&self, utc: f64, point: LatLon) -> f64 {
        let f = self.day_fraction(utc, point.lon_deg);
        self.night_tec_tecu + f * (self.day_tec_tecu - self.night_tec_tecu)
    }
}

/// Tier (c): static day/night constants, no interpolation. The cheapest
/// fallback when no climatology data is available.
pub struct StaticDayNight {
    pub day_height_km: f64,
    pub night_height_km: f64,
    pub day_tec_tecu: f64,
    pub night_tec_tecu: f64,
}

impl Default for StaticDayNight {
    fn default() -> Self {
        Self {
            day_height_km: 300.0,
            night_height_km: 250.0,
            day_tec_tecu: 30.0,
            night_tec_tecu: 10.0,
        }
    }
}

impl StaticDayNight {
    fn is_day(&self, utc: f64, lon_deg: f64) -> bool {
        let local_hour = local_hour_angle(utc, lon_deg);
        (6.0..18.0).contains(&local_hour)
    }
}

impl IonosphericModel for StaticDayNight {
    fn layer_height_km(&self, utc: f64, point: LatLon) -> f64 {
        if self.is_day(utc, point.lon_deg) {
            self.day_height_km
        } else {
            self.night_height_km
        }
    }

    fn tec_tecu(&self, utc: f64, point: LatLon) -> f64 {
        if self.is_day(utc, point.lon_deg) {
            self.day_tec_tecu
        } else {
            self.night_tec_tecu
        }
    }
}

/// Wraps any `IonosphericModel` with an additive calibration term learned
/// from Phase 2 residuals (§4.7). The offsets are updated by the caller
/// as new residual evidence arrives; this decorator itself is stateless
/// beyond holding the current offset.
pub struct CalibratedModel<M: IonosphericModel> {
    inner: M,
    height_offset_km: f64,
    tec_offset_tecu: f64,
}

impl<M: IonosphericModel> CalibratedModel<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            height_offset_km: 0.0,
            tec_offset_tecu: 0.0,
        }
    }

    pub fn set_calibration(&mut self, height_offset_km: f64, tec_offset_tecu: f64) {
        self.height_offset_km = height_offset_km;
        self.tec_offset_tecu = tec_offset_tecu;
    }

    pub fn calibration(&self) -> (f64, f64) {
        (self.height_offset_km, self.tec_offset_tecu)
    }
}

impl<M: IonosphericModel> IonosphericModel for CalibratedModel<M> {
    fn layer_height_km(&self, utc: f64, point: LatLon) -> f64 {
        (self.inner.layer_height_km(utc, point) + self.height_offset_km).max(100.0)
    }

    fn tec_tecu(&self, utc: f64, point: LatLon) -> f64 {
        (self.inner.tec_tecu(utc, point) + self.tec_offset_tecu).max(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOULDER: LatLon = LatLon {
        lat_deg: 40.07,
        lon_deg: -105.18,
    };

    #[test]
    fn static_model_switches_day_night_by_longitude() {
        let model = StaticDayNight::default();
        let noon_utc = 12.0 * 3600.0 - BOULDER.lon_deg / 15.0 * 3600.0;
        let midnight_utc = noon_utc + 12.0 * 3600.0;
        assert!(model.tec_tecu(noon_utc, BOULDER) > model.tec_tecu(midnight_utc, BOULDER));
    }

    #[test]
    fn calibration_decorator_shifts_output_additively() {
        let mut model = CalibratedModel::new(StaticDayNight::default());
        let before = model.tec_tecu(0.0, BOULDER);
        model.set_calibration(0.0, 5.0);
        let after = model.tec_tecu(0.0, BOULDER);
        assert!((after - before - 5.0).abs() < 1e-9);
    }

    #[test]
    fn parametric_diurnal_stays_within_bounds() {
        let model = ParametricDiurnal::default();
        for hour in 0..24 {
            let utc = hour as f64 * 3600.0;
            let tec = model.tec_tecu(utc, BOULDER);
            assert!(tec >= model.night_tec_tecu - 1e-9 && tec <= model.day_tec_tecu + 1e-9);
        }
    }
}
