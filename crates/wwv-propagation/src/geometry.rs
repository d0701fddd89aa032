//! Great-circle geometry helpers shared by the transmission-time solver.

use crate::ionosphere::LatLon;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine great-circle distance between two points, in kilometres.
pub fn great_circle_distance_km(a: LatLon, b: LatLon) -> f64 {
    let lat1 = a.lat_deg.to_radians();
    let lat2 = b.lat_deg.to_radians();
    let dlat = (b.lat_deg - a.lat_deg).to_radians();
    let dlon = (b.lon_deg - a.lon_deg).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Known transmitter sites for the three standard-time stations this
/// system discriminates between.
pub fn station_location(station: wwv_core::Station) -> LatLon {
    match station {
        wwv_core::Station::Wwv => LatLon {
            lat_deg: 40.678,
            lon_deg: -105.040,
        },
        wwv_core::Station::Wwvh => LatLon {
            lat_deg: 21.988,
            lon_deg: -159.783,
        },
        wwv_core::Station::Chu => LatLon {
            lat_deg: 45.295,
            lon_deg: -75.757,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_zero_for_identical_points() {
        let p = LatLon {
            lat_deg: 10.0,
            lon_deg: 20.0,
        };
        assert!(great_circle_distance_km(p, p) < 1e-6);
    }

    #[test]
    fn wwv_to_wwvh_is_roughly_right_order_of_magnitude() {
        let wwv = station_location(wwv_core::Station::Wwv);
        let wwvh = station_location(wwv_core::Station::Wwvh);
        let d = great_circle_distance_km(wwv, wwvh);
        assert!(d > 4000.0 && d < 5500.0, "d={d}");
    }
}
