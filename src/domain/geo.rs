use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula, in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A free-form location. Coordinates are optional; an address alone is valid
/// but cannot be ranked by distance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Location {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Self::default()
        }
    }

    /// Returns `(lat, lon)` in degrees when both are present and finite.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Great-circle distance in kilometers.
///
/// Returns `f64::INFINITY` when either point has no usable coordinates, which
/// marks it as unrankable rather than failing.
pub fn distance(a: &Location, b: &Location) -> f64 {
    let (Some((lat1, lon1)), Some((lat2, lon2))) = (a.coordinates(), b.coordinates()) else {
        return f64::INFINITY;
    };

    let (lat1, lon1) = (lat1.to_radians(), lon1.to_radians());
    let (lat2, lon2) = (lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Keeps candidates within `max_distance` km of `target`, nearest first.
///
/// The sort is stable, so candidates at equal distance keep their input order.
pub fn rank_within_radius<'a, K, I>(
    target: &Location,
    candidates: I,
    max_distance: f64,
) -> Vec<(K, f64)>
where
    I: IntoIterator<Item = (K, &'a Location)>,
{
    let mut ranked: Vec<(K, f64)> = candidates
        .into_iter()
        .map(|(id, location)| (id, distance(target, location)))
        .filter(|(_, km)| *km <= max_distance)
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranked
}
