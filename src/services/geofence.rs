//! Stop proximity evaluation
//!
//! Great-circle distance against each configured stop. Boundary is
//! inclusive: a bus exactly on the radius counts as approaching.

use crate::domain::types::{GeoPoint, GeofenceZone, StudentId, ZoneId};
use rustc_hash::FxHashSet;
use tracing::debug;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometers
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// A stop the bus has just come within range of
#[derive(Debug, Clone)]
pub struct ZoneTrigger {
    pub zone_id: ZoneId,
    pub stop_name: String,
    pub distance_km: f64,
    pub estimated_minutes: u32,
    pub students: Vec<StudentId>,
}

/// Evaluates positions against stop zones, once per stop per day
pub struct GeofenceEvaluator {
    zones: Vec<GeofenceZone>,
    default_radius_km: f64,
    average_speed_kmh: f64,
    notified: FxHashSet<ZoneId>,
}

impl GeofenceEvaluator {
    pub fn new(zones: Vec<GeofenceZone>, default_radius_km: f64, average_speed_kmh: f64) -> Self {
        Self { zones, default_radius_km, average_speed_kmh, notified: FxHashSet::default() }
    }

    /// Check one position against all stops not yet notified today
    pub fn evaluate(&mut self, position: GeoPoint) -> Vec<ZoneTrigger> {
        let mut triggers = Vec::new();

        for zone in &self.zones {
            if self.notified.contains(&zone.id) {
                continue;
            }

            let radius = zone.radius_km.unwrap_or(self.default_radius_km);
            let distance = haversine_km(position, zone.position());
            if distance > radius {
                continue;
            }

            debug!(
                zone_id = %zone.id,
                stop = %zone.name,
                distance_km = distance,
                "zone_entered"
            );

            triggers.push(ZoneTrigger {
                zone_id: zone.id,
                stop_name: zone.name.clone(),
                distance_km: distance,
                estimated_minutes: self.estimate_minutes(distance),
                students: zone.students.to_vec(),
            });
        }

        for trigger in &triggers {
            self.notified.insert(trigger.zone_id);
        }
        triggers
    }

    /// ETA at average speed, rounded up, never below one minute
    fn estimate_minutes(&self, distance_km: f64) -> u32 {
        if self.average_speed_kmh <= 0.0 {
            return 1;
        }
        let minutes = (distance_km / self.average_speed_kmh * 60.0).ceil() as u32;
        minutes.max(1)
    }

    /// Forget today's notifications so each stop can fire again tomorrow
    pub fn reset_day(&mut self) {
        self.notified.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Ben Thanh Market and Notre-Dame Cathedral, roughly 1 km apart
    const MARKET: GeoPoint = GeoPoint { lat: 10.772461, lon: 106.698055 };
    const CATHEDRAL: GeoPoint = GeoPoint { lat: 10.779783, lon: 106.699018 };

    fn zone(id: i32, center: GeoPoint, radius_km: Option<f64>, students: &[i64]) -> GeofenceZone {
        GeofenceZone {
            id: ZoneId(id),
            name: format!("STOP_{id}"),
            lat: center.lat,
            lon: center.lon,
            radius_km,
            students: students.iter().map(|s| StudentId(*s)).collect(),
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        let d = haversine_km(MARKET, CATHEDRAL);
        assert!(d > 0.7 && d < 0.95, "unexpected distance: {d}");
        assert_eq!(haversine_km(MARKET, MARKET), 0.0);
    }

    #[test]
    fn test_trigger_is_boundary_inclusive() {
        let d = haversine_km(MARKET, CATHEDRAL);

        // Radius exactly at the distance triggers
        let mut eval = GeofenceEvaluator::new(vec![zone(1, CATHEDRAL, Some(d), &[1])], 0.5, 30.0);
        let triggers = eval.evaluate(MARKET);
        assert_eq!(triggers.len(), 1);

        // Radius just under it does not
        let mut eval =
            GeofenceEvaluator::new(vec![zone(1, CATHEDRAL, Some(d - 0.01), &[1])], 0.5, 30.0);
        assert!(eval.evaluate(MARKET).is_empty());
    }

    #[test]
    fn test_default_radius_applies_when_zone_has_none() {
        // ~0.83 km apart, outside the 0.5 km default
        let mut eval = GeofenceEvaluator::new(vec![zone(1, CATHEDRAL, None, &[1])], 0.5, 30.0);
        assert!(eval.evaluate(MARKET).is_empty());

        let mut eval = GeofenceEvaluator::new(vec![zone(1, CATHEDRAL, None, &[1])], 1.0, 30.0);
        assert_eq!(eval.evaluate(MARKET).len(), 1);
    }

    #[test]
    fn test_eta_rounds_up_with_floor_of_one() {
        let eval = GeofenceEvaluator::new(vec![], 0.5, 30.0);
        // 0.5 km at 30 km/h is exactly 1 minute
        assert_eq!(eval.estimate_minutes(0.5), 1);
        // 0.6 km at 30 km/h is 1.2 minutes, rounds up to 2
        assert_eq!(eval.estimate_minutes(0.6), 2);
        // Very close still reports at least a minute
        assert_eq!(eval.estimate_minutes(0.001), 1);
    }

    #[test]
    fn test_each_stop_fires_once_per_day() {
        let mut eval =
            GeofenceEvaluator::new(vec![zone(1, CATHEDRAL, Some(2.0), &[1, 2])], 0.5, 30.0);

        let first = eval.evaluate(MARKET);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].students, vec![StudentId(1), StudentId(2)]);

        // Second ping in range stays quiet
        assert!(eval.evaluate(MARKET).is_empty());

        // Until the day resets
        eval.reset_day();
        assert_eq!(eval.evaluate(MARKET).len(), 1);
    }

    #[test]
    fn test_multiple_zones_in_range() {
        let mut eval = GeofenceEvaluator::new(
            vec![zone(1, CATHEDRAL, Some(2.0), &[1]), zone(2, MARKET, Some(2.0), &[2])],
            0.5,
            30.0,
        );
        let triggers = eval.evaluate(MARKET);
        assert_eq!(triggers.len(), 2);
    }
}
