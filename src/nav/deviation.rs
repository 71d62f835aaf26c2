//! Route deviation geometry
//!
//! Pure computation, no I/O: project a position onto each route segment in a
//! locally-linearized latitude/longitude frame, measure the great-circle
//! distance to the closest projection, and derive progress and remaining
//! distance from the same closest-segment scan.

use crate::config::NavigationConfig;
use crate::nav::geo::GeoPoint;

/// Outcome of one deviation computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviationResult {
    pub is_off_route: bool,
    /// Distance to the closest point on the route, meters
    pub deviation_m: f64,
    /// Index of the segment containing the closest point
    pub closest_segment: usize,
    pub closest_point: GeoPoint,
}

impl DeviationResult {
    /// On-route result used for degenerate paths and the cheap pre-check
    fn on_route_at(position: GeoPoint) -> Self {
        Self {
            is_off_route: false,
            deviation_m: 0.0,
            closest_segment: 0,
            closest_point: position,
        }
    }
}

/// Deviation calculator with fixed tolerances
#[derive(Debug, Clone, Copy)]
pub struct DeviationCalculator {
    off_route_threshold_m: f64,
    on_path_tolerance_m: f64,
}

impl DeviationCalculator {
    pub fn new(off_route_threshold_m: f64, on_path_tolerance_m: f64) -> Self {
        Self {
            off_route_threshold_m,
            on_path_tolerance_m,
        }
    }

    pub fn from_config(config: &NavigationConfig) -> Self {
        Self::new(config.off_route_threshold_m, config.on_path_tolerance_m)
    }

    /// Deviation against the configured off-route threshold
    pub fn calculate(&self, position: GeoPoint, path: &[GeoPoint]) -> DeviationResult {
        self.calculate_with_tolerance(position, path, self.off_route_threshold_m)
    }

    /// Deviation against an explicit tolerance
    ///
    /// Paths with fewer than two points yield the on-route no-op result. When
    /// the position sits within the on-path tolerance of any route vertex, the
    /// precise per-segment scan is skipped entirely.
    pub fn calculate_with_tolerance(
        &self,
        position: GeoPoint,
        path: &[GeoPoint],
        tolerance_m: f64,
    ) -> DeviationResult {
        if path.len() < 2 {
            return DeviationResult::on_route_at(position);
        }
        if self.near_any_vertex(position, path) {
            return DeviationResult::on_route_at(position);
        }

        let mut min_distance = f64::MAX;
        let mut closest_segment = 0;
        let mut closest_point = path[0];

        for (i, pair) in path.windows(2).enumerate() {
            let (distance, projected) = distance_to_segment(position, pair[0], pair[1]);
            if distance < min_distance {
                min_distance = distance;
                closest_segment = i;
                closest_point = projected;
            }
        }

        DeviationResult {
            is_off_route: min_distance > tolerance_m,
            deviation_m: min_distance,
            closest_segment,
            closest_point,
        }
    }

    /// Fraction of cumulative segment length already traveled, 0..1
    ///
    /// Counts full segments before the closest one; the partial segment in
    /// progress does not contribute until it is passed.
    pub fn route_progress(&self, position: GeoPoint, path: &[GeoPoint]) -> f64 {
        if path.len() < 2 {
            return 0.0;
        }
        let deviation = self.calculate(position, path);

        let mut total = 0.0;
        let mut traveled = 0.0;
        for (i, pair) in path.windows(2).enumerate() {
            let segment = pair[0].distance_to(&pair[1]);
            total += segment;
            if i < deviation.closest_segment {
                traveled += segment;
            }
        }
        if total > 0.0 {
            (traveled / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Meters left: position to the end of the closest segment, plus every
    /// segment after it
    pub fn remaining_distance(&self, position: GeoPoint, path: &[GeoPoint]) -> f64 {
        if path.len() < 2 {
            return 0.0;
        }
        let deviation = self.calculate(position, path);

        let next_vertex = deviation.closest_segment + 1;
        let mut remaining = position.distance_to(&path[next_vertex]);
        for pair in path[next_vertex..].windows(2) {
            remaining += pair[0].distance_to(&pair[1]);
        }
        remaining
    }

    fn near_any_vertex(&self, position: GeoPoint, path: &[GeoPoint]) -> bool {
        path.iter()
            .any(|vertex| position.distance_to(vertex) <= self.on_path_tolerance_m)
    }
}

/// Clamped projection of `p` onto segment `a`→`b` in a frame where longitude
/// is scaled by the cosine of the segment's mean latitude. Returns the
/// great-circle distance to the projection and the projection itself.
fn distance_to_segment(p: GeoPoint, a: GeoPoint, b: GeoPoint) -> (f64, GeoPoint) {
    let lat_scale = ((a.lat + b.lat) / 2.0).to_radians().cos();

    let ax = a.lon * lat_scale;
    let ay = a.lat;
    let bx = b.lon * lat_scale;
    let by = b.lat;
    let px = p.lon * lat_scale;
    let py = p.lat;

    let dx = bx - ax;
    let dy = by - ay;
    let length_sq = dx * dx + dy * dy;

    let t = if length_sq == 0.0 {
        0.0
    } else {
        (((px - ax) * dx + (py - ay) * dy) / length_sq).clamp(0.0, 1.0)
    };

    let projected = GeoPoint::new(ay + t * dy, (ax + t * dx) / lat_scale);
    (p.distance_to(&projected), projected)
}
