//! Route acquisition boundary and conversion into headset waypoints
//!
//! The link core never fetches routes itself. A [`RoutePlanner`]
//! implementation (HTTP client, cache, fixture) returns [`RouteLeg`]s whose
//! geometry is an encoded polyline; this module decodes the polyline and
//! projects the geographic points into the headset's local tangent-plane
//! frame.

use crate::error::{Error, Result};
use crate::nav::geo::{GeoPoint, haversine_m};
use crate::protocol::messages::Waypoint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Travel mode requested from the routing collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Walking,
    Driving,
    Bicycling,
    Transit,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Walking => "walking",
            TravelMode::Driving => "driving",
            TravelMode::Bicycling => "bicycling",
            TravelMode::Transit => "transit",
        }
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One leg of a planned route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
    pub distance_m: f64,
    pub duration_s: u32,
    /// Encoded polyline of the leg's geometry
    pub polyline: String,
}

/// Routing collaborator boundary
///
/// Implementations fetch routes however they like; the core only consumes the
/// result.
pub trait RoutePlanner {
    fn plan(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        mode: TravelMode,
    ) -> Result<Vec<RouteLeg>>;
}

/// Decode all leg polylines into one continuous point list
pub fn leg_points(legs: &[RouteLeg]) -> Result<Vec<GeoPoint>> {
    let mut points = Vec::new();
    for leg in legs {
        points.extend(decode_polyline(&leg.polyline)?);
    }
    Ok(points)
}

/// Total length and duration across legs
pub fn leg_totals(legs: &[RouteLeg]) -> (f64, u32) {
    legs.iter()
        .fold((0.0, 0), |(d, t), leg| (d + leg.distance_m, t + leg.duration_s))
}

/// Decode an encoded polyline (5-decimal precision, zig-zag varint per axis)
pub fn decode_polyline(encoded: &str) -> Result<Vec<GeoPoint>> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lon: i64 = 0;

    while index < bytes.len() {
        let (delta, next) = decode_polyline_value(bytes, index)?;
        lat += delta;
        index = next;
        let (delta, next) = decode_polyline_value(bytes, index)?;
        lon += delta;
        index = next;
        points.push(GeoPoint::new(lat as f64 / 1e5, lon as f64 / 1e5));
    }
    Ok(points)
}

/// One zig-zag varint starting at `index`; returns the value and the index
/// after it
fn decode_polyline_value(bytes: &[u8], mut index: usize) -> Result<(i64, usize)> {
    let mut result: i64 = 0;
    let mut shift = 0u32;
    loop {
        if index >= bytes.len() {
            return Err(Error::Protocol("truncated polyline".to_string()));
        }
        let chunk = i64::from(bytes[index]) - 63;
        if !(0..=63).contains(&chunk) {
            return Err(Error::Protocol(format!(
                "invalid polyline byte 0x{:02x} at offset {}",
                bytes[index], index
            )));
        }
        index += 1;
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
        if shift > 35 {
            return Err(Error::Protocol("polyline value overflow".to_string()));
        }
    }
    let value = if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    };
    Ok((value, index))
}

/// Project geographic points into the headset's local frame
///
/// The origin anchors the tangent plane. Each offset is a haversine distance
/// along a single axis, signed by coordinate comparison and scaled by
/// `units_per_meter`. The output always starts with the origin waypoint
/// `(0, 0)`.
pub fn to_local_waypoints(
    origin: GeoPoint,
    points: &[GeoPoint],
    units_per_meter: f64,
) -> Vec<Waypoint> {
    let mut waypoints = Vec::with_capacity(points.len() + 1);
    waypoints.push(Waypoint::new(0.0, 0.0));

    for point in points {
        let north = haversine_m(origin.lat, origin.lon, point.lat, origin.lon)
            * (point.lat - origin.lat).signum();
        let east = haversine_m(origin.lat, origin.lon, origin.lat, point.lon)
            * (point.lon - origin.lon).signum();
        waypoints.push(Waypoint::new(
            (east * units_per_meter) as f32,
            (north * units_per_meter) as f32,
        ));
    }
    waypoints
}

#[cfg(test)]
mod tests {
    use super::*;

    // The canonical worked example from the polyline format documentation
    const EXAMPLE: &str = "_p~iF~ps|U_ulLnnqC_mqNvxq`@";

    #[test]
    fn test_decode_documented_example() {
        let points = decode_polyline(EXAMPLE).unwrap();
        assert_eq!(points.len(), 3);
        let expected = [(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)];
        for (point, (lat, lon)) in points.iter().zip(expected) {
            assert!((point.lat - lat).abs() < 1e-9, "lat {} vs {}", point.lat, lat);
            assert!((point.lon - lon).abs() < 1e-9, "lon {} vs {}", point.lon, lon);
        }
    }

    #[test]
    fn test_decode_empty_is_empty() {
        assert!(decode_polyline("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_truncated_is_protocol_error() {
        // Continuation bit set on the final byte
        let result = decode_polyline("_p~iF~ps|U_");
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_invalid_byte_is_protocol_error() {
        let result = decode_polyline("_p~iF\u{1}");
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_leg_points_concatenates() {
        let legs = vec![
            RouteLeg {
                distance_m: 100.0,
                duration_s: 60,
                polyline: EXAMPLE.to_string(),
            },
            RouteLeg {
                distance_m: 50.0,
                duration_s: 30,
                polyline: EXAMPLE.to_string(),
            },
        ];
        assert_eq!(leg_points(&legs).unwrap().len(), 6);
        let (distance, duration) = leg_totals(&legs);
        assert!((distance - 150.0).abs() < 1e-9);
        assert_eq!(duration, 90);
    }

    #[test]
    fn test_local_waypoints_start_at_origin() {
        let origin = GeoPoint::new(48.0, 11.0);
        let waypoints = to_local_waypoints(origin, &[GeoPoint::new(48.001, 11.0)], 0.01);
        assert_eq!(waypoints.len(), 2);
        assert!((waypoints[0].x).abs() < 1e-9);
        assert!((waypoints[0].z).abs() < 1e-9);
    }

    #[test]
    fn test_local_waypoint_axis_signs() {
        let origin = GeoPoint::new(0.0, 0.0);
        let north = GeoPoint::new(0.001, 0.0);
        let south_west = GeoPoint::new(-0.001, -0.001);

        let waypoints = to_local_waypoints(origin, &[north, south_west], 0.01);

        // ~111 m north scaled by 0.01 → ~1.11 units on z only
        assert!(waypoints[1].x.abs() < 1e-6);
        assert!((waypoints[1].z - 1.112).abs() < 0.01);

        assert!(waypoints[2].x < 0.0);
        assert!(waypoints[2].z < 0.0);
    }

    #[test]
    fn test_scale_factor_applies() {
        let origin = GeoPoint::new(0.0, 0.0);
        let point = GeoPoint::new(0.001, 0.0);
        let fine = to_local_waypoints(origin, &[point], 1.0);
        let coarse = to_local_waypoints(origin, &[point], 0.01);
        assert!((fine[1].z / coarse[1].z - 100.0).abs() < 0.1);
    }

    struct FixturePlanner;

    impl RoutePlanner for FixturePlanner {
        fn plan(
            &self,
            _origin: GeoPoint,
            _destination: GeoPoint,
            _mode: TravelMode,
        ) -> Result<Vec<RouteLeg>> {
            Ok(vec![RouteLeg {
                distance_m: 1200.0,
                duration_s: 900,
                polyline: EXAMPLE.to_string(),
            }])
        }
    }

    #[test]
    fn test_planner_boundary_round_trip() {
        let planner = FixturePlanner;
        let legs = planner
            .plan(
                GeoPoint::new(38.5, -120.2),
                GeoPoint::new(43.252, -126.453),
                TravelMode::Driving,
            )
            .unwrap();
        let points = leg_points(&legs).unwrap();
        let waypoints = to_local_waypoints(points[0], &points, 0.01);
        assert_eq!(waypoints.len(), points.len() + 1);
    }
}
