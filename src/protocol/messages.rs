//! Typed message set for the session protocol
//!
//! Every message crossing the session stream is one of these variants,
//! serialized as a single JSON object tagged by a `type` field:
//!
//! ```text
//! {"type":"route","waypoints":[{"x":0.0,"z":0.0},...],"metadata":{...}}
//! {"type":"heartbeat","timestamp":1724500000000}
//! ```
//!
//! Optional fields are omitted entirely when absent, never sent as null.
//! Messages are constructed immediately before send and never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Waypoint in the headset's local tangent-plane frame
///
/// `x` grows east, `z` grows north, both scaled from meters by the configured
/// units-per-meter factor. The origin is the position the route was anchored
/// at, not a geographic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f32,
    pub z: f32,
}

impl Waypoint {
    pub const fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }
}

/// Route annotations carried alongside route and reroute waypoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMetadata {
    pub distance_remaining_m: f32,
    pub eta_seconds: u32,
    /// Why this route replaced the previous one, when it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RouteMetadata {
    pub fn new(distance_remaining_m: f32, eta_seconds: u32) -> Self {
        Self {
            distance_remaining_m,
            eta_seconds,
            reason: None,
        }
    }
}

/// Why a reroute was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerouteReason {
    UserDeviation,
    Traffic,
    Construction,
    RoadClosure,
    BetterRoute,
    UserRequest,
}

impl RerouteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerouteReason::UserDeviation => "user_deviation",
            RerouteReason::Traffic => "traffic",
            RerouteReason::Construction => "construction",
            RerouteReason::RoadClosure => "road_closure",
            RerouteReason::BetterRoute => "better_route",
            RerouteReason::UserRequest => "user_request",
        }
    }
}

impl fmt::Display for RerouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a navigation session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Arrived,
    Cancelled,
    ConnectionLost,
    Error,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Arrived => "arrived",
            EndReason::Cancelled => "cancelled",
            EndReason::ConnectionLost => "connection_lost",
            EndReason::Error => "error",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One session message, tagged on the wire by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NavigationMessage {
    /// Initial route delivery
    Route {
        waypoints: Vec<Waypoint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<RouteMetadata>,
    },
    /// Replacement route after a confirmed deviation
    Reroute {
        waypoints: Vec<Waypoint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<RouteMetadata>,
    },
    /// Free-form progress or condition report
    Status {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        timestamp: i64,
    },
    /// Traffic or hazard notice
    Alert {
        alert_type: String,
        delay_seconds: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        timestamp: i64,
    },
    /// Keepalive
    Heartbeat { timestamp: i64 },
    /// Session teardown with a reason code
    End { reason: String, timestamp: i64 },
}

impl NavigationMessage {
    pub fn route(waypoints: Vec<Waypoint>, metadata: Option<RouteMetadata>) -> Self {
        NavigationMessage::Route {
            waypoints,
            metadata,
        }
    }

    pub fn reroute(waypoints: Vec<Waypoint>, metadata: Option<RouteMetadata>) -> Self {
        NavigationMessage::Reroute {
            waypoints,
            metadata,
        }
    }

    pub fn status(status: impl Into<String>, details: Option<String>) -> Self {
        NavigationMessage::Status {
            status: status.into(),
            details,
            timestamp: now_ms(),
        }
    }

    pub fn alert(
        alert_type: impl Into<String>,
        delay_seconds: u32,
        message: Option<String>,
    ) -> Self {
        NavigationMessage::Alert {
            alert_type: alert_type.into(),
            delay_seconds,
            message,
            timestamp: now_ms(),
        }
    }

    pub fn heartbeat() -> Self {
        NavigationMessage::Heartbeat {
            timestamp: now_ms(),
        }
    }

    pub fn end(reason: EndReason) -> Self {
        NavigationMessage::End {
            reason: reason.as_str().to_string(),
            timestamp: now_ms(),
        }
    }

    /// Wire tag, for logging
    pub fn message_type(&self) -> &'static str {
        match self {
            NavigationMessage::Route { .. } => "route",
            NavigationMessage::Reroute { .. } => "reroute",
            NavigationMessage::Status { .. } => "status",
            NavigationMessage::Alert { .. } => "alert",
            NavigationMessage::Heartbeat { .. } => "heartbeat",
            NavigationMessage::End { .. } => "end",
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
