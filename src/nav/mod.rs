//! Navigation core: geometry, deviation detection, reroute decisions, and
//! the session lifecycle

pub mod deviation;
pub mod geo;
pub mod reroute;
pub mod route;
pub mod session;

pub use deviation::{DeviationCalculator, DeviationResult};
pub use geo::GeoPoint;
pub use reroute::{RerouteCoordinator, RerouteRequest, RerouteState};
pub use route::{RouteLeg, RoutePlanner, TravelMode};
pub use session::{NavigationSession, NavigationState};
