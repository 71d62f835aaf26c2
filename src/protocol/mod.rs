//! Session wire protocol: typed messages and line framing

pub mod messages;
pub mod wire;

pub use messages::{EndReason, NavigationMessage, RerouteReason, RouteMetadata, Waypoint};
