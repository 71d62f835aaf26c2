//! MargaLink - links a handheld navigator to a companion headset over LAN
//!
//! This library provides the pieces for finding a headset on the local
//! network, holding a session open to it, and streaming navigation guidance
//! across that session.
//!
//! ## Layers
//!
//! - [`discovery`]: UDP presence announcements and the device registry
//! - [`session`]: persistent TCP connection with heartbeat and reconnect
//! - [`protocol`]: the line-delimited JSON message set
//! - [`nav`]: route geometry, deviation detection, and reroute pacing
//! - [`link`]: the orchestrating handle tying the layers together

pub mod config;
pub mod discovery;
pub mod error;
pub mod link;
pub mod nav;
pub mod protocol;
pub mod session;

// Re-export commonly used types
pub use config::LinkConfig;
pub use error::{Error, Result};
pub use link::MargaLink;
