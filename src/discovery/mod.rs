//! Peer discovery over UDP broadcast

pub mod listener;
pub mod registry;

pub use listener::{DiscoveryListener, PRESENCE_PREFIX};
pub use registry::{DeviceRegistry, PeerInfo};
