//! Discovered-peer bookkeeping

use log::debug;
use std::time::{Duration, Instant};

/// A peer learned from a presence announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Announced IP address; unique key within the registry
    pub address: String,
    /// Optional human-readable device name
    pub name: Option<String>,
    /// When the most recent announcement arrived
    pub last_seen: Instant,
}

impl PeerInfo {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
            last_seen: Instant::now(),
        }
    }

    /// Display label: the name when announced, the address otherwise
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Every peer heard from recently, in first-announcement order
///
/// The registry only stores; staleness is enforced by whoever calls
/// [`expire_stale`](DeviceRegistry::expire_stale) on a fixed cadence.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    peers: Vec<PeerInfo>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self { peers: Vec::new() }
    }

    /// Insert a peer, or refresh the entry sharing its address
    ///
    /// A re-announcement replaces the name and the last-seen stamp; it never
    /// creates a second entry or moves the peer's position.
    pub fn upsert(&mut self, peer: PeerInfo) {
        if let Some(existing) = self.peers.iter_mut().find(|p| p.address == peer.address) {
            existing.name = peer.name;
            existing.last_seen = peer.last_seen;
        } else {
            debug!("registry: new peer {}", peer.address);
            self.peers.push(peer);
        }
    }

    /// Drop every entry last seen longer than `timeout` before `now`
    ///
    /// The boundary case `elapsed == timeout` is retained. Returns how many
    /// entries were removed.
    pub fn expire_stale(&mut self, timeout: Duration, now: Instant) -> usize {
        let before = self.peers.len();
        self.peers
            .retain(|p| now.saturating_duration_since(p.last_seen) <= timeout);
        let removed = before - self.peers.len();
        if removed > 0 {
            debug!("registry: expired {removed} stale peers");
        }
        removed
    }

    /// Stable-order read-only view
    pub fn list(&self) -> &[PeerInfo] {
        &self.peers
    }

    pub fn get(&self, address: &str) -> Option<&PeerInfo> {
        self.peers.iter().find(|p| p.address == address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
