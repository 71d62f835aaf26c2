//! Connection state machine values

use std::fmt;

/// Where the session connection currently stands
///
/// Exactly one value is live per connection; consumers learn transitions
/// through the event channel rather than polling. `Failed` ends an attempt
/// sequence but is not terminal: a fresh `connect` starts a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Opening a socket to a named peer
    Connecting { name: String },
    Connected { name: String, address: String },
    /// Waiting out the backoff before automatic retry number `attempt`
    Reconnecting { name: String, attempt: u32 },
    /// Attempt sequence exhausted or initial connect refused
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// Short tag for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting { name } => write!(f, "connecting to {name}"),
            ConnectionState::Connected { name, address } => {
                write!(f, "connected to {name} at {address}")
            }
            ConnectionState::Reconnecting { name, attempt } => {
                write!(f, "reconnecting to {name} (attempt {attempt})")
            }
            ConnectionState::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}
