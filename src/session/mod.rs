//! Persistent session to a companion headset

mod connection;
mod state;

pub use connection::SessionConnection;
pub use state::ConnectionState;
