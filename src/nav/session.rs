//! Navigation lifecycle over the session link
//!
//! Thin orchestration: every state-changing operation also attempts the
//! corresponding wire message. A failed send never blocks the local
//! transition; the error is surfaced in the returned `Result` instead.

use crate::error::{Error, Result};
use crate::protocol::messages::{
    EndReason, NavigationMessage, RerouteReason, RouteMetadata, Waypoint,
};
use crate::session::SessionConnection;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info, warn};
use parking_lot::Mutex;

/// Where the navigation session currently stands
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationState {
    Idle,
    /// Start requested, route not yet delivered
    WaitingForRoute,
    Navigating {
        distance_remaining_m: f32,
        eta_seconds: u32,
    },
    OffRoute {
        deviation_m: f64,
        ms_since_deviation: u64,
    },
    Rerouting,
    Arrived,
    Paused,
    Cancelled,
    Error {
        message: String,
    },
}

impl NavigationState {
    /// Active ⇔ a route is being followed right now
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            NavigationState::Navigating { .. }
                | NavigationState::OffRoute { .. }
                | NavigationState::Rerouting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationState::Idle => "idle",
            NavigationState::WaitingForRoute => "waiting_for_route",
            NavigationState::Navigating { .. } => "navigating",
            NavigationState::OffRoute { .. } => "off_route",
            NavigationState::Rerouting => "rerouting",
            NavigationState::Arrived => "arrived",
            NavigationState::Paused => "paused",
            NavigationState::Cancelled => "cancelled",
            NavigationState::Error { .. } => "error",
        }
    }
}

/// Drives one navigation session's lifecycle and delivery
pub struct NavigationSession {
    connection: SessionConnection,
    state: Mutex<NavigationState>,
    waypoints: Mutex<Vec<Waypoint>>,
    metadata: Mutex<Option<RouteMetadata>>,
    events: Sender<NavigationState>,
}

impl NavigationSession {
    pub fn new(connection: SessionConnection) -> (Self, Receiver<NavigationState>) {
        let (events, events_rx) = unbounded();
        (
            Self {
                connection,
                state: Mutex::new(NavigationState::Idle),
                waypoints: Mutex::new(Vec::new()),
                metadata: Mutex::new(None),
                events,
            },
            events_rx,
        )
    }

    pub fn state(&self) -> NavigationState {
        self.state.lock().clone()
    }

    pub fn is_navigating(&self) -> bool {
        self.state().is_active()
    }

    pub fn current_waypoints(&self) -> Vec<Waypoint> {
        self.waypoints.lock().clone()
    }

    /// Deliver the initial route and enter navigation
    ///
    /// Requires a live session; without one nothing changes and
    /// [`Error::NotConnected`] is returned.
    pub fn start_navigation(
        &self,
        waypoints: Vec<Waypoint>,
        metadata: Option<RouteMetadata>,
    ) -> Result<()> {
        if !self.connection.is_connected() {
            warn!("start_navigation without a live session");
            return Err(Error::NotConnected);
        }

        self.set_state(NavigationState::WaitingForRoute);
        *self.waypoints.lock() = waypoints.clone();
        *self.metadata.lock() = metadata.clone();
        let (distance, eta) = summarize(&metadata);

        match self
            .connection
            .send(&NavigationMessage::route(waypoints, metadata))
        {
            Ok(()) => {
                info!(
                    "navigation started: {} waypoints",
                    self.waypoints.lock().len()
                );
                self.set_state(NavigationState::Navigating {
                    distance_remaining_m: distance,
                    eta_seconds: eta,
                });
                Ok(())
            }
            Err(e) => {
                self.set_state(NavigationState::Error {
                    message: format!("failed to send route: {e}"),
                });
                Err(e)
            }
        }
    }

    /// Progress tick; ignored unless navigation is active. The status message
    /// is best-effort.
    pub fn update_progress(&self, distance_remaining_m: f32, eta_seconds: u32) -> Result<()> {
        if !self.state().is_active() {
            debug!("progress update ignored while {}", self.state().as_str());
            return Ok(());
        }
        if let Some(metadata) = self.metadata.lock().as_mut() {
            metadata.distance_remaining_m = distance_remaining_m;
            metadata.eta_seconds = eta_seconds;
        }
        self.set_state(NavigationState::Navigating {
            distance_remaining_m,
            eta_seconds,
        });
        self.connection.send(&NavigationMessage::status(
            "navigating",
            Some(format!("{distance_remaining_m:.0} m remaining")),
        ))
    }

    /// Record a confirmed deviation. The status message is best-effort.
    pub fn mark_off_route(&self, deviation_m: f64) -> Result<()> {
        if !self.state().is_active() {
            return Ok(());
        }
        self.set_state(NavigationState::OffRoute {
            deviation_m,
            ms_since_deviation: 0,
        });
        self.connection.send(&NavigationMessage::status(
            "off_route",
            Some(format!("{deviation_m:.0} m off route")),
        ))
    }

    /// Deliver a replacement route after a confirmed reroute
    pub fn send_reroute(
        &self,
        waypoints: Vec<Waypoint>,
        metadata: Option<RouteMetadata>,
        reason: RerouteReason,
    ) -> Result<()> {
        if !self.connection.is_connected() {
            return Err(Error::NotConnected);
        }

        self.set_state(NavigationState::Rerouting);
        // The wire metadata always carries the reason for the replacement
        let metadata = match metadata {
            Some(mut m) => {
                m.reason = Some(reason.as_str().to_string());
                Some(m)
            }
            None => {
                let mut m = RouteMetadata::new(0.0, 0);
                m.reason = Some(reason.as_str().to_string());
                Some(m)
            }
        };
        *self.waypoints.lock() = waypoints.clone();
        *self.metadata.lock() = metadata.clone();
        let (distance, eta) = summarize(&metadata);

        match self
            .connection
            .send(&NavigationMessage::reroute(waypoints, metadata))
        {
            Ok(()) => {
                info!("reroute delivered ({reason})");
                self.set_state(NavigationState::Navigating {
                    distance_remaining_m: distance,
                    eta_seconds: eta,
                });
                Ok(())
            }
            Err(e) => {
                self.set_state(NavigationState::Error {
                    message: format!("failed to send reroute: {e}"),
                });
                Err(e)
            }
        }
    }

    /// Best-effort traffic or hazard notice; no state change
    pub fn send_alert(
        &self,
        alert_type: &str,
        delay_seconds: u32,
        message: Option<String>,
    ) -> Result<()> {
        self.connection
            .send(&NavigationMessage::alert(alert_type, delay_seconds, message))
    }

    /// Pause guidance; only meaningful while active
    pub fn pause(&self) -> Result<()> {
        if !self.state().is_active() {
            return Ok(());
        }
        self.set_state(NavigationState::Paused);
        self.connection
            .send(&NavigationMessage::status("paused", None))
    }

    /// Resume from pause into plain navigation
    pub fn resume(&self) -> Result<()> {
        if self.state() != NavigationState::Paused {
            return Ok(());
        }
        let (distance, eta) = summarize(&self.metadata.lock().clone());
        self.set_state(NavigationState::Navigating {
            distance_remaining_m: distance,
            eta_seconds: eta,
        });
        self.connection
            .send(&NavigationMessage::status("navigating", Some("resumed".to_string())))
    }

    /// Finish the session
    ///
    /// The end message is best-effort: local state always finalizes by
    /// `reason` and the route buffers always clear, even when the wire send
    /// fails. The send error is still returned.
    pub fn end_navigation(&self, reason: EndReason) -> Result<()> {
        let result = self.connection.send(&NavigationMessage::end(reason));
        if let Err(ref e) = result {
            warn!("end message not delivered: {e}");
        }

        let final_state = match reason {
            EndReason::Arrived => NavigationState::Arrived,
            EndReason::Cancelled => NavigationState::Cancelled,
            _ => NavigationState::Idle,
        };
        info!("navigation ended: {reason}");
        self.set_state(final_state);
        self.waypoints.lock().clear();
        *self.metadata.lock() = None;
        result
    }

    /// Back to idle, clearing route buffers; no wire traffic
    pub fn reset(&self) {
        self.set_state(NavigationState::Idle);
        self.waypoints.lock().clear();
        *self.metadata.lock() = None;
    }

    fn set_state(&self, next: NavigationState) {
        let mut state = self.state.lock();
        if *state == next {
            return;
        }
        debug!("navigation state: {} -> {}", state.as_str(), next.as_str());
        *state = next.clone();
        drop(state);
        let _ = self.events.send(next);
    }
}

fn summarize(metadata: &Option<RouteMetadata>) -> (f32, u32) {
    metadata
        .as_ref()
        .map(|m| (m.distance_remaining_m, m.eta_seconds))
        .unwrap_or((0.0, 0))
}
