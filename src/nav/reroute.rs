//! Deviation debounce, confirmation, and reroute throttling
//!
//! Position samples are noisy; a single off-route reading must not burn a
//! routing request. The coordinator debounces checks on a dedicated worker
//! thread (a newer check supersedes the pending one), confirms a deviation
//! only after a run of consecutive off-route evaluations, and throttles how
//! often a reroute may actually trigger. Confirmed triggers surface as
//! [`RerouteRequest`] values; the consumer fetches a fresh route and reports
//! back via [`RerouteCoordinator::on_reroute_complete`].

use crate::config::NavigationConfig;
use crate::error::{Error, Result};
use crate::nav::deviation::DeviationCalculator;
use crate::nav::geo::GeoPoint;
use crate::protocol::messages::RerouteReason;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Reroute decision pipeline state
#[derive(Debug, Clone, PartialEq)]
pub enum RerouteState {
    Idle,
    CheckingDeviation,
    OffRoute {
        distance_m: f64,
        reason: RerouteReason,
    },
    Rerouting,
    RerouteComplete {
        point_count: usize,
    },
    Failed {
        message: String,
    },
}

impl RerouteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerouteState::Idle => "idle",
            RerouteState::CheckingDeviation => "checking_deviation",
            RerouteState::OffRoute { .. } => "off_route",
            RerouteState::Rerouting => "rerouting",
            RerouteState::RerouteComplete { .. } => "reroute_complete",
            RerouteState::Failed { .. } => "failed",
        }
    }
}

/// A confirmed reroute decision
#[derive(Debug, Clone, PartialEq)]
pub struct RerouteRequest {
    pub position: GeoPoint,
    pub reason: RerouteReason,
}

enum WorkerCommand {
    Check(GeoPoint),
    Cancel,
    Shutdown,
}

struct CoordState {
    path: Vec<GeoPoint>,
    consecutive: u32,
    last_reroute: Option<Instant>,
    state: RerouteState,
    /// Bumped on every publication; guards the complete→idle grace revert
    epoch: u64,
}

struct Shared {
    st: Mutex<CoordState>,
    events: Sender<RerouteState>,
    requests: Sender<RerouteRequest>,
    calculator: DeviationCalculator,
    min_interval: Duration,
    consecutive_threshold: u32,
    grace: Duration,
}

impl Shared {
    fn publish(&self, next: RerouteState) -> u64 {
        let mut st = self.st.lock();
        self.publish_locked(&mut st, next)
    }

    /// Set + emit a state under the caller's lock; duplicate values are not
    /// re-emitted. Returns the epoch after the (possible) publication.
    fn publish_locked(&self, st: &mut CoordState, next: RerouteState) -> u64 {
        if st.state != next {
            debug!("reroute state: {} -> {}", st.state.as_str(), next.as_str());
            st.state = next.clone();
            st.epoch += 1;
            let _ = self.events.send(next);
        }
        st.epoch
    }

    fn throttle_open(&self, st: &CoordState, window: Duration) -> bool {
        st.last_reroute.map_or(true, |t| t.elapsed() > window)
    }

    /// One debounce-surviving evaluation
    fn evaluate(&self, position: GeoPoint) {
        let path = self.st.lock().path.clone();
        if path.len() < 2 {
            warn!("deviation check skipped: route has {} points", path.len());
            return;
        }

        self.publish(RerouteState::CheckingDeviation);
        let result = self.calculator.calculate(position, &path);

        let mut st = self.st.lock();
        if !result.is_off_route {
            if st.consecutive > 0 {
                debug!("back on route after {} off-route checks", st.consecutive);
            }
            st.consecutive = 0;
            self.publish_locked(&mut st, RerouteState::Idle);
            return;
        }

        st.consecutive += 1;
        info!(
            "off route by {:.1} m ({}/{} consecutive)",
            result.deviation_m, st.consecutive, self.consecutive_threshold
        );

        if st.consecutive >= self.consecutive_threshold {
            if self.throttle_open(&st, self.min_interval) {
                st.consecutive = 0;
                st.last_reroute = Some(Instant::now());
                self.publish_locked(&mut st, RerouteState::Rerouting);
                let _ = self.requests.send(RerouteRequest {
                    position,
                    reason: RerouteReason::UserDeviation,
                });
                return;
            }
            debug!("reroute confirmed but throttled");
        }
        self.publish_locked(
            &mut st,
            RerouteState::OffRoute {
                distance_m: result.deviation_m,
                reason: RerouteReason::UserDeviation,
            },
        );
    }
}

/// Owns the current path and the deviation→reroute decision machinery
pub struct RerouteCoordinator {
    shared: Arc<Shared>,
    commands: Sender<WorkerCommand>,
    debounce: Duration,
    worker: Option<JoinHandle<()>>,
}

impl RerouteCoordinator {
    /// Returns the coordinator plus its state-event and reroute-request
    /// receivers
    pub fn new(
        config: &NavigationConfig,
    ) -> Result<(Self, Receiver<RerouteState>, Receiver<RerouteRequest>)> {
        let (events_tx, events_rx) = unbounded();
        let (requests_tx, requests_rx) = unbounded();
        let (commands_tx, commands_rx) = unbounded();

        let shared = Arc::new(Shared {
            st: Mutex::new(CoordState {
                path: Vec::new(),
                consecutive: 0,
                last_reroute: None,
                state: RerouteState::Idle,
                epoch: 0,
            }),
            events: events_tx,
            requests: requests_tx,
            calculator: DeviationCalculator::from_config(config),
            min_interval: config.min_reroute_interval(),
            consecutive_threshold: config.consecutive_checks,
            grace: config.reroute_complete_grace(),
        });

        let debounce = config.reroute_debounce();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("reroute-worker".to_string())
            .spawn(move || worker_loop(worker_shared, commands_rx, debounce))
            .map_err(|e| Error::Other(format!("failed to spawn reroute worker: {e}")))?;

        Ok((
            Self {
                shared,
                commands: commands_tx,
                debounce,
                worker: Some(worker),
            },
            events_rx,
            requests_rx,
        ))
    }

    /// Replace the path; resets the consecutive counter and cancels any
    /// pending evaluation
    pub fn set_route(&self, path: Vec<GeoPoint>) {
        let _ = self.commands.send(WorkerCommand::Cancel);
        let mut st = self.shared.st.lock();
        info!("route set: {} points", path.len());
        st.path = path;
        st.consecutive = 0;
        self.shared.publish_locked(&mut st, RerouteState::Idle);
    }

    /// Debounced deviation check: supersedes any pending evaluation and
    /// restarts the delay
    pub fn check_deviation(&self, position: GeoPoint) {
        let _ = self.commands.send(WorkerCommand::Check(position));
    }

    /// Trigger without the consecutive gate, for externally detected
    /// conditions. A halved throttle window still applies.
    pub fn force_reroute(&self, position: GeoPoint, reason: RerouteReason) {
        let mut st = self.shared.st.lock();
        if !self.shared.throttle_open(&st, self.shared.min_interval / 2) {
            debug!("forced reroute ({reason}) throttled");
            return;
        }
        info!("forced reroute: {reason}");
        st.last_reroute = Some(Instant::now());
        self.shared.publish_locked(&mut st, RerouteState::Rerouting);
        let _ = self.shared.requests.send(RerouteRequest { position, reason });
    }

    /// Install the fresh path; reverts to idle after a grace period unless
    /// something else changes the state first
    pub fn on_reroute_complete(&self, new_path: Vec<GeoPoint>) {
        let point_count = new_path.len();
        self.set_route(new_path);
        let epoch = self
            .shared
            .publish(RerouteState::RerouteComplete { point_count });

        let weak = Arc::downgrade(&self.shared);
        let grace = self.shared.grace;
        let spawn = std::thread::Builder::new()
            .name("reroute-grace".to_string())
            .spawn(move || {
                std::thread::sleep(grace);
                let Some(shared) = weak.upgrade() else { return };
                let mut st = shared.st.lock();
                if st.epoch == epoch && matches!(st.state, RerouteState::RerouteComplete { .. }) {
                    shared.publish_locked(&mut st, RerouteState::Idle);
                }
            });
        if let Err(e) = spawn {
            warn!("failed to spawn grace timer: {e}");
        }
    }

    /// Report a failed reroute attempt (routing collaborator errored)
    pub fn on_reroute_failed(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("reroute failed: {message}");
        self.shared.publish(RerouteState::Failed { message });
    }

    pub fn state(&self) -> RerouteState {
        self.shared.st.lock().state.clone()
    }

    /// Drop the path, counters, and throttle clock; cancels any pending
    /// evaluation
    pub fn reset(&self) {
        let _ = self.commands.send(WorkerCommand::Cancel);
        let mut st = self.shared.st.lock();
        st.path.clear();
        st.consecutive = 0;
        st.last_reroute = None;
        self.shared.publish_locked(&mut st, RerouteState::Idle);
    }

    /// Debounce delay in force, mostly for callers pacing their samples
    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

impl Drop for RerouteCoordinator {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Debounce worker: a pending check only evaluates after surviving the full
/// delay without being superseded, cancelled, or shut down. Single-threaded
/// by construction, so cancellation has no races.
fn worker_loop(shared: Arc<Shared>, commands: Receiver<WorkerCommand>, debounce: Duration) {
    debug!("reroute worker started");
    'outer: loop {
        let mut pending = match commands.recv() {
            Ok(WorkerCommand::Check(position)) => position,
            Ok(WorkerCommand::Cancel) => continue,
            Ok(WorkerCommand::Shutdown) | Err(_) => break,
        };
        loop {
            match commands.recv_timeout(debounce) {
                Ok(WorkerCommand::Check(position)) => pending = position,
                Ok(WorkerCommand::Cancel) => continue 'outer,
                Ok(WorkerCommand::Shutdown) => break 'outer,
                Err(RecvTimeoutError::Timeout) => {
                    shared.evaluate(pending);
                    continue 'outer;
                }
                Err(RecvTimeoutError::Disconnected) => break 'outer,
            }
        }
    }
    debug!("reroute worker exiting");
}
