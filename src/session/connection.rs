//! Persistent TCP session to a headset
//!
//! Owns the one stream socket plus the reader, heartbeat, and reconnect
//! machinery. Consumers drive it with `connect`/`send`/`disconnect`, take
//! inbound messages from [`incoming`](SessionConnection::incoming), and watch
//! [`ConnectionState`] transitions on the event channel.
//!
//! Two counters keep background threads honest. The epoch bumps on every
//! `connect`/`disconnect` and marks one session; the generation bumps each
//! time a socket is installed within a session. Reader and heartbeat threads
//! carry both and go silent the moment either is stale, so an abandoned
//! attempt or a superseded socket can never publish state over a newer one.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::protocol::messages::NavigationMessage;
use crate::protocol::wire;
use crate::session::state::ConnectionState;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone)]
struct Target {
    address: String,
    name: String,
}

struct Inner {
    config: SessionConfig,
    state: Mutex<ConnectionState>,
    events: Sender<ConnectionState>,
    incoming: Sender<NavigationMessage>,
    incoming_rx: Receiver<NavigationMessage>,
    stream: Mutex<Option<TcpStream>>,
    target: Mutex<Option<Target>>,
    /// Retries consumed since the last explicit connect
    attempts: Mutex<u32>,
    /// Serializes the reconnect sequence: one attempt in flight at most
    reconnect_in_flight: AtomicBool,
    epoch: AtomicU64,
    generation: AtomicU64,
}

/// Handle to one session. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct SessionConnection {
    inner: Arc<Inner>,
}

impl SessionConnection {
    /// Returns the connection plus its state-event receiver
    pub fn new(config: SessionConfig) -> (Self, Receiver<ConnectionState>) {
        let (events, events_rx) = unbounded();
        let (incoming, incoming_rx) = unbounded();
        let inner = Inner {
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            events,
            incoming,
            incoming_rx,
            stream: Mutex::new(None),
            target: Mutex::new(None),
            attempts: Mutex::new(0),
            reconnect_in_flight: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    /// Messages received from the peer. Undecodable lines are dropped before
    /// this channel and never appear on it.
    pub fn incoming(&self) -> Receiver<NavigationMessage> {
        self.inner.incoming_rx.clone()
    }

    /// True iff the socket is open and the state machine agrees
    ///
    /// Both conditions matter: the socket can be open while the state is
    /// mid-transition.
    pub fn is_connected(&self) -> bool {
        let socket_up = self
            .inner
            .stream
            .lock()
            .as_ref()
            .is_some_and(|s| s.peer_addr().is_ok());
        socket_up && self.state().is_connected()
    }

    /// Open a session to `address` (port from config)
    ///
    /// Abandons any in-flight attempt, resets the retry budget, and blocks
    /// for at most one connect timeout. Failure classifies into a
    /// human-readable [`ConnectionState::Failed`] reason and returns the
    /// underlying error.
    pub fn connect(&self, address: &str, name: &str) -> Result<()> {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.target.lock() = Some(Target {
            address: address.to_string(),
            name: name.to_string(),
        });
        *self.inner.attempts.lock() = 0;
        self.inner.reconnect_in_flight.store(false, Ordering::SeqCst);
        self.close_stream();

        info!("connecting to {name} at {address}");
        self.attempt(epoch, false)
    }

    /// Tear the session down. Idempotent; safe from any thread. In-flight
    /// attempts are abandoned and publish nothing afterwards.
    pub fn disconnect(&self) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.reconnect_in_flight.store(false, Ordering::SeqCst);
        *self.inner.target.lock() = None;
        *self.inner.attempts.lock() = 0;
        self.close_stream();
        self.publish(epoch, ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// Serialize and write one message line, then flush
    ///
    /// [`Error::NotConnected`] without a live session. An I/O failure
    /// triggers the reconnect path before the error returns.
    pub fn send(&self, message: &NavigationMessage) -> Result<()> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let generation = self.inner.generation.load(Ordering::SeqCst);
        match self.write_message(message) {
            Ok(()) => Ok(()),
            Err(Error::Io(e)) => {
                warn!("send {} failed: {e}", message.message_type());
                self.handle_io_failure(epoch, generation);
                Err(Error::Io(e))
            }
            Err(e) => Err(e),
        }
    }

    fn write_message(&self, message: &NavigationMessage) -> Result<()> {
        if !self.state().is_connected() {
            return Err(Error::NotConnected);
        }
        let line = wire::encode(message)?;
        let mut guard = self.inner.stream.lock();
        let Some(stream) = guard.as_mut() else {
            return Err(Error::NotConnected);
        };
        stream.write_all(line.as_bytes())?;
        stream.flush()?;
        debug!("sent {}", message.message_type());
        Ok(())
    }

    /// One connect attempt under `epoch`. Initial attempts classify their
    /// failure into `Failed`; retry attempts feed failures back into the
    /// reconnect policy.
    fn attempt(&self, epoch: u64, retrying: bool) -> Result<()> {
        let Some(target) = self.inner.target.lock().clone() else {
            return Err(Error::NotConnected);
        };
        self.publish(
            epoch,
            ConnectionState::Connecting {
                name: target.name.clone(),
            },
        );

        match self.open_stream(&target) {
            Ok(stream) => {
                let reader_stream = stream.try_clone();
                let generation = {
                    let mut guard = self.inner.stream.lock();
                    if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                        // Raced by disconnect/connect; this socket is not ours
                        let _ = stream.shutdown(Shutdown::Both);
                        return Ok(());
                    }
                    *guard = Some(stream);
                    self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
                };
                *self.inner.attempts.lock() = 0;
                info!("connected to {} at {}", target.name, target.address);
                self.publish(
                    epoch,
                    ConnectionState::Connected {
                        name: target.name.clone(),
                        address: target.address.clone(),
                    },
                );
                match reader_stream {
                    Ok(s) => self.spawn_reader(epoch, generation, s),
                    Err(e) => warn!("could not clone session stream for reading: {e}"),
                }
                self.spawn_heartbeat(epoch, generation);
                Ok(())
            }
            Err(e) => {
                warn!("connect to {} failed: {e}", target.address);
                if retrying {
                    let generation = self.inner.generation.load(Ordering::SeqCst);
                    self.handle_io_failure(epoch, generation);
                } else {
                    self.publish(
                        epoch,
                        ConnectionState::Failed {
                            reason: classify_connect_error(&e),
                        },
                    );
                }
                Err(Error::Io(e))
            }
        }
    }

    fn open_stream(&self, target: &Target) -> std::io::Result<TcpStream> {
        let config = &self.inner.config;
        let addr: SocketAddr = format!("{}:{}", target.address, config.port)
            .parse()
            .map_err(|e| {
                std::io::Error::new(ErrorKind::InvalidInput, format!("bad peer address: {e}"))
            })?;
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout())?;
        stream.set_read_timeout(Some(config.read_timeout()))?;
        stream.set_write_timeout(Some(config.read_timeout()))?;
        Ok(stream)
    }

    /// Reconnect policy: below the attempt cap, back off and retry the same
    /// target; past it, fail until the next explicit connect. Sequential by
    /// the in-flight flag. A failure only counts if the socket it was
    /// observed on is still the installed one.
    fn handle_io_failure(&self, epoch: u64, generation: u64) {
        if self.inner.epoch.load(Ordering::SeqCst) != epoch
            || self.inner.generation.load(Ordering::SeqCst) != generation
        {
            return;
        }
        if self.inner.reconnect_in_flight.swap(true, Ordering::SeqCst) {
            // Another failure is already driving the sequence
            return;
        }
        let Some(target) = self.inner.target.lock().clone() else {
            self.inner.reconnect_in_flight.store(false, Ordering::SeqCst);
            return;
        };
        self.close_stream();

        let attempt = {
            let mut attempts = self.inner.attempts.lock();
            if *attempts >= self.inner.config.max_reconnect_attempts {
                drop(attempts);
                warn!("retry budget exhausted for {}", target.name);
                self.publish(
                    epoch,
                    ConnectionState::Failed {
                        reason: "connection lost".to_string(),
                    },
                );
                // Flag stays set: no further automatic attempts this session
                return;
            }
            *attempts += 1;
            *attempts
        };

        info!(
            "reconnecting to {} (attempt {attempt}/{})",
            target.name, self.inner.config.max_reconnect_attempts
        );
        self.publish(
            epoch,
            ConnectionState::Reconnecting {
                name: target.name.clone(),
                attempt,
            },
        );

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.reconnect_delay();
        let spawn = std::thread::Builder::new()
            .name("session-reconnect".to_string())
            .spawn(move || {
                std::thread::sleep(delay);
                let Some(conn) = upgrade(&weak) else { return };
                conn.inner.reconnect_in_flight.store(false, Ordering::SeqCst);
                if conn.inner.epoch.load(Ordering::SeqCst) != epoch {
                    debug!("reconnect abandoned");
                    return;
                }
                let _ = conn.attempt(epoch, true);
            });
        if let Err(e) = spawn {
            self.inner.reconnect_in_flight.store(false, Ordering::SeqCst);
            warn!("failed to spawn reconnect thread: {e}");
        }
    }

    /// One reader thread per installed socket. Decodes inbound lines onto the
    /// incoming channel; undecodable lines are dropped, never fatal. EOF or a
    /// read failure on the current socket feeds the reconnect policy.
    fn spawn_reader(&self, epoch: u64, generation: u64, stream: TcpStream) {
        let weak = Arc::downgrade(&self.inner);
        let spawn = std::thread::Builder::new()
            .name("session-reader".to_string())
            .spawn(move || {
                debug!("reader thread started");
                let mut reader = BufReader::new(stream);
                let mut line = String::new();
                loop {
                    line.clear();
                    let read = reader.read_line(&mut line);
                    let Some(conn) = upgrade(&weak) else { break };
                    if conn.inner.epoch.load(Ordering::SeqCst) != epoch
                        || conn.inner.generation.load(Ordering::SeqCst) != generation
                    {
                        break;
                    }
                    match read {
                        Ok(0) => {
                            warn!("session closed by peer");
                            conn.handle_io_failure(epoch, generation);
                            break;
                        }
                        Ok(_) => match wire::decode(&line) {
                            Ok(message) => {
                                debug!("received {}", message.message_type());
                                let _ = conn.inner.incoming.send(message);
                            }
                            Err(e) => debug!("dropped inbound line: {e}"),
                        },
                        // Read timeout tick; re-check staleness and wait again
                        Err(e) if is_timeout(&e) => {}
                        Err(e) => {
                            warn!("session read failed: {e}");
                            conn.handle_io_failure(epoch, generation);
                            break;
                        }
                    }
                }
                debug!("reader thread exiting");
            });
        if let Err(e) = spawn {
            warn!("failed to spawn reader thread: {e}");
        }
    }

    /// One heartbeat thread per installed socket
    fn spawn_heartbeat(&self, epoch: u64, generation: u64) {
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.heartbeat_interval();
        let spawn = std::thread::Builder::new()
            .name("session-heartbeat".to_string())
            .spawn(move || {
                debug!("heartbeat thread started");
                loop {
                    std::thread::sleep(interval);
                    let Some(conn) = upgrade(&weak) else { break };
                    if conn.inner.epoch.load(Ordering::SeqCst) != epoch
                        || conn.inner.generation.load(Ordering::SeqCst) != generation
                    {
                        break;
                    }
                    match conn.write_message(&NavigationMessage::heartbeat()) {
                        Ok(()) => {}
                        Err(Error::Io(e)) => {
                            warn!("heartbeat failed: {e}");
                            conn.handle_io_failure(epoch, generation);
                            break;
                        }
                        // Session torn down elsewhere; nothing to keep alive
                        Err(_) => break,
                    }
                }
                debug!("heartbeat thread exiting");
            });
        if let Err(e) = spawn {
            warn!("failed to spawn heartbeat thread: {e}");
        }
    }

    /// Set + emit a state if `epoch` is still current and the value changed
    fn publish(&self, epoch: u64, next: ConnectionState) {
        let mut state = self.inner.state.lock();
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!("suppressing stale {} publication", next.as_str());
            return;
        }
        if *state == next {
            return;
        }
        debug!("connection state: {} -> {}", state.as_str(), next.as_str());
        *state = next.clone();
        // Send under the lock so event order always matches transition order
        let _ = self.inner.events.send(next);
    }

    fn close_stream(&self) {
        if let Some(stream) = self.inner.stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Revive a handle from a background thread's weak reference
fn upgrade(weak: &Weak<Inner>) -> Option<SessionConnection> {
    weak.upgrade().map(|inner| SessionConnection { inner })
}

/// Read timeouts are wakeup ticks, not failures
fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Human-readable reason for a failed connect; part of the contract, shown
/// directly to the operator
fn classify_connect_error(err: &std::io::Error) -> String {
    match err.kind() {
        ErrorKind::ConnectionRefused => {
            "connection refused - is the companion app running?".to_string()
        }
        ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            "connection timed out - check the device is on the same network".to_string()
        }
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
            "device unreachable - check both devices share a network".to_string()
        }
        _ => format!("connection failed: {err}"),
    }
}
