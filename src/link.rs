//! Link orchestration
//!
//! Wires discovery, the device registry, and the headset session into one
//! handle. Owns the background threads that feed announcements into the
//! registry and sweep stale peers out of it.

use crate::config::LinkConfig;
use crate::discovery::{DeviceRegistry, DiscoveryListener, PeerInfo};
use crate::error::Result;
use crate::session::{ConnectionState, SessionConnection};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Main handle tying discovery and session together
pub struct MargaLink {
    config: LinkConfig,
    registry: Arc<Mutex<DeviceRegistry>>,
    connection: SessionConnection,
    connection_events: Option<Receiver<ConnectionState>>,
    peer_forward: Sender<PeerInfo>,
    peer_events: Option<Receiver<PeerInfo>>,
    listener: Option<DiscoveryListener>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl MargaLink {
    pub fn new(config: LinkConfig) -> Self {
        let (connection, connection_events) = SessionConnection::new(config.session.clone());
        let (peer_forward, peer_events) = unbounded();

        Self {
            config,
            registry: Arc::new(Mutex::new(DeviceRegistry::new())),
            connection,
            connection_events: Some(connection_events),
            peer_forward,
            peer_events: Some(peer_events),
            listener: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    /// Start discovery and the registry maintenance threads
    pub fn start(&mut self) -> Result<()> {
        if self.listener.is_some() {
            debug!("link services already running");
            return Ok(());
        }

        info!("Starting link services");
        self.shutdown.store(false, Ordering::Relaxed);

        let (listener, announcements) = DiscoveryListener::start(&self.config.discovery)?;
        self.listener = Some(listener);

        self.start_registry_feed_thread(announcements)?;
        self.start_registry_sweep_thread()?;

        info!(
            "✓ Link services started (discovery on UDP {})",
            self.config.discovery.port
        );
        Ok(())
    }

    /// Feed thread: every announcement refreshes the registry, then forwards
    /// to the consumer channel
    fn start_registry_feed_thread(&mut self, announcements: Receiver<PeerInfo>) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let shutdown = Arc::clone(&self.shutdown);
        let forward = self.peer_forward.clone();

        let handle = std::thread::Builder::new()
            .name("registry-feed".to_string())
            .spawn(move || {
                debug!("Registry feed thread started");

                while !shutdown.load(Ordering::Relaxed) {
                    match announcements.recv_timeout(Duration::from_millis(500)) {
                        Ok(peer) => {
                            registry.lock().upsert(peer.clone());
                            // Consumers may have dropped their receiver
                            let _ = forward.send(peer);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                debug!("Registry feed thread exiting");
            })?;

        self.threads.push(handle);
        Ok(())
    }

    /// Sweep thread: expires peers not heard from within the stale timeout
    fn start_registry_sweep_thread(&mut self) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let shutdown = Arc::clone(&self.shutdown);
        let stale_timeout = self.config.discovery.stale_timeout();
        let sweep_interval = self.config.discovery.sweep_interval();

        let handle = std::thread::Builder::new()
            .name("registry-sweep".to_string())
            .spawn(move || {
                debug!("Registry sweep thread started");
                let mut last_sweep = Instant::now();

                while !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(100));

                    if last_sweep.elapsed() >= sweep_interval {
                        let removed = registry.lock().expire_stale(stale_timeout, Instant::now());
                        if removed > 0 {
                            debug!("Swept {removed} stale peer(s)");
                        }
                        last_sweep = Instant::now();
                    }
                }

                debug!("Registry sweep thread exiting");
            })?;

        self.threads.push(handle);
        Ok(())
    }

    /// Stop discovery, drop the session, and join the worker threads
    pub fn stop(&mut self) {
        if self.listener.is_none() && self.threads.is_empty() {
            return;
        }

        info!("Stopping link services");
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
        self.connection.disconnect();

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }

        info!("✓ Link services stopped");
    }

    /// Snapshot of every peer currently in the registry
    pub fn list_peers(&self) -> Vec<PeerInfo> {
        self.registry.lock().list().to_vec()
    }

    /// Open a session to a discovered peer
    pub fn connect(&self, peer: &PeerInfo) -> Result<()> {
        self.connection.connect(&peer.address, peer.label())
    }

    /// Open a session to an explicit address, bypassing discovery
    pub fn connect_to(&self, address: &str, name: &str) -> Result<()> {
        self.connection.connect(address, name)
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Shared handle to the underlying session, for driving navigation
    pub fn session(&self) -> SessionConnection {
        self.connection.clone()
    }

    /// Connection state events; yields the receiver once
    pub fn connection_events(&mut self) -> Option<Receiver<ConnectionState>> {
        self.connection_events.take()
    }

    /// Peer announcement events; yields the receiver once
    pub fn peer_events(&mut self) -> Option<Receiver<PeerInfo>> {
        self.peer_events.take()
    }

    /// Address the discovery socket actually bound to
    pub fn discovery_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().map(|l| l.local_addr())
    }
}

impl Drop for MargaLink {
    fn drop(&mut self) {
        debug!("MargaLink cleaning up...");
        self.stop();
    }
}
