//! UDP presence listener
//!
//! Headsets announce themselves by broadcasting
//! `MargaLink_Presence:<ip>:<name>` datagrams on the discovery port. The
//! listener binds an address-reusable socket, runs a receive loop on its own
//! thread, and emits one [`PeerInfo`] per valid announcement. Malformed or
//! non-matching datagrams are dropped silently. The listener owns no peer
//! list; feeding a registry is the caller's concern.

use crate::config::DiscoveryConfig;
use crate::discovery::registry::PeerInfo;
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Prefix every valid presence datagram must carry
pub const PRESENCE_PREFIX: &str = "MargaLink_Presence";

/// Receive poll granularity; bounds how long `stop` waits for the loop
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Background receive loop over the discovery socket
pub struct DiscoveryListener {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl DiscoveryListener {
    /// Bind the discovery socket and start the receive thread
    ///
    /// Returns the listener handle plus the announcement channel. Binding
    /// sets `SO_REUSEADDR` so several listeners (or a short-lived restart)
    /// can share the well-known port.
    pub fn start(config: &DiscoveryConfig) -> Result<(Self, Receiver<PeerInfo>)> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
        socket.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket.into();
        let local_addr = socket.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = unbounded();

        let loop_running = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name("discovery-listener".to_string())
            .spawn(move || receive_loop(socket, loop_running, tx))
            .map_err(|e| Error::Other(format!("failed to spawn discovery listener: {e}")))?;

        info!("discovery listening on {local_addr}");
        Ok((
            Self {
                running,
                handle: Some(handle),
                local_addr,
            },
            rx,
        ))
    }

    /// Address actually bound; the port differs from the configured one when
    /// that was 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the receive loop to exit and join its thread
    ///
    /// The loop observes the flag within one read timeout. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DiscoveryListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(socket: UdpSocket, running: Arc<AtomicBool>, tx: Sender<PeerInfo>) {
    let mut buf = [0u8; 1024];
    debug!("discovery receive loop started");

    while running.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                warn!("discovery receive error: {e}");
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
        };

        let Ok(datagram) = std::str::from_utf8(&buf[..len]) else {
            debug!("discovery: non-UTF-8 datagram from {from}");
            continue;
        };

        match parse_announcement(datagram) {
            Some(peer) => {
                debug!("discovery: {} announced from {from}", peer.label());
                if tx.send(peer).is_err() {
                    // Nobody left to feed
                    break;
                }
            }
            None => debug!("discovery: ignored datagram from {from}: {datagram:?}"),
        }
    }
    debug!("discovery receive loop exiting");
}

/// Parse `<prefix>:<ip>:<name>`
///
/// The name is everything after the second colon, so device names may contain
/// colons; an empty name maps to `None`. Anything without the prefix, the
/// address, or the second colon is dropped.
fn parse_announcement(datagram: &str) -> Option<PeerInfo> {
    let mut parts = datagram.trim().splitn(3, ':');
    if parts.next()? != PRESENCE_PREFIX {
        return None;
    }
    let address = parts.next()?.trim();
    if address.is_empty() {
        return None;
    }
    let name = parts.next()?.trim().to_string();
    let name = (!name.is_empty()).then_some(name);
    Some(PeerInfo::new(address, name))
}
