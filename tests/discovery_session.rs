//! End-to-end tests for discovery and the headset session.
//!
//! Everything runs against loopback sockets: announcements are real UDP
//! datagrams, sessions are real TCP streams served by in-test listeners.
//! Ports are always OS-assigned so the tests can run in parallel.

use marga_link::MargaLink;
use marga_link::config::{DiscoveryConfig, LinkConfig, SessionConfig};
use marga_link::discovery::DiscoveryListener;
use marga_link::session::{ConnectionState, SessionConnection};
use std::io::{BufRead, BufReader};
use std::net::{Shutdown, TcpListener, UdpSocket};
use std::time::{Duration, Instant};

fn announce(port: u16, payload: &str) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind announcer");
    socket
        .send_to(payload.as_bytes(), ("127.0.0.1", port))
        .expect("send announcement");
}

fn session_config(port: u16) -> SessionConfig {
    SessionConfig {
        port,
        connect_timeout_ms: 1_000,
        read_timeout_ms: 1_000,
        heartbeat_interval_ms: 100,
        max_reconnect_attempts: 3,
        reconnect_delay_ms: 10,
    }
}

#[test]
fn test_listener_emits_valid_announcements_and_survives_garbage() {
    let config = DiscoveryConfig {
        port: 0,
        ..DiscoveryConfig::default()
    };
    let (mut listener, announcements) = DiscoveryListener::start(&config).expect("start listener");
    let port = listener.local_addr().port();

    announce(port, "MargaLink_Presence:192.168.1.50:Visor Pro");
    let peer = announcements
        .recv_timeout(Duration::from_secs(2))
        .expect("first announcement");
    assert_eq!(peer.address, "192.168.1.50");
    assert_eq!(peer.name.as_deref(), Some("Visor Pro"));

    // Junk must be dropped without killing the loop
    announce(port, "not an announcement at all");
    announce(port, "MargaLink_Presence:");
    assert!(announcements.recv_timeout(Duration::from_millis(300)).is_err());

    announce(port, "MargaLink_Presence:192.168.1.51:");
    let peer = announcements
        .recv_timeout(Duration::from_secs(2))
        .expect("announcement after garbage");
    assert_eq!(peer.address, "192.168.1.51");
    assert!(peer.name.is_none());

    listener.stop();
}

#[test]
fn test_facade_registers_then_expires_peers() {
    let mut config = LinkConfig::default();
    config.discovery.port = 0;
    config.discovery.peer_stale_timeout_ms = 300;
    config.discovery.peer_sweep_interval_ms = 100;

    let mut link = MargaLink::new(config);
    let peer_events = link.peer_events().expect("peer events");
    link.start().expect("start link");
    let port = link.discovery_addr().expect("discovery addr").port();

    announce(port, "MargaLink_Presence:10.0.0.7:Visor");
    let peer = peer_events
        .recv_timeout(Duration::from_secs(2))
        .expect("forwarded peer event");
    assert_eq!(peer.address, "10.0.0.7");

    // The registry catches up with the event
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        let peers = link.list_peers();
        if peers.len() == 1 {
            assert_eq!(peers[0].label(), "Visor");
            break;
        }
        assert!(Instant::now() < deadline, "peer never reached the registry");
        std::thread::sleep(Duration::from_millis(20));
    }

    // No further announcements: the sweep takes the peer back out
    let deadline = Instant::now() + Duration::from_secs(3);
    while !link.list_peers().is_empty() {
        assert!(Instant::now() < deadline, "stale peer never expired");
        std::thread::sleep(Duration::from_millis(50));
    }

    link.stop();
}

#[test]
fn test_session_emits_heartbeats() {
    let server = TcpListener::bind("127.0.0.1:0").expect("bind server");
    let port = server.local_addr().unwrap().port();

    let reader = std::thread::spawn(move || {
        let (socket, _) = server.accept().expect("accept");
        let mut lines = BufReader::new(socket).lines();
        lines.next().expect("one line").expect("readable line")
    });

    let (connection, _events) = SessionConnection::new(session_config(port));
    connection.connect("127.0.0.1", "Visor").expect("connect");

    // Nothing else is sent, so the first line is a heartbeat
    let line = reader.join().expect("server thread");
    let value: serde_json::Value = serde_json::from_str(&line).expect("valid JSON");
    assert_eq!(value["type"], "heartbeat");
    assert!(value["timestamp"].as_u64().unwrap() > 0);

    connection.disconnect();
}

#[test]
fn test_session_reconnects_after_peer_reset() {
    let server = TcpListener::bind("127.0.0.1:0").expect("bind server");
    let port = server.local_addr().unwrap().port();

    let server_thread = std::thread::spawn(move || {
        // First session: accept and immediately reset
        let (socket, _) = server.accept().expect("first accept");
        socket.shutdown(Shutdown::Both).expect("reset first session");
        drop(socket);

        // Second session: accept and hold open until the client is done
        let (socket, _) = server.accept().expect("second accept");
        let mut lines = BufReader::new(socket).lines();
        while let Some(Ok(_)) = lines.next() {}
    });

    let (connection, events) = SessionConnection::new(session_config(port));
    connection.connect("127.0.0.1", "Visor").expect("connect");

    // Heartbeats (100ms apart) hit the dead socket and start the retry path;
    // the listener is still up, so the first retry lands.
    let mut saw_reconnecting = false;
    let mut reconnected = false;
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(ConnectionState::Reconnecting { attempt, .. }) => {
                assert_eq!(attempt, 1);
                saw_reconnecting = true;
            }
            Ok(ConnectionState::Connected { .. }) if saw_reconnecting => {
                reconnected = true;
                break;
            }
            Ok(_) => {}
            Err(_) => {}
        }
    }

    assert!(saw_reconnecting, "never entered reconnecting");
    assert!(reconnected, "never re-established the session");
    assert!(connection.is_connected());

    connection.disconnect();
    server_thread.join().expect("server thread");
}
