//! End-to-end navigation flow over a live loopback session.
//!
//! A minimal in-test server plays the headset: it accepts one TCP session
//! and records every line it receives until the client hangs up. Heartbeats
//! are configured far apart so the recorded stream is exactly the guidance
//! traffic.

use marga_link::config::{NavigationConfig, SessionConfig};
use marga_link::nav::route::to_local_waypoints;
use marga_link::nav::{GeoPoint, NavigationSession, NavigationState, RerouteCoordinator};
use marga_link::protocol::{EndReason, RerouteReason, RouteMetadata, Waypoint};
use marga_link::session::SessionConnection;
use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::thread::JoinHandle;
use std::time::Duration;

/// Accepts one session and returns every line received until EOF
fn spawn_line_server() -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind server");
    let port = listener.local_addr().unwrap().port();
    let handle = std::thread::spawn(move || {
        let (socket, _) = listener.accept().expect("accept");
        BufReader::new(socket)
            .lines()
            .map_while(|line| line.ok())
            .collect()
    });
    (port, handle)
}

fn quiet_session_config(port: u16) -> SessionConfig {
    SessionConfig {
        port,
        connect_timeout_ms: 1_000,
        read_timeout_ms: 1_000,
        heartbeat_interval_ms: 60_000,
        max_reconnect_attempts: 1,
        reconnect_delay_ms: 10,
    }
}

fn connect(port: u16) -> SessionConnection {
    let (connection, _events) = SessionConnection::new(quiet_session_config(port));
    connection.connect("127.0.0.1", "Visor").expect("connect");
    connection
}

fn message_types(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("valid JSON line");
            value["type"].as_str().expect("tagged message").to_string()
        })
        .collect()
}

#[test]
fn test_guidance_message_sequence() {
    let (port, server) = spawn_line_server();
    let connection = connect(port);
    let (nav, _nav_events) = NavigationSession::new(connection.clone());

    nav.start_navigation(
        vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.5, 1.2)],
        Some(RouteMetadata::new(1200.0, 600)),
    )
    .expect("start navigation");
    assert_eq!(
        nav.state(),
        NavigationState::Navigating {
            distance_remaining_m: 1200.0,
            eta_seconds: 600
        }
    );

    nav.update_progress(800.0, 400).expect("progress");
    nav.mark_off_route(45.0).expect("off route");
    nav.send_reroute(
        vec![
            Waypoint::new(0.0, 0.0),
            Waypoint::new(-0.3, 0.8),
            Waypoint::new(0.2, 1.5),
        ],
        Some(RouteMetadata::new(950.0, 480)),
        RerouteReason::UserDeviation,
    )
    .expect("reroute");
    nav.send_alert("traffic", 120, Some("incident ahead".to_string()))
        .expect("alert");
    nav.end_navigation(EndReason::Arrived).expect("end");

    assert_eq!(nav.state(), NavigationState::Arrived);
    assert!(nav.current_waypoints().is_empty());

    connection.disconnect();
    let lines = server.join().expect("server thread");
    assert_eq!(
        message_types(&lines),
        ["route", "status", "status", "reroute", "alert", "end"]
    );

    let route: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(route["waypoints"].as_array().unwrap().len(), 2);
    assert_eq!(route["metadata"]["eta_seconds"], 600);

    let reroute: serde_json::Value = serde_json::from_str(&lines[3]).unwrap();
    assert_eq!(reroute["metadata"]["reason"], "user_deviation");
    assert_eq!(reroute["waypoints"].as_array().unwrap().len(), 3);

    let end: serde_json::Value = serde_json::from_str(&lines[5]).unwrap();
    assert_eq!(end["reason"], "arrived");
}

#[test]
fn test_confirmed_deviation_drives_a_reroute() {
    let (port, server) = spawn_line_server();
    let connection = connect(port);
    let (nav, _nav_events) = NavigationSession::new(connection.clone());

    let nav_config = NavigationConfig {
        off_route_threshold_m: 30.0,
        on_path_tolerance_m: 15.0,
        reroute_debounce_ms: 20,
        min_reroute_interval_ms: 500,
        consecutive_checks: 2,
        reroute_complete_grace_ms: 1_000,
        units_per_meter: 0.01,
    };
    let (coordinator, _states, requests) =
        RerouteCoordinator::new(&nav_config).expect("coordinator");

    // Route runs due north; the fix sits ~70 m west of it
    let path = vec![GeoPoint::new(37.0, -122.0), GeoPoint::new(37.01, -122.0)];
    coordinator.set_route(path);
    nav.start_navigation(vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 11.1)], None)
        .expect("start navigation");

    let off_route_fix = GeoPoint::new(37.005, -122.0008);
    coordinator.check_deviation(off_route_fix);
    std::thread::sleep(Duration::from_millis(60));
    coordinator.check_deviation(off_route_fix);

    let request = requests
        .recv_timeout(Duration::from_secs(2))
        .expect("reroute request");
    assert_eq!(request.reason, RerouteReason::UserDeviation);

    // Planner stand-in: answer the request with a fresh path
    let new_path = vec![
        GeoPoint::new(37.005, -122.0008),
        GeoPoint::new(37.01, -122.0),
    ];
    let origin = new_path[0];
    let waypoints = to_local_waypoints(origin, &new_path[1..], nav_config.units_per_meter);
    nav.send_reroute(waypoints, None, request.reason)
        .expect("deliver reroute");
    coordinator.on_reroute_complete(new_path);

    connection.disconnect();
    let lines = server.join().expect("server thread");
    assert_eq!(message_types(&lines), ["route", "reroute"]);

    let reroute: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(reroute["metadata"]["reason"], "user_deviation");
    // Local frame: origin first, then the remaining path
    assert_eq!(reroute["waypoints"][0]["x"], 0.0);
    assert_eq!(reroute["waypoints"][0]["z"], 0.0);
}

#[test]
fn test_decoded_leg_becomes_local_route() {
    let (port, server) = spawn_line_server();
    let connection = connect(port);
    let (nav, _nav_events) = NavigationSession::new(connection.clone());

    // The worked example from the polyline format documentation
    let points =
        marga_link::nav::route::decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@").expect("decode");
    assert_eq!(points.len(), 3);

    let waypoints = to_local_waypoints(points[0], &points[1..], 0.01);
    assert_eq!(waypoints.len(), 3);
    assert_eq!(waypoints[0], Waypoint::new(0.0, 0.0));
    // Second point lies north-west of the first
    assert!(waypoints[1].x < 0.0);
    assert!(waypoints[1].z > 0.0);

    nav.start_navigation(waypoints, Some(RouteMetadata::new(4_200.0, 1_800)))
        .expect("start navigation");
    nav.end_navigation(EndReason::Cancelled).expect("end");
    assert_eq!(nav.state(), NavigationState::Cancelled);

    connection.disconnect();
    let lines = server.join().expect("server thread");
    assert_eq!(message_types(&lines), ["route", "end"]);
    let route: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(route["waypoints"].as_array().unwrap().len(), 3);
}
