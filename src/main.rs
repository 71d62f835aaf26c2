//! MargaLink daemon - handheld side of the headset navigation link
//!
//! Listens for headset presence announcements on the LAN, keeps the device
//! registry fresh, and logs connection transitions as they happen. With
//! `--connect` it opens a session to the first peer discovered.

use marga_link::{Error, LinkConfig, MargaLink, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Parse command line arguments.
///
/// Supports:
/// - `marga-link <path>` (config file, positional)
/// - `marga-link --connect` (auto-connect to the first discovered peer)
///
/// Defaults to `marga-link.toml` when no path is given.
fn parse_args() -> (String, bool) {
    let args: Vec<String> = std::env::args().collect();

    let auto_connect = args.iter().any(|a| a == "--connect");
    let config_path = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "marga-link.toml".to_string());

    (config_path, auto_connect)
}

fn main() -> Result<()> {
    let (config_path, auto_connect) = parse_args();

    // Resolve configuration before logging so the file can set the filter
    let config = if Path::new(&config_path).exists() {
        match LinkConfig::load(&config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {config_path}: {e}");
                std::process::exit(1);
            }
        }
    } else {
        LinkConfig::default()
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    log::info!("MargaLink v{} starting...", env!("CARGO_PKG_VERSION"));
    if Path::new(&config_path).exists() {
        log::info!("Using config: {}", config_path);
    } else {
        log::info!("No config at {}, using defaults", config_path);
    }

    run(config, auto_connect)
}

fn run(config: LinkConfig, auto_connect: bool) -> Result<()> {
    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);

    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let mut link = MargaLink::new(config);
    link.start()?;

    // Log every connection transition as it happens
    if let Some(events) = link.connection_events() {
        std::thread::Builder::new()
            .name("state-log".to_string())
            .spawn(move || {
                for state in events.iter() {
                    log::info!("Connection: {}", state);
                }
            })
            .map_err(|e| Error::Other(format!("Failed to spawn state logger: {}", e)))?;
    }

    log::info!("MargaLink running. Press Ctrl-C to stop.");

    let mut last_report = Instant::now();
    let mut auto_connect_pending = auto_connect;

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));

        if auto_connect_pending
            && let Some(peer) = link.list_peers().into_iter().next()
        {
            log::info!("Auto-connecting to {} at {}", peer.label(), peer.address);
            auto_connect_pending = false;
            if let Err(e) = link.connect(&peer) {
                log::error!("Auto-connect failed: {}", e);
            }
        }

        // Report discovered peers every 5 seconds
        if last_report.elapsed().as_secs() >= 5 {
            let peers = link.list_peers();
            if peers.is_empty() {
                log::info!("No peers discovered yet");
            } else {
                for peer in &peers {
                    log::info!("Peer: {} at {}", peer.label(), peer.address);
                }
            }
            last_report = Instant::now();
        }
    }

    log::info!("Shutting down...");
    link.stop();
    log::info!("MargaLink stopped");
    Ok(())
}
