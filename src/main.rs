use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::Result;
use log::{error, info};

use explore_rs::btleplug_transport::BtleplugTransport;
use explore_rs::explore_board::{Board, ExploreBoard, ExploreConfig};
use explore_rs::sink::ChannelSink;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=explore_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Configuration ─────────────────────────────────────────────────────────
    // First argument selects the device: a MAC address if it contains ':',
    // otherwise an exact serial. No argument matches any Explore_* device.
    let mut config = ExploreConfig::default();
    if let Some(arg) = std::env::args().nth(1) {
        if arg.contains(':') {
            config.mac_address = arg;
        } else {
            config.serial_number = arg;
        }
    }

    // ── Connect ───────────────────────────────────────────────────────────────
    let (sink, mut rx) = ChannelSink::new();
    let mut board = ExploreBoard::new(config, Arc::new(BtleplugTransport::new()), Arc::new(sink));

    info!("Connecting to Explore device …");
    board.prepare_session().await?;
    board.start_stream(1024, None).await?;
    info!("Streaming started. Press Ctrl-C or type 'q' + Enter to quit.\n");
    info!("Commands (type + Enter):");
    info!("  q  – quit");
    info!("  s  – stop streaming");
    info!("  r  – resume streaming");
    info!("  <hex string> – send as a raw config command (e.g. 0A1B)\n");

    // ── Stdin command loop ────────────────────────────────────────────────────
    // We read lines on a dedicated OS thread (to avoid holding a non-Send
    // StdinLock across await points), then relay them to the select loop.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    // ── Main loop ─────────────────────────────────────────────────────────────
    // Board methods take &mut self, so commands and packages are handled on
    // the same task rather than sharing the board across two.
    loop {
        tokio::select! {
            pkg = rx.recv() => {
                let Some(pkg) = pkg else { break };
                println!(
                    "[FRAME] kind=0x{:02x} count={:3}  dev_ts={:10}  host_ts={:.0} ms  {} bytes",
                    pkg.kind,
                    pkg.count,
                    pkg.device_timestamp,
                    pkg.host_timestamp_ms,
                    pkg.payload.len()
                );
            }
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                if line.is_empty() {
                    continue;
                }
                match line.as_str() {
                    "q" => {
                        info!("Quit requested.");
                        break;
                    }
                    "s" => {
                        info!("Stopping stream …");
                        if let Err(e) = board.stop_stream().await {
                            error!("Stop error: {e}");
                        }
                    }
                    "r" => {
                        info!("Resuming stream …");
                        if let Err(e) = board.start_stream(1024, None).await {
                            error!("Resume error: {e}");
                        }
                    }
                    cmd => {
                        info!("Sending config command: '{cmd}'");
                        if let Err(e) = board.config_board(cmd).await {
                            error!("Command error: {e}");
                        }
                    }
                }
            }
        }
    }

    board.release_session().await?;
    info!("Session released – exiting.");
    Ok(())
}
