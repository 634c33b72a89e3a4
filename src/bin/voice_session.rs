//! Voice Session Application
//!
//! Talks to a realtime voice model: captures the microphone, streams it to
//! the configured endpoint and plays the model's replies.
//!
//! Commands on stdin: `m` toggles mute, `q` quits. Ctrl-C also quits.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duplex_voice::{
    audio::{device::list_devices, CpalOutput, MicrophoneInput},
    config::AppConfig,
    session::SessionConfig,
    transport::WebSocketBackend,
    SessionCallbacks, SessionController, SessionState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voice session");

    let config = AppConfig::load().context("loading configuration")?;

    // List available devices
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let kind = if device.is_input { "input" } else { "output" };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  [{}] {}{}", kind, device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let output = Arc::new(
        CpalOutput::open(config.audio.output_device.as_deref()).context("opening output device")?,
    );
    let controller = SessionController::new(
        SessionConfig::from(&config),
        Arc::new(MicrophoneInput::new(config.audio.clone())),
        Arc::new(WebSocketBackend::new(config.transport.clone())),
        output.clone(),
    );

    // Session end wakes the main loop
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();
    let endpoint = config.transport.endpoint.clone();
    let callbacks = SessionCallbacks::new()
        .on_state(|state| tracing::info!("Session state: {}", state))
        .on_error(move |e| {
            if e.is_permission_denied() {
                eprintln!("Microphone access was denied: {}", e);
            } else if e.is_connect_failure() {
                eprintln!("Could not reach {}: {}", endpoint, e);
            } else {
                eprintln!("Session error: {}", e);
            }
        })
        .on_close(move || {
            let _ = closed_tx.send(());
        });

    controller.connect(callbacks).await?;
    println!("Connected. Type 'm' + Enter to toggle mute, 'q' + Enter to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => match line.trim() {
                    "m" => {
                        let muted = !controller.is_muted();
                        controller.toggle_mute(muted);
                        println!("{}", if muted { "Muted" } else { "Unmuted" });
                    }
                    "q" => break,
                    "" => {}
                    other => println!("Unknown command '{}'", other),
                },
                None => break,
            },
            _ = closed_rx.recv() => {
                tracing::info!("Session ended");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    controller.disconnect();
    let stats = controller.stats();
    tracing::info!(
        "Stats: {} frames captured, {} sent, {} muted, {} payloads played, {} dropped, {} interrupts",
        stats.frames_captured,
        stats.frames_sent,
        stats.frames_muted,
        stats.payloads_received - stats.payloads_dropped,
        stats.payloads_dropped,
        stats.interrupts
    );
    if controller.state() == SessionState::Error {
        tracing::warn!("Session ended with an error");
    }
    output.close();

    Ok(())
}
