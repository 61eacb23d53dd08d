//! Microphone Sender Application
//!
//! Captures the local microphone and streams it to a receiver over WebSocket.
//!
//! Usage: `sender [host:port] [device-index] [config-path]`

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mic_bridge::{
    audio::{list_input_devices, CpalCapture},
    client::MicClient,
    config::AppConfig,
    constants::OUTBOUND_QUEUE_CAPACITY,
    meter::LevelReading,
    session::SessionEvent,
};

fn parse_target(target: &str) -> Result<(String, u16)> {
    let (host, port) = target
        .rsplit_once(':')
        .with_context(|| format!("Expected host:port, got '{}'", target))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("Invalid port in '{}'", target))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

fn render_level(reading: LevelReading) {
    let filled = (reading.level / 5.0).round() as usize;
    let bar: String = (0..20).map(|i| if i < filled { '#' } else { '-' }).collect();
    print!("\r[{}] {:5.1}% {:<8}", bar, reading.level, reading.band.to_string());
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Mic Bridge Sender");

    let mut args = std::env::args().skip(1);
    let target = args.next();
    let device_arg = args
        .next()
        .map(|s| s.parse::<u32>())
        .transpose()
        .context("Invalid device index")?;
    let config_path = args.next().map(PathBuf::from);

    let config = AppConfig::load_or_default(config_path.as_deref())?;
    let (host, port) = match target {
        Some(target) => parse_target(&target)?,
        None => (config.client.host.clone(), config.client.port),
    };

    println!("\n=== Available Input Devices ===");
    for (i, name) in list_input_devices().iter().enumerate() {
        let default_marker = if i == 0 { " [DEFAULT]" } else { "" };
        println!("  {}{}", name, default_marker);
    }
    println!();

    let mut options = config.client.session_options();
    if device_arg.is_some() {
        options.preferred_device = device_arg;
    }

    let mut client = MicClient::new(
        config.client.stream,
        CpalCapture::new(),
        options,
        OUTBOUND_QUEUE_CAPACITY,
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    client.connect(&host, port).await?;

    // Wait for the receiver to announce its output devices
    let devices = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                client.stop();
                return Ok(());
            }
            event = client.next_event() => match event {
                Some(SessionEvent::DevicesReceived(devices)) => break devices,
                Some(SessionEvent::MessageIgnored(reason)) => {
                    tracing::warn!("Ignored message from receiver: {}", reason);
                }
                Some(SessionEvent::Disconnected(reason)) => bail!(reason),
                None => bail!("Connection closed before the device list arrived"),
            }
        }
    };

    println!("\n=== Receiver Output Devices ===");
    for device in &devices {
        println!("  {}", device);
    }
    println!();

    if devices.is_empty() {
        client.stop();
        bail!("Receiver has no output devices");
    }
    if let Some(index) = device_arg {
        client.select_device(index)?;
    }
    client.start_capture()?;

    if let Some(index) = client.session().selected_device() {
        tracing::info!("Streaming to remote device {} ({})", index, client.snapshot().status);
    }

    let refresh_hz = config.meter.refresh_hz.max(1);
    let mut meter_tick = tokio::time::interval(Duration::from_secs_f64(1.0 / refresh_hz as f64));
    let mut stats_tick = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                client.stop();
                break;
            }
            event = client.next_event() => match event {
                Some(SessionEvent::Disconnected(reason)) => {
                    println!();
                    tracing::warn!("{}", reason);
                    break;
                }
                Some(SessionEvent::MessageIgnored(reason)) => {
                    tracing::debug!("Ignored message from receiver: {}", reason);
                }
                Some(SessionEvent::DevicesReceived(_)) => {}
                None => break,
            },
            _ = meter_tick.tick(), if config.meter.enabled => {
                if let Some(reading) = client.tick_level() {
                    render_level(reading);
                }
            }
            _ = stats_tick.tick() => {
                if let Some(SessionEvent::Disconnected(reason)) = client.poll_capture_error() {
                    println!();
                    tracing::error!("{}", reason);
                    break;
                }
                let stats = client.session().stats();
                tracing::debug!(
                    "Sender stats: {} frames sent, {} dropped, {} bytes",
                    stats.frames_sent,
                    stats.frames_dropped,
                    stats.bytes_sent
                );
            }
        }
    }

    let stats = client.session().stats();
    tracing::info!(
        "Sender stopped: {} frames sent, {} dropped, {} bytes",
        stats.frames_sent,
        stats.frames_dropped,
        stats.bytes_sent
    );
    Ok(())
}
