//! Microphone Receiver Application
//!
//! Accepts microphone streams over WebSocket and plays them on a local
//! output device.
//!
//! Usage: `receiver [bind:port] [config-path]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mic_bridge::{
    config::AppConfig,
    receiver::{serve, CpalOutput, OutputBackend},
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

    tracing::info!("Starting Mic Bridge Receiver");

    let mut args = std::env::args().skip(1);
    let bind = args.next();
    let config_path = args.next().map(PathBuf::from);

    let config = AppConfig::load_or_default(config_path.as_deref())?;
    let bind = bind.unwrap_or_else(|| {
        format!("{}:{}", config.receiver.bind_address, config.receiver.port)
    });

    let backend = Arc::new(CpalOutput);

    println!("\n=== Available Output Devices ===");
    for device in backend.list_devices() {
        println!("  {}", device);
    }
    println!();

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    serve(listener, backend, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down receiver");
    })
    .await?;

    Ok(())
}
