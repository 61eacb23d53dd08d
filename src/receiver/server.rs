//! axum WebSocket handler for incoming microphone streams

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::audio::playback::PcmSink;
use crate::protocol::{ControlMessage, StreamConfig};
use crate::receiver::OutputBackend;

#[derive(Clone)]
struct ReceiverState {
    backend: Arc<dyn OutputBackend>,
}

/// Routes for the receiver; the WebSocket lives at `/`
pub fn router(backend: Arc<dyn OutputBackend>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .with_state(ReceiverState { backend })
}

/// Serve connections on `listener` until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    backend: Arc<dyn OutputBackend>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Receiver listening on ws://{}", addr);
    }
    axum::serve(listener, router(backend))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ReceiverState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.backend))
}

/// Validate the first message of a connection
fn parse_config(message: Message) -> Result<StreamConfig, String> {
    let text = match message {
        Message::Text(text) => text,
        _ => return Err("First message must be a config message".to_string()),
    };

    match ControlMessage::from_json(&text) {
        Ok(ControlMessage::Config(config)) => {
            if config.sample_rate_hz == 0 || config.channel_count == 0 {
                return Err(format!(
                    "Configuration error: {} Hz, {} channel(s)",
                    config.sample_rate_hz, config.channel_count
                ));
            }
            Ok(config)
        }
        Ok(other) => Err(format!("Expected config, got {}", other.kind())),
        Err(e) => Err(format!("Configuration error: {}", e)),
    }
}

/// Close frame reasons are limited to 123 bytes
const MAX_CLOSE_REASON: usize = 123;

async fn close_with(mut socket: WebSocket, mut reason: String) {
    tracing::warn!("Closing connection: {}", reason);
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::ERROR,
            reason: Cow::Owned(reason),
        })))
        .await;
}

async fn handle_socket(mut socket: WebSocket, backend: Arc<dyn OutputBackend>) {
    let connection = Uuid::new_v4();
    tracing::info!(%connection, "Client connected, waiting for stream config");

    let first = match socket.recv().await {
        Some(Ok(message)) => message,
        _ => {
            tracing::info!(%connection, "Client left before configuring");
            return;
        }
    };
    let config = match parse_config(first) {
        Ok(config) => config,
        Err(reason) => {
            close_with(socket, reason).await;
            return;
        }
    };
    tracing::info!(
        %connection,
        sample_rate = config.sample_rate_hz,
        channels = config.channel_count,
        format = %config.sample_format,
        frames_per_buffer = config.server_buffer_frames,
        "Stream config accepted"
    );

    let devices = backend.list_devices();
    let announcement = match ControlMessage::Devices(devices).to_json() {
        Ok(text) => text,
        Err(e) => {
            close_with(socket, e.to_string()).await;
            return;
        }
    };
    if socket.send(Message::Text(announcement)).await.is_err() {
        return;
    }

    let mut selected: Option<u32> = None;
    let mut sink: Option<Box<dyn PcmSink>> = None;
    let mut frames: u64 = 0;
    let mut bytes: u64 = 0;
    let mut rejected: u64 = 0;

    while let Some(received) = socket.recv().await {
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%connection, "Socket error: {}", e);
                break;
            }
        };

        match message {
            Message::Text(text) => match ControlMessage::from_json(&text) {
                Ok(ControlMessage::SelectDevice(index)) if sink.is_none() => {
                    tracing::info!(%connection, device = index, "Output device selected");
                    selected = Some(index);
                }
                Ok(ControlMessage::SelectDevice(index)) => {
                    tracing::warn!(%connection, device = index, "Ignoring selection after streaming started");
                }
                Ok(other) => {
                    tracing::warn!(%connection, kind = other.kind(), "Ignoring unexpected control message");
                }
                Err(e) => {
                    tracing::warn!(%connection, "Ignoring malformed control message: {}", e);
                }
            },
            Message::Binary(frame) => {
                if sink.is_none() {
                    let Some(index) = selected else {
                        close_with(socket, "Audio received before device selection".to_string()).await;
                        return;
                    };
                    let opener = backend.clone();
                    let opened = tokio::task::spawn_blocking(move || opener.open(index, &config))
                        .await
                        .map_err(|e| e.to_string())
                        .and_then(|result| result.map_err(|e| e.to_string()));
                    match opened {
                        Ok(output) => {
                            tracing::info!(%connection, device = index, "Streaming to output device");
                            sink = Some(output);
                        }
                        Err(e) => {
                            close_with(socket, format!("Failed to open output device {}: {}", index, e)).await;
                            return;
                        }
                    }
                }

                if let Some(output) = sink.as_mut() {
                    match output.write(&frame) {
                        Ok(()) => {
                            frames += 1;
                            bytes += frame.len() as u64;
                        }
                        Err(e) => {
                            rejected += 1;
                            tracing::debug!(%connection, "Dropping frame: {}", e);
                        }
                    }
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    if let Some(output) = sink.take() {
        // Stopping the output joins its thread
        let _ = tokio::task::spawn_blocking(move || drop(output)).await;
    }
    tracing::info!(%connection, frames, bytes, rejected, "Client disconnected, audio resources released");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SampleFormat;

    #[test]
    fn test_parse_config_accepts_config() {
        let config = parse_config(Message::Text(
            r#"{"type":"config","data":{"sampleRate":44100,"channels":2,"sampleWidthBytes":1,"framesPerBuffer":256}}"#
                .to_string(),
        ))
        .unwrap();
        assert_eq!(config.sample_rate_hz, 44100);
        assert_eq!(config.channel_count, 2);
        assert_eq!(config.sample_format, SampleFormat::Int8);
        assert_eq!(config.server_buffer_frames, 256);
    }

    #[test]
    fn test_parse_config_rejections() {
        assert!(parse_config(Message::Binary(vec![0, 1])).is_err());
        assert!(parse_config(Message::Text(r#"{"type":"select_device","data":0}"#.to_string())).is_err());
        assert!(parse_config(Message::Text(
            r#"{"type":"config","data":{"sampleRate":48000,"channels":1,"sampleWidthBytes":3,"framesPerBuffer":128}}"#
                .to_string()
        ))
        .is_err());
        assert!(parse_config(Message::Text(
            r#"{"type":"config","data":{"sampleRate":0,"channels":1,"sampleWidthBytes":2,"framesPerBuffer":128}}"#
                .to_string()
        ))
        .is_err());
    }
}
