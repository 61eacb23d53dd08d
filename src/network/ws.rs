//! WebSocket transport for the sender
//!
//! One writer task drains the outbound queue onto the socket; one reader task
//! turns incoming frames into [`ChannelEvent`]s. Closing the handle stops the
//! writer, which closes the socket, which ends the reader.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::{ConnectError, TransportError};
use crate::network::channel::{ChannelEvent, ChannelHandle, Outbound};

/// Build a `ws://` endpoint from a host and port
pub fn endpoint_url(host: &str, port: u16) -> Result<String, ConnectError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ConnectError::InvalidAddress("empty host".to_string()));
    }
    if host.contains("://") || host.contains('/') || host.chars().any(char::is_whitespace) {
        return Err(ConnectError::InvalidAddress(host.to_string()));
    }
    if port == 0 {
        return Err(ConnectError::InvalidAddress("port 0".to_string()));
    }

    // Bare IPv6 literals need brackets
    if host.contains(':') && !host.starts_with('[') {
        Ok(format!("ws://[{}]:{}", host, port))
    } else {
        Ok(format!("ws://{}:{}", host, port))
    }
}

/// Open a channel to `url`.
///
/// Resolves once the handshake completes. Events arrive on the returned
/// receiver; exactly one `Closed` or `Error` ends the stream.
pub async fn connect(
    url: &str,
    capacity: usize,
) -> Result<(ChannelHandle, mpsc::Receiver<ChannelEvent>), ConnectError> {
    let (socket, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| match e {
            tungstenite::Error::Io(e) => ConnectError::Unreachable(e.to_string()),
            tungstenite::Error::Url(e) => ConnectError::InvalidAddress(e.to_string()),
            other => ConnectError::Handshake(other.to_string()),
        })?;

    tracing::info!("Connected to {}", url);

    let (handle, mut outbound) = ChannelHandle::new(capacity);
    let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(capacity);
    let (mut sink, mut stream) = socket.split();

    let shutdown = handle.shutdown_signal();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                next = outbound.recv() => {
                    let message = match next {
                        Some(Outbound::Text(text)) => Message::Text(text),
                        Some(Outbound::Binary(frame)) => Message::Binary(Vec::from(frame)),
                        None => break,
                    };
                    if let Err(e) = sink.send(message).await {
                        tracing::debug!("Socket write failed: {}", e);
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
        tracing::debug!("Socket writer stopped");
    });

    let reader_handle = handle.clone();
    tokio::spawn(async move {
        let last = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if event_tx.send(ChannelEvent::Message(text)).await.is_err() {
                        break None;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break Some(ChannelEvent::Closed(
                        frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty()),
                    ));
                }
                // The remote endpoint never sends audio back
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    break Some(ChannelEvent::Closed(None));
                }
                Some(Err(e)) => {
                    break Some(ChannelEvent::Error(TransportError::WebSocket(e.to_string())))
                }
            }
        };

        // Marks the handle closed and releases the writer
        reader_handle.close();
        if let Some(event) = last {
            let _ = event_tx.send(event).await;
        }
        tracing::debug!("Socket reader stopped");
    });

    Ok((handle, event_rx))
}
