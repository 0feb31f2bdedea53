//! WebSocket Transport
//!
//! Connects to an agent server over `ws://` using tokio-tungstenite. After the
//! handshake the stream is split and serviced by two tasks:
//!
//! - **Writer**: drains the link's outbound channel, encodes each message as a
//!   JSON text frame and acknowledges the write. Also sends keepalive pings.
//! - **Reader**: decodes text frames and forwards them to the inbound channel.
//!   Exits on close, read error, or keepalive silence, which closes the
//!   inbound channel and tells the session the connection is gone.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::time::Interval;
use tokio_tungstenite::tungstenite::{self, Message};

use super::traits::{map_connect_io_error, Transport, TransportError, TransportLink};
use super::wire;
use crate::transport::config::{Endpoint, TransportConfig};

/// WebSocket transport to remote agent servers
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a WebSocket transport
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        config: &TransportConfig,
    ) -> Result<TransportLink, TransportError> {
        let url = endpoint.url();
        tracing::debug!(url = %url, "Opening WebSocket");

        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(map_handshake_error)?;

        tracing::info!(
            url = %url,
            status = response.status().as_u16(),
            "WebSocket handshake complete"
        );

        let (mut sink, mut source) = stream.split();
        let (link, peer) = TransportLink::channel(config.channel_capacity);
        let mut outbound_rx = peer.outbound_rx;
        let inbound_tx = peer.inbound_tx;

        let mut keepalive = config.keepalive_interval().map(|period| {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        // Writer task: outbound channel -> socket
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => {
                        let Some(frame) = frame else {
                            // Session dropped the link
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        };
                        let result = match wire::encode(&frame.message) {
                            Ok(text) => sink
                                .send(Message::Text(text))
                                .await
                                .map_err(|e| TransportError::SendFailed(e.to_string())),
                            Err(e) => Err(e),
                        };
                        let failed = matches!(result, Err(TransportError::SendFailed(_)));
                        let _ = frame.ack.send(result);
                        if failed {
                            tracing::warn!("WebSocket write failed, closing writer");
                            break;
                        }
                    }
                    () = tick(&mut keepalive) => {
                        if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                            tracing::debug!(error = %e, "Keepalive ping failed");
                            break;
                        }
                    }
                }
            }
            tracing::debug!("WebSocket writer stopped");
        });

        // Reader task: socket -> inbound channel
        let idle_limit = config.keepalive_timeout();
        tokio::spawn(async move {
            loop {
                let next = match idle_limit {
                    Some(limit) => match tokio::time::timeout(limit, source.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            tracing::warn!(
                                idle_secs = limit.as_secs(),
                                "No traffic from server, dropping connection"
                            );
                            break;
                        }
                    },
                    None => source.next().await,
                };

                let frame = match next {
                    Some(Ok(Message::Text(text))) => wire::decode(&text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => wire::decode(&text),
                        Err(e) => Err(TransportError::Serialization(e.to_string())),
                    },
                    Some(Ok(Message::Close(close))) => {
                        tracing::info!(?close, "Server closed WebSocket");
                        break;
                    }
                    // Pings are answered by tungstenite; pongs only reset the idle timer
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket read error");
                        break;
                    }
                    None => {
                        tracing::debug!("WebSocket stream ended");
                        break;
                    }
                };

                if inbound_tx.send(frame).await.is_err() {
                    tracing::debug!("Session dropped inbound channel");
                    break;
                }
            }
        });

        Ok(link)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn map_handshake_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Io(e) => map_connect_io_error(&e),
        tungstenite::Error::Http(response) => {
            let status = response.status();
            match status.as_u16() {
                401 | 403 => TransportError::Unauthorized(format!("server answered {status}")),
                404 => TransportError::NotFound(format!("server answered {status}")),
                _ => TransportError::HandshakeFailed(format!("server answered {status}")),
            }
        }
        tungstenite::Error::Url(e) => TransportError::ConnectionFailed(e.to_string()),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::ConnectionLost
        }
        other => TransportError::HandshakeFailed(other.to_string()),
    }
}
