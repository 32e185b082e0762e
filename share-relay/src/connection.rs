//! Per-socket connection handling.
//!
//! Each accepted WebSocket gets a writer task draining the peer's outbound
//! channel and a reader loop feeding text frames to the relay. The peer is
//! disconnected exactly once, when the reader loop ends.

use crate::error::ProtocolError;
use crate::server::ShareRelay;
use axum::extract::ws::{Message, WebSocket};
use axum::http::HeaderMap;
use futures_util::{SinkExt, StreamExt};
use share_core::normalize;
use share_types::ServerMessage;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Address used for locality and connection limits.
///
/// With `trust_forwarded_for`, the first `X-Forwarded-For` entry wins when
/// it parses. IPv4-mapped IPv6 addresses are unwrapped.
pub fn source_address(remote: SocketAddr, headers: &HeaderMap, trust_forwarded_for: bool) -> IpAddr {
    let forwarded = trust_forwarded_for
        .then(|| headers.get(FORWARDED_FOR))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    normalize(forwarded.unwrap_or_else(|| remote.ip()))
}

/// Drive one peer connection until the socket closes.
pub async fn serve_socket(relay: Arc<ShareRelay>, socket: WebSocket, address: IpAddr) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbox) = mpsc::unbounded_channel::<ServerMessage>();
    let peer_id = relay.connect_peer(address, outbound);

    let writer_peer = peer_id.clone();
    tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(peer = %writer_peer, "Failed to encode message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => relay.handle_text(&peer_id, &text),
            Ok(Message::Binary(_)) => relay.reject(&peer_id, ProtocolError::BinaryFrame),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(peer = %peer_id, "Socket error: {}", e);
                break;
            }
        }
    }

    // Dropping the registry entry closes the outbound channel, which ends
    // the writer task.
    relay.disconnect_peer(&peer_id);
}
