//! `GET /health`: liveness plus a snapshot of what the relay is carrying.

use crate::server::{RelayMetrics, ShareRelay};
use crate::sessions::SessionBreakdown;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Record the process start. Later calls keep the first instant.
pub fn init_start_time() {
    STARTED.get_or_init(Instant::now);
}

fn uptime_seconds() -> u64 {
    STARTED.get().map_or(0, |start| start.elapsed().as_secs())
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Always `ok` while the process answers.
    pub status: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Seconds since [`init_start_time`].
    pub uptime_seconds: u64,
    /// Open signaling sockets.
    pub peers: usize,
    /// Sessions per lifecycle stage.
    pub sessions: SessionBreakdown,
    /// Bytes forwarded to download streams since startup.
    pub bytes_relayed: u64,
}

impl HealthStatus {
    /// Snapshot `relay`.
    pub fn collect(relay: &ShareRelay) -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: uptime_seconds(),
            peers: relay.peer_count(),
            sessions: relay.session_breakdown(),
            bytes_relayed: RelayMetrics::get(&relay.metrics().bytes_relayed),
        }
    }
}

/// Serve the current [`HealthStatus`].
pub async fn health_handler(Extension(relay): Extension<Arc<ShareRelay>>) -> Json<HealthStatus> {
    Json(HealthStatus::collect(&relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use share_types::{ClientMessage, CreateSession, FileMeta, ServerMessage, SessionRef};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn reports_sessions_by_stage() {
        let relay = Arc::new(ShareRelay::new(Config::default()));
        let (tx, mut inbox) = mpsc::unbounded_channel();
        let alice = relay.connect_peer("10.0.0.1".parse().unwrap(), tx);
        for _ in 0..2 {
            relay.handle_message(
                &alice,
                ClientMessage::CreateSession(CreateSession {
                    files: vec![FileMeta::new("a.txt", 3, "text/plain")],
                }),
            );
        }
        let mut ids = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            if let ServerMessage::SessionCreated(created) = message {
                ids.push(created.session_id);
            }
        }

        let _stream = relay.subscribe_chunks(&ids[0]).unwrap();
        relay.handle_message(
            &alice,
            ClientMessage::FileChunk(share_types::FileChunk {
                session_id: ids[0].clone(),
                data: "YWJj".into(),
            }),
        );
        relay.handle_message(
            &alice,
            ClientMessage::TransferProgress(share_types::ProgressUpdate {
                session_id: ids[0].clone(),
                progress: Default::default(),
            }),
        );
        relay.handle_message(
            &alice,
            ClientMessage::TransferComplete(SessionRef::new(ids[1].clone())),
        );

        let health = HealthStatus::collect(&relay);
        assert_eq!(health.peers, 1);
        assert_eq!(health.sessions.transferring, 1);
        assert_eq!(health.sessions.waiting, 0);
        assert_eq!(health.sessions.finished, 1);
        assert_eq!(health.sessions.download_streams, 1);
        assert_eq!(health.bytes_relayed, 3);

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["sessions"]["downloadStreams"], 1);
        assert_eq!(json["bytesRelayed"], 3);
        assert!(json.get("uptimeSeconds").is_some());
    }
}
