//! HTTP endpoints for share-relay.
//!
//! Provides the signaling WebSocket, session lookup, relay streams, health
//! checks and metrics.

pub mod health;
mod metrics;
mod transfer;

use crate::connection::{serve_socket, source_address};
use crate::server::{RelayMetrics, ShareRelay};
use axum::extract::{ConnectInfo, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
///
/// The WebSocket route reads [`ConnectInfo`], so serve the router with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_router(relay: Arc<ShareRelay>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route("/api/transfer/:id", get(transfer::session_handler))
        .route("/api/transfer/:id/download", get(transfer::download_handler))
        .route("/api/transfer/:id/progress", get(transfer::progress_handler))
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}

/// Signaling socket upgrade, limited per source address.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Extension(relay): Extension<Arc<ShareRelay>>,
) -> Response {
    let address = source_address(remote, &headers, relay.config().server.trust_forwarded_for);
    if let Err(e) = relay.rate_limits().check_connection(&address) {
        RelayMetrics::add(&relay.metrics().rate_limit_hits, 1);
        tracing::warn!(%address, "{}", e);
        return (StatusCode::TOO_MANY_REQUESTS, e.to_string()).into_response();
    }

    ws.max_message_size(relay.config().server.max_message_size)
        .on_upgrade(move |socket| serve_socket(relay, socket, address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use share_core::{RelayStreamEvent, SseDecoder};
    use share_types::{
        ClientMessage, CreateSession, FileChunk, FileMeta, PeerId, ServerMessage, SessionId,
        SessionRef,
    };
    use tokio::sync::mpsc;
    use tower::util::ServiceExt;

    fn test_relay() -> Arc<ShareRelay> {
        Arc::new(ShareRelay::new(Config::default()))
    }

    fn app(relay: Arc<ShareRelay>) -> Router {
        build_router(relay).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn open_session(relay: &Arc<ShareRelay>) -> (PeerId, SessionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = relay.connect_peer("10.0.0.1".parse().unwrap(), tx);
        relay.handle_message(
            &sender,
            ClientMessage::CreateSession(CreateSession {
                files: vec![FileMeta::new("notes.txt", 5, "text/plain")],
            }),
        );
        let mut session_id = None;
        while let Ok(message) = rx.try_recv() {
            if let ServerMessage::SessionCreated(created) = message {
                session_id = Some(created.session_id);
            }
        }
        (sender, session_id.unwrap(), rx)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let response = app(test_relay()).oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["peers"], 0);
        assert_eq!(json["sessions"]["transferring"], 0);
    }

    #[tokio::test]
    async fn health_endpoint_counts_waiting_sessions() {
        let relay = test_relay();
        let _session = open_session(&relay);
        let response = app(relay).oneshot(get_request("/health")).await.unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["peers"], 1);
        assert_eq!(json["sessions"]["waiting"], 1);
        assert_eq!(json["sessions"]["downloadStreams"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let response = app(test_relay()).oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[axum::http::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn ws_route_requires_an_upgrade() {
        let response = app(test_relay()).oneshot(get_request("/api/ws")).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn session_lookup() {
        let relay = test_relay();
        let (_sender, session_id, _rx) = open_session(&relay);

        let response = app(relay.clone())
            .oneshot(get_request(&format!("/api/transfer/{}", session_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["id"], session_id.as_str());
        assert_eq!(json["totalSize"], 5);
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["files"][0]["name"], "notes.txt");

        let missing = app(relay)
            .oneshot(get_request("/api/transfer/nope"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_streams_chunks_then_end() {
        let relay = test_relay();
        let (sender, session_id, mut sender_rx) = open_session(&relay);

        let response = app(relay.clone())
            .oneshot(get_request(&format!("/api/transfer/{}/download", session_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            sender_rx.try_recv().unwrap(),
            ServerMessage::ReceiverReady(SessionRef::new(session_id.clone()))
        );

        relay.handle_message(
            &sender,
            ClientMessage::FileChunk(FileChunk {
                session_id: session_id.clone(),
                data: "aGVsbG8=".into(),
            }),
        );
        relay.handle_message(&sender, ClientMessage::FileChunkEnd(SessionRef::new(session_id)));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let events = SseDecoder::new()
            .push(std::str::from_utf8(&body).unwrap())
            .unwrap();
        assert_eq!(
            events,
            vec![RelayStreamEvent::Chunk(b"hello".to_vec()), RelayStreamEvent::End]
        );
    }

    #[tokio::test]
    async fn streams_for_missing_sessions_are_not_found() {
        for uri in ["/api/transfer/nope/download", "/api/transfer/nope/progress"] {
            let response = app(test_relay()).oneshot(get_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }
}
