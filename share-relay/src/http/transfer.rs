//! Session lookup and relay streams.
//!
//! `download` and `progress` are server-sent event streams. A download
//! emits `chunk` events with base64 data and a final `end` event.

use crate::server::ShareRelay;
use crate::sessions::{SessionInfo, StreamItem};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::stream;
use share_types::SessionId;
use std::convert::Infallible;
use std::sync::Arc;

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Session not found" })),
    )
        .into_response()
}

/// `GET /api/transfer/:id`
pub async fn session_handler(
    Path(id): Path<String>,
    Extension(relay): Extension<Arc<ShareRelay>>,
) -> Result<Json<SessionInfo>, Response> {
    relay
        .session_info(&SessionId::new(id))
        .map(Json)
        .ok_or_else(not_found)
}

/// `GET /api/transfer/:id/download`
///
/// Attaching tells the sender the receiver is ready for relayed bytes.
pub async fn download_handler(
    Path(id): Path<String>,
    Extension(relay): Extension<Arc<ShareRelay>>,
) -> Response {
    let Some(chunks) = relay.subscribe_chunks(&SessionId::new(id)) else {
        return not_found();
    };

    let events = stream::unfold(Some(chunks), |chunks| async move {
        let mut chunks = chunks?;
        let event = match chunks.recv().await {
            Some(StreamItem::Chunk(bytes)) => {
                let event = Event::default().event("chunk").data(STANDARD.encode(bytes));
                return Some((Ok::<_, Infallible>(event), Some(chunks)));
            }
            Some(StreamItem::End) | None => Event::default().event("end").data("done"),
        };
        Some((Ok(event), None))
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

/// `GET /api/transfer/:id/progress`
pub async fn progress_handler(
    Path(id): Path<String>,
    Extension(relay): Extension<Arc<ShareRelay>>,
) -> Response {
    let Some(updates) = relay.subscribe_progress(&SessionId::new(id)) else {
        return not_found();
    };

    let events = stream::unfold(updates, |mut updates| async move {
        let progress = updates.recv().await?;
        let event = Event::default().event("progress").json_data(&progress);
        Some((event, updates))
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}
