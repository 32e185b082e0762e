//! Prometheus metrics endpoint.

use crate::server::{RelayMetrics, ShareRelay};
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<ShareRelay>>) -> impl IntoResponse {
    let body = render(&relay);
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn render(relay: &ShareRelay) -> String {
    let m = relay.metrics();

    // Gauges
    let peers = relay.peer_count();
    let sessions = relay.session_count();
    let limiter_keys = relay.rate_limits().tracked_addresses() + relay.rate_limits().tracked_peers();

    // Counters
    let conns_total = RelayMetrics::get(&m.connections_total);
    let messages = RelayMetrics::get(&m.messages_total);
    let created = RelayMetrics::get(&m.sessions_created);
    let joins = RelayMetrics::get(&m.joins_total);
    let bytes = RelayMetrics::get(&m.bytes_relayed);
    let chunks = RelayMetrics::get(&m.chunks_relayed);
    let rate_limits = RelayMetrics::get(&m.rate_limit_hits);
    let errors = RelayMetrics::get(&m.errors_total);

    format!(
        r#"# HELP peershare_relay_peers_active Number of connected peers
# TYPE peershare_relay_peers_active gauge
peershare_relay_peers_active {peers}

# HELP peershare_relay_sessions_active Number of active transfer sessions
# TYPE peershare_relay_sessions_active gauge
peershare_relay_sessions_active {sessions}

# HELP peershare_relay_rate_limit_keys Keys tracked by the rate limiters
# TYPE peershare_relay_rate_limit_keys gauge
peershare_relay_rate_limit_keys {limiter_keys}

# HELP peershare_relay_info Server information
# TYPE peershare_relay_info gauge
peershare_relay_info{{version="{version}"}} 1

# HELP peershare_relay_connections_total Total WebSocket connections accepted
# TYPE peershare_relay_connections_total counter
peershare_relay_connections_total {conns_total}

# HELP peershare_relay_messages_total Total inbound messages
# TYPE peershare_relay_messages_total counter
peershare_relay_messages_total {messages}

# HELP peershare_relay_sessions_created_total Total sessions created
# TYPE peershare_relay_sessions_created_total counter
peershare_relay_sessions_created_total {created}

# HELP peershare_relay_joins_total Total receivers bound to sessions
# TYPE peershare_relay_joins_total counter
peershare_relay_joins_total {joins}

# HELP peershare_relay_bytes_relayed_total Total bytes forwarded to download streams
# TYPE peershare_relay_bytes_relayed_total counter
peershare_relay_bytes_relayed_total {bytes}

# HELP peershare_relay_chunks_relayed_total Total chunks forwarded to download streams
# TYPE peershare_relay_chunks_relayed_total counter
peershare_relay_chunks_relayed_total {chunks}

# HELP peershare_relay_rate_limit_hits_total Total rate limit rejections
# TYPE peershare_relay_rate_limit_hits_total counter
peershare_relay_rate_limit_hits_total {rate_limits}

# HELP peershare_relay_errors_total Total protocol errors
# TYPE peershare_relay_errors_total counter
peershare_relay_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
