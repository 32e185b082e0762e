//! # share-relay
//!
//! Coordination relay for PeerShare transfers.
//!
//! This crate implements a relay server that:
//! - Accepts signaling WebSockets from browsers and native clients
//! - Groups peers by network segment so nearby devices find each other
//! - Issues transfer sessions with 6-digit codes and share links
//! - Forwards connection negotiation messages between the two parties
//! - Streams file bytes sender to receiver when a direct link is impossible
//!
//! File bytes only pass through the relay in remote mode, and are never
//! stored.
//!
//! ## Architecture
//!
//! ```text
//! Sender ──┐   WebSocket (JSON)     ┌── Receiver
//!          ├──────────┐   ┌─────────┤
//!          │      ┌───┴───┴────┐    │
//!          │      │share-relay │    │
//!          │      │ peers      │    │
//!          │      │ sessions   │    │
//!          │      └─────┬──────┘    │
//!          │            │ SSE       │
//!          │            └──────────►│  /api/transfer/:id/download
//!          └═══════ direct link ════┘  (local mode)
//! ```
//!
//! ## Endpoints
//!
//! - `GET /api/ws`: signaling socket
//! - `GET /api/transfer/:id`: session summary
//! - `GET /api/transfer/:id/download`: relayed bytes (server-sent events)
//! - `GET /api/transfer/:id/progress`: relayed progress (server-sent events)
//! - `GET /health`, `GET /metrics`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod limits;
pub mod peers;
pub mod router;
pub mod server;
pub mod sessions;
