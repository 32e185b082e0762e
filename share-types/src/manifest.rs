//! File manifest, progress and lifecycle types shared by relay and client.

use serde::{Deserialize, Serialize};

use crate::PeerId;

/// Fallback MIME type when the sender does not know one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Metadata for one file in a transfer manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// File name as chosen by the sender.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type.
    #[serde(rename = "type", default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    DEFAULT_MIME_TYPE.to_string()
}

impl FileMeta {
    /// Create metadata, substituting the default MIME type when empty.
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        Self {
            name: name.into(),
            size,
            mime_type: if mime_type.is_empty() {
                default_mime_type()
            } else {
                mime_type
            },
        }
    }
}

/// Sum of the sizes in a manifest.
pub fn total_size(files: &[FileMeta]) -> u64 {
    files.iter().map(|f| f.size).sum()
}

/// Snapshot of transfer progress. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    /// Bytes moved so far, across all files.
    pub bytes_transferred: u64,
    /// Total bytes in the manifest.
    pub total_bytes: u64,
    /// Bytes per second since the transfer started.
    pub speed: f64,
    /// Estimated seconds remaining.
    pub eta: f64,
    /// Name of the file currently in flight.
    pub current_file: String,
    /// Zero-based index of the current file.
    pub file_index: u32,
    /// Number of files in the manifest.
    pub total_files: u32,
}

impl TransferProgress {
    /// Fraction complete in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64).min(1.0)
    }
}

/// How the two endpoints of a session reach each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Same locality key; direct channel expected to work.
    Local,
    /// Different localities; bytes may need the relay.
    Remote,
    /// Not yet joined.
    #[default]
    Unknown,
}

/// Server-side lifecycle of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no receiver yet.
    #[default]
    Waiting,
    /// Receiver bound, negotiating.
    Connecting,
    /// Bytes are flowing.
    Transferring,
    /// Sender reported completion.
    Complete,
    /// A party reported a failure.
    Error,
    /// A party cancelled or disconnected.
    Cancelled,
}

impl SessionStatus {
    /// Terminal statuses ignore every further message.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

/// Public view of a peer, as listed to its neighbours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    /// Peer id.
    pub id: PeerId,
    /// Display name.
    pub name: String,
}
