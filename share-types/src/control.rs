//! Control records exchanged as text frames on the direct data channel.
//!
//! Binary frames carry file bytes; these records delimit them:
//!
//! ```text
//! file-start(0) [bytes..] file-end(0) file-start(1) [bytes..] file-end(1) transfer-complete
//! ```

use serde::{Deserialize, Serialize};

use crate::{FileMeta, ShareError};

/// A control record on the direct channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlRecord {
    /// A new file begins.
    FileStart(FileStart),
    /// The current file is complete.
    FileEnd(FileEnd),
    /// No more files follow.
    TransferComplete,
}

/// Header sent before the bytes of each file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStart {
    /// File name.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// MIME type.
    pub mime_type: String,
    /// Zero-based position in the manifest.
    pub file_index: u32,
    /// Number of files in the manifest.
    pub total_files: u32,
    /// Sum of all file sizes in the manifest.
    pub total_size: u64,
}

impl FileStart {
    /// Build the header for `meta` at `file_index`.
    pub fn for_file(meta: &FileMeta, file_index: u32, total_files: u32, total_size: u64) -> Self {
        Self {
            name: meta.name.clone(),
            size: meta.size,
            mime_type: meta.mime_type.clone(),
            file_index,
            total_files,
            total_size,
        }
    }

    /// Metadata described by this header.
    pub fn meta(&self) -> FileMeta {
        FileMeta::new(self.name.clone(), self.size, self.mime_type.clone())
    }
}

/// Trailer sent after the bytes of each file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEnd {
    /// Index matching the preceding `file-start`.
    pub file_index: u32,
}

impl ControlRecord {
    /// Encode to the JSON text carried in a text frame.
    pub fn to_json(&self) -> Result<String, ShareError> {
        serde_json::to_string(self).map_err(ShareError::Serialization)
    }

    /// Decode a text frame.
    pub fn from_json(text: &str) -> Result<Self, ShareError> {
        serde_json::from_str(text).map_err(|source| ShareError::Malformed {
            kind: "control".to_string(),
            source,
        })
    }
}
