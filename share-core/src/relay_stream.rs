//! Relay-mode receive path.
//!
//! When no direct channel is possible the sender pushes base64 chunks over
//! the signaling socket and the relay fans them out as a server-sent event
//! stream. [`SseDecoder`] turns raw stream text into [`RelayStreamEvent`]s
//! and [`RelayDownload`] cuts the concatenated bytes back into files using
//! the manifest sizes.
//!
//! A stream that drops without an `end` event is reported as finished with
//! unknown completeness (`complete == false`).

use base64::{engine::general_purpose::STANDARD, Engine};
use peershare_types::{FileMeta, TransferProgress};
use thiserror::Error;

use crate::receiver::{ReceiveProgress, ReceivedFile};

/// Errors raised while decoding the relay stream.
#[derive(Debug, Error)]
pub enum RelayStreamError {
    /// `chunk` event carried invalid base64.
    #[error("invalid chunk encoding: {0}")]
    ChunkEncoding(#[from] base64::DecodeError),

    /// `progress` event carried invalid JSON.
    #[error("invalid progress payload: {0}")]
    Progress(#[from] serde_json::Error),
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayStreamEvent {
    /// File bytes.
    Chunk(Vec<u8>),
    /// Sender finished pushing.
    End,
    /// Progress snapshot (progress stream only).
    Progress(TransferProgress),
}

/// Incremental `text/event-stream` decoder.
///
/// Feed arbitrary slices of the stream; events are returned once their
/// terminating blank line has arrived.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more stream text.
    pub fn push(&mut self, text: &str) -> Result<Vec<RelayStreamEvent>, RelayStreamError> {
        self.buffer.push_str(text);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch()? {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        Ok(events)
    }

    fn dispatch(&mut self) -> Result<Option<RelayStreamEvent>, RelayStreamError> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data).join("\n");
        let decoded = match event.as_deref() {
            Some("chunk") => Some(RelayStreamEvent::Chunk(STANDARD.decode(data.as_bytes())?)),
            Some("end") => Some(RelayStreamEvent::End),
            Some("progress") => Some(RelayStreamEvent::Progress(serde_json::from_str(&data)?)),
            _ => None,
        };
        Ok(decoded)
    }
}

/// What a relay event produced for the download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStep {
    /// Bytes were appended.
    Progress(ReceiveProgress),
    /// A manifest entry was completed.
    File(ReceivedFile),
    /// The stream ended.
    Finished {
        /// Whether `end` arrived and every manifest entry was filled.
        complete: bool,
    },
}

/// Rebuilds files from the concatenated relay byte stream.
#[derive(Debug)]
pub struct RelayDownload {
    files: Vec<FileMeta>,
    total_bytes: u64,
    index: usize,
    current: Vec<u8>,
    bytes_received: u64,
    finished: bool,
}

impl RelayDownload {
    /// Start a download for `files`, in manifest order.
    pub fn new(files: Vec<FileMeta>) -> Self {
        let total_bytes = peershare_types::total_size(&files);
        Self {
            files,
            total_bytes,
            index: 0,
            current: Vec::new(),
            bytes_received: 0,
            finished: false,
        }
    }

    /// Apply one decoded event.
    pub fn apply(&mut self, event: RelayStreamEvent) -> Vec<DownloadStep> {
        if self.finished {
            return Vec::new();
        }
        match event {
            RelayStreamEvent::Chunk(bytes) => self.on_chunk(bytes),
            RelayStreamEvent::End => {
                let mut steps = self.flush_empty_files();
                self.finished = true;
                steps.push(DownloadStep::Finished {
                    complete: self.index >= self.files.len(),
                });
                steps
            }
            RelayStreamEvent::Progress(_) => Vec::new(),
        }
    }

    /// The stream closed. Yields `Finished { complete: false }` unless `end`
    /// was already seen.
    pub fn stream_closed(&mut self) -> Option<DownloadStep> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(DownloadStep::Finished { complete: false })
    }

    /// Bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    fn on_chunk(&mut self, bytes: Vec<u8>) -> Vec<DownloadStep> {
        let mut steps = self.flush_empty_files();
        let mut rest = bytes.as_slice();

        while !rest.is_empty() {
            let Some(meta) = self.files.get(self.index) else {
                // Bytes beyond the manifest are dropped.
                break;
            };
            let want = meta.size.saturating_sub(self.current.len() as u64) as usize;
            let take = want.min(rest.len());
            self.current.extend_from_slice(&rest[..take]);
            self.bytes_received += take as u64;
            rest = &rest[take..];

            steps.push(DownloadStep::Progress(self.progress(self.index)));
            if self.current.len() as u64 >= meta.size {
                steps.push(self.close_current());
                steps.extend(self.flush_empty_files());
            }
        }
        steps
    }

    fn flush_empty_files(&mut self) -> Vec<DownloadStep> {
        let mut steps = Vec::new();
        while self
            .files
            .get(self.index)
            .is_some_and(|m| m.size == 0 && self.current.is_empty())
        {
            steps.push(self.close_current());
        }
        steps
    }

    fn close_current(&mut self) -> DownloadStep {
        let meta = self.files[self.index].clone();
        let data = std::mem::take(&mut self.current);
        let file_index = self.index as u32;
        self.index += 1;
        DownloadStep::File(ReceivedFile {
            meta,
            file_index,
            data,
        })
    }

    fn progress(&self, index: usize) -> ReceiveProgress {
        ReceiveProgress {
            bytes_received: self.bytes_received,
            total_bytes: self.total_bytes,
            current_file: self.files[index].name.clone(),
            file_index: index as u32,
            total_files: self.files.len() as u32,
        }
    }
}
