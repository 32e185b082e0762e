//! Transfer protocol engine.
//!
//! Direct mode: per file in manifest order the sender writes a `file-start`
//! record, the bytes as binary frames of `frame_size`, and a `file-end`
//! record, then a final `transfer-complete`. Before every frame it waits
//! while the channel buffers more than the high-water mark.
//!
//! Relay mode: the sender concatenates the files in manifest order and
//! pushes them through the signaling socket as base64 `file-chunk`
//! messages; the receiver reads the relay's event stream and splits it by
//! the manifest sizes.

use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::StreamExt;
use peershare_core::{
    DownloadStep, ProgressTracker, ReceiveAssembler, ReceiveProgress, ReceiveStep, ReceivedFile,
    RelayDownload, SseDecoder,
};
use peershare_types::{
    total_size, ClientMessage, ControlRecord, FileChunk, FileEnd, FileMeta, FileStart,
    ProgressUpdate, SessionId, SessionRef, TransferProgress,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::FlowControl;
use crate::error::TransferError;
use crate::relay_fetch::RelayFetcher;
use crate::transport::{ChannelFrame, DataChannel, SignalingLink, TransportError};

/// Minimum spacing of relayed `transfer-progress` messages.
pub const RELAY_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// A file queued for sending.
#[derive(Clone)]
pub struct OutgoingFile {
    /// Manifest entry.
    pub meta: FileMeta,
    /// Contents.
    pub data: Arc<[u8]>,
}

impl OutgoingFile {
    /// Build a file; `size` is taken from `data`.
    pub fn new(name: &str, mime_type: &str, data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        Self {
            meta: FileMeta::new(name, data.len() as u64, mime_type),
            data,
        }
    }
}

impl std::fmt::Debug for OutgoingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingFile")
            .field("meta", &self.meta)
            .field("data", &format!("[{} bytes]", self.data.len()))
            .finish()
    }
}

/// What a running transfer reports.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Progress snapshot.
    Progress(TransferProgress),
    /// A file was fully received.
    File(ReceivedFile),
}

fn frame_size(flow: &FlowControl) -> usize {
    flow.frame_size.max(1)
}

async fn send_frame(
    channel: &dyn DataChannel,
    flow: &FlowControl,
    frame: ChannelFrame,
) -> Result<(), TransferError> {
    channel
        .wait_writable(flow.high_water(), flow.poll_interval)
        .await
        .map_err(TransferError::Send)?;
    match frame {
        ChannelFrame::Text(text) => channel.send_text(&text).await,
        ChannelFrame::Binary(bytes) => channel.send_binary(&bytes).await,
    }
    .map_err(TransferError::Send)
}

fn control(record: ControlRecord) -> Result<ChannelFrame, TransferError> {
    record
        .to_json()
        .map(ChannelFrame::Text)
        .map_err(|e| TransferError::Send(TransportError::SendFailed(e.to_string())))
}

// ===========================================
// Direct mode
// ===========================================

/// Stream `files` over `channel`. Returns the number of bytes sent.
///
/// Waits for the channel buffer to drain before returning, so closing the
/// channel afterwards cannot drop queued frames.
pub async fn send_files(
    channel: &dyn DataChannel,
    files: &[OutgoingFile],
    flow: &FlowControl,
    mut report: impl FnMut(EngineEvent),
) -> Result<u64, TransferError> {
    let metas: Vec<FileMeta> = files.iter().map(|f| f.meta.clone()).collect();
    let total = total_size(&metas);
    let total_files = files.len() as u32;
    let tracker = ProgressTracker::new(Instant::now(), total, total_files);
    let mut sent: u64 = 0;

    for (index, file) in files.iter().enumerate() {
        let index = index as u32;
        let header = FileStart::for_file(&file.meta, index, total_files, total);
        send_frame(channel, flow, control(ControlRecord::FileStart(header))?).await?;

        for chunk in file.data.chunks(frame_size(flow)) {
            send_frame(channel, flow, ChannelFrame::Binary(chunk.to_vec())).await?;
            sent += chunk.len() as u64;
            report(EngineEvent::Progress(tracker.snapshot(
                Instant::now(),
                sent,
                &file.meta.name,
                index,
            )));
        }

        let trailer = FileEnd { file_index: index };
        send_frame(channel, flow, control(ControlRecord::FileEnd(trailer))?).await?;
        debug!(file = %file.meta.name, index, "File sent");
    }

    send_frame(channel, flow, control(ControlRecord::TransferComplete)?).await?;
    channel
        .wait_writable(0, flow.poll_interval)
        .await
        .map_err(TransferError::Send)?;

    info!(bytes = sent, files = total_files, "Transfer sent");
    Ok(sent)
}

/// Reassemble frames until `transfer-complete`. Returns the received files.
///
/// The frame stream ending first is [`TransferError::LinkClosed`].
pub async fn receive_files(
    frames: &mut mpsc::UnboundedReceiver<ChannelFrame>,
    mut report: impl FnMut(EngineEvent),
) -> Result<Vec<ReceivedFile>, TransferError> {
    let mut assembler = ReceiveAssembler::new();
    let mut tracker = ProgressTracker::new(Instant::now(), 0, 0);
    let mut files = Vec::new();

    while let Some(frame) = frames.recv().await {
        let step = match frame {
            ChannelFrame::Text(text) => assembler.on_text(&text)?,
            ChannelFrame::Binary(bytes) => assembler.on_binary(bytes)?,
        };
        match step {
            ReceiveStep::Progress(p) => {
                tracker.set_totals(p.total_bytes, p.total_files);
                report(EngineEvent::Progress(snapshot(&tracker, &p)));
            }
            ReceiveStep::File(file) => {
                debug!(file = %file.meta.name, bytes = file.data.len(), "File received");
                files.push(file.clone());
                report(EngineEvent::File(file));
            }
            ReceiveStep::Complete => {
                info!(bytes = assembler.bytes_received(), files = files.len(), "Transfer received");
                return Ok(files);
            }
            ReceiveStep::FileStarted { .. } | ReceiveStep::Ignored => {}
        }
    }
    Err(TransferError::LinkClosed)
}

fn snapshot(tracker: &ProgressTracker, p: &ReceiveProgress) -> TransferProgress {
    tracker.snapshot(Instant::now(), p.bytes_received, &p.current_file, p.file_index)
}

// ===========================================
// Relay mode
// ===========================================

/// Push `files` through the relay as `file-chunk` messages followed by
/// `file-chunk-end`. Every frame is reported to `report`; the relay gets a
/// `transfer-progress` at most once per [`RELAY_PROGRESS_INTERVAL`] plus one
/// for the last frame.
pub async fn send_via_relay(
    signaling: &dyn SignalingLink,
    session_id: &SessionId,
    files: &[OutgoingFile],
    flow: &FlowControl,
    mut report: impl FnMut(EngineEvent),
) -> Result<u64, TransferError> {
    let metas: Vec<FileMeta> = files.iter().map(|f| f.meta.clone()).collect();
    let total = total_size(&metas);
    let tracker = ProgressTracker::new(Instant::now(), total, files.len() as u32);
    let size = frame_size(flow);
    let mut pending: Vec<u8> = Vec::with_capacity(size);
    let mut sent: u64 = 0;
    let mut last_progress: Option<Instant> = None;

    let mut push = |pending: &mut Vec<u8>, name: &str, index: u32| -> Result<(), TransferError> {
        let data = STANDARD.encode(pending.as_slice());
        signaling
            .send(ClientMessage::FileChunk(FileChunk {
                session_id: session_id.clone(),
                data,
            }))
            .map_err(TransferError::Send)?;
        sent += pending.len() as u64;
        pending.clear();

        let now = Instant::now();
        let progress = tracker.snapshot(now, sent, name, index);
        let due = last_progress
            .map_or(true, |at| now.duration_since(at) >= RELAY_PROGRESS_INTERVAL);
        if due || sent == total {
            last_progress = Some(now);
            signaling
                .send(ClientMessage::TransferProgress(ProgressUpdate {
                    session_id: session_id.clone(),
                    progress: progress.clone(),
                }))
                .map_err(TransferError::Send)?;
        }
        report(EngineEvent::Progress(progress));
        Ok(())
    };

    let mut last = (String::new(), 0u32);
    for (index, file) in files.iter().enumerate() {
        let index = index as u32;
        last = (file.meta.name.clone(), index);
        let mut rest: &[u8] = &file.data;
        while !rest.is_empty() {
            let take = (size - pending.len()).min(rest.len());
            pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if pending.len() == size {
                push(&mut pending, &file.meta.name, index)?;
                tokio::task::yield_now().await;
            }
        }
    }
    if !pending.is_empty() {
        push(&mut pending, &last.0, last.1)?;
    }

    signaling
        .send(ClientMessage::FileChunkEnd(SessionRef::new(session_id.clone())))
        .map_err(TransferError::Send)?;
    info!(%session_id, bytes = total, "Relay upload finished");
    Ok(total)
}

/// Outcome of a relay download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Files rebuilt from the stream.
    pub files: Vec<ReceivedFile>,
    /// Whether `end` arrived with every manifest entry filled.
    pub complete: bool,
}

/// Read the relay download stream for `session_id` and rebuild `files`.
pub async fn download_via_relay(
    fetcher: &dyn RelayFetcher,
    session_id: &SessionId,
    files: Vec<FileMeta>,
    mut report: impl FnMut(EngineEvent),
) -> Result<RelayOutcome, TransferError> {
    let total_files = files.len() as u32;
    let tracker = ProgressTracker::new(Instant::now(), total_size(&files), total_files);
    let mut download = RelayDownload::new(files);
    let mut decoder = SseDecoder::new();
    let mut stream = fetcher
        .open_download(session_id)
        .await
        .map_err(|e| TransferError::ConnectionFailed(e.to_string()))?;
    let mut received = Vec::new();

    let mut apply = |step: DownloadStep, received: &mut Vec<ReceivedFile>| -> Option<bool> {
        match step {
            DownloadStep::Progress(p) => {
                report(EngineEvent::Progress(snapshot(&tracker, &p)));
                None
            }
            DownloadStep::File(file) => {
                received.push(file.clone());
                report(EngineEvent::File(file));
                None
            }
            DownloadStep::Finished { complete } => Some(complete),
        }
    };

    while let Some(text) = stream.next().await {
        let text = text.map_err(|e| TransferError::Receive(e.to_string()))?;
        for event in decoder.push(&text)? {
            for step in download.apply(event) {
                if let Some(complete) = apply(step, &mut received) {
                    return Ok(RelayOutcome {
                        files: received,
                        complete,
                    });
                }
            }
        }
    }

    let complete = match download.stream_closed() {
        Some(step) => apply(step, &mut received).unwrap_or(false),
        None => false,
    };
    debug!(%session_id, complete, "Relay stream closed");
    Ok(RelayOutcome {
        files: received,
        complete,
    })
}
