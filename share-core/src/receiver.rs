//! Receive-side reassembly of the direct channel stream.
//!
//! Text frames are [`ControlRecord`]s and binary frames are file bytes.
//! Bytes accumulate per file until `file-end`, when they are joined into one
//! contiguous buffer. The aggregate byte counter is never reset between
//! files, so progress is always measured against the manifest total.

use peershare_types::{ControlRecord, FileMeta, FileStart, ShareError};
use thiserror::Error;

/// Errors raised while reassembling incoming frames.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// Text frame was not a valid control record.
    #[error("bad control record: {0}")]
    Control(#[from] ShareError),

    /// Binary data arrived before any `file-start`.
    #[error("data frame received outside a file")]
    DataOutsideFile,

    /// `file-end` named a different file than the open one.
    #[error("file-end for index {got} while file {expected} is open")]
    FileIndexMismatch {
        /// Index of the open file.
        expected: u32,
        /// Index carried by the trailer.
        got: u32,
    },
}

/// A fully received file.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Metadata from the `file-start` header.
    pub meta: FileMeta,
    /// Position in the manifest.
    pub file_index: u32,
    /// File contents.
    pub data: Vec<u8>,
}

impl std::fmt::Debug for ReceivedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedFile")
            .field("meta", &self.meta)
            .field("file_index", &self.file_index)
            .field("data", &format!("[{} bytes]", self.data.len()))
            .finish()
    }
}

/// Aggregate position after a data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveProgress {
    /// Bytes received across all files so far.
    pub bytes_received: u64,
    /// `totalSize` from the most recent `file-start`.
    pub total_bytes: u64,
    /// Name of the open file.
    pub current_file: String,
    /// Index of the open file.
    pub file_index: u32,
    /// Number of files announced.
    pub total_files: u32,
}

/// What a frame produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveStep {
    /// A new file was opened.
    FileStarted {
        /// Index of the opened file.
        file_index: u32,
    },
    /// Data was appended to the open file.
    Progress(ReceiveProgress),
    /// A file was closed and assembled.
    File(ReceivedFile),
    /// The sender finished the manifest.
    Complete,
    /// Frame carried nothing actionable.
    Ignored,
}

#[derive(Debug)]
struct OpenFile {
    header: FileStart,
    frames: Vec<Vec<u8>>,
    len: usize,
}

/// Reassembles one transfer. Create a fresh one per transfer.
#[derive(Debug, Default)]
pub struct ReceiveAssembler {
    current: Option<OpenFile>,
    bytes_received: u64,
    total_bytes: u64,
    total_files: u32,
    files_received: u32,
    complete: bool,
}

impl ReceiveAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a text frame.
    pub fn on_text(&mut self, text: &str) -> Result<ReceiveStep, ReceiveError> {
        let record = ControlRecord::from_json(text)?;
        self.on_control(record)
    }

    /// Handle a decoded control record.
    pub fn on_control(&mut self, record: ControlRecord) -> Result<ReceiveStep, ReceiveError> {
        if self.complete {
            return Ok(ReceiveStep::Ignored);
        }
        match record {
            ControlRecord::FileStart(header) => {
                self.total_bytes = header.total_size;
                self.total_files = header.total_files;
                let file_index = header.file_index;
                self.current = Some(OpenFile {
                    header,
                    frames: Vec::new(),
                    len: 0,
                });
                Ok(ReceiveStep::FileStarted { file_index })
            }
            ControlRecord::FileEnd(end) => {
                let Some(open) = self.current.take() else {
                    return Ok(ReceiveStep::Ignored);
                };
                if open.header.file_index != end.file_index {
                    let expected = open.header.file_index;
                    self.current = Some(open);
                    return Err(ReceiveError::FileIndexMismatch {
                        expected,
                        got: end.file_index,
                    });
                }
                let mut data = Vec::with_capacity(open.len);
                for frame in open.frames {
                    data.extend_from_slice(&frame);
                }
                self.files_received += 1;
                Ok(ReceiveStep::File(ReceivedFile {
                    meta: open.header.meta(),
                    file_index: open.header.file_index,
                    data,
                }))
            }
            ControlRecord::TransferComplete => {
                self.complete = true;
                self.current = None;
                Ok(ReceiveStep::Complete)
            }
        }
    }

    /// Handle a binary frame.
    pub fn on_binary(&mut self, data: Vec<u8>) -> Result<ReceiveStep, ReceiveError> {
        if self.complete {
            return Ok(ReceiveStep::Ignored);
        }
        let open = self.current.as_mut().ok_or(ReceiveError::DataOutsideFile)?;
        self.bytes_received += data.len() as u64;
        open.len += data.len();
        open.frames.push(data);

        Ok(ReceiveStep::Progress(ReceiveProgress {
            bytes_received: self.bytes_received,
            total_bytes: self.total_bytes,
            current_file: open.header.name.clone(),
            file_index: open.header.file_index,
            total_files: self.total_files,
        }))
    }

    /// Bytes received across all files.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Files fully assembled so far.
    pub fn files_received(&self) -> u32 {
        self.files_received
    }

    /// Whether `transfer-complete` has been seen.
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peershare_types::FileEnd;

    fn start(name: &str, size: u64, index: u32) -> ControlRecord {
        ControlRecord::FileStart(FileStart::for_file(
            &FileMeta::new(name, size, "text/plain"),
            index,
            2,
            3000,
        ))
    }

    fn end(index: u32) -> ControlRecord {
        ControlRecord::FileEnd(FileEnd { file_index: index })
    }

    #[test]
    fn two_files_accumulate_across_boundaries() {
        let mut rx = ReceiveAssembler::new();
        let mut indices = Vec::new();
        let mut files = Vec::new();

        rx.on_control(start("a.txt", 1000, 0)).unwrap();
        for chunk in [vec![1u8; 600], vec![2u8; 400]] {
            if let ReceiveStep::Progress(p) = rx.on_binary(chunk).unwrap() {
                indices.push(p.file_index);
            }
        }
        if let ReceiveStep::File(f) = rx.on_control(end(0)).unwrap() {
            files.push(f);
        }

        rx.on_control(start("b.txt", 2000, 1)).unwrap();
        let step = rx.on_binary(vec![3u8; 2000]).unwrap();
        let ReceiveStep::Progress(last) = step else {
            panic!("Expected progress");
        };
        indices.push(last.file_index);
        assert_eq!(last.bytes_received, 3000);
        assert_eq!(last.total_bytes, 3000);

        if let ReceiveStep::File(f) = rx.on_control(end(1)).unwrap() {
            files.push(f);
        }
        assert_eq!(
            rx.on_control(ControlRecord::TransferComplete).unwrap(),
            ReceiveStep::Complete
        );

        assert_eq!(indices, vec![0, 0, 1]);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].meta.name, "a.txt");
        assert_eq!(files[0].data.len(), 1000);
        assert_eq!(&files[0].data[598..602], &[1, 1, 2, 2]);
        assert_eq!(files[1].data.len(), 2000);
        assert_eq!(rx.bytes_received(), 3000);
        assert_eq!(rx.files_received(), 2);
        assert!(rx.is_complete());
    }

    #[test]
    fn text_frames_are_parsed() {
        let mut rx = ReceiveAssembler::new();
        let text = start("a.txt", 3, 0).to_json().unwrap();
        assert_eq!(
            rx.on_text(&text).unwrap(),
            ReceiveStep::FileStarted { file_index: 0 }
        );
        assert!(matches!(
            rx.on_text("{\"type\":\"bogus\"}"),
            Err(ReceiveError::Control(_))
        ));
    }

    #[test]
    fn data_before_header_is_an_error() {
        let mut rx = ReceiveAssembler::new();
        assert!(matches!(
            rx.on_binary(vec![0u8; 4]),
            Err(ReceiveError::DataOutsideFile)
        ));
    }

    #[test]
    fn mismatched_trailer_keeps_file_open() {
        let mut rx = ReceiveAssembler::new();
        rx.on_control(start("a.txt", 2, 0)).unwrap();
        rx.on_binary(vec![9, 9]).unwrap();
        assert!(matches!(
            rx.on_control(end(1)),
            Err(ReceiveError::FileIndexMismatch { expected: 0, got: 1 })
        ));
        assert!(matches!(rx.on_control(end(0)).unwrap(), ReceiveStep::File(_)));
    }

    #[test]
    fn empty_file_assembles_to_empty_buffer() {
        let mut rx = ReceiveAssembler::new();
        rx.on_control(start("empty", 0, 0)).unwrap();
        let ReceiveStep::File(file) = rx.on_control(end(0)).unwrap() else {
            panic!("Expected file");
        };
        assert!(file.data.is_empty());
    }

    #[test]
    fn frames_after_completion_are_ignored() {
        let mut rx = ReceiveAssembler::new();
        rx.on_control(ControlRecord::TransferComplete).unwrap();
        assert_eq!(rx.on_binary(vec![1]).unwrap(), ReceiveStep::Ignored);
    }
}
