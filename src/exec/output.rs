/// Bounded output capture for interactive runs
/// Chunks arrive from reader threads; everything up to the limit is kept in memory
/// and mirrored to the run transcript.
use crate::config::types::Result;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

/// Output integrity classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputIntegrity {
    Complete,
    TruncatedByLimit,
    ReadError,
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
        }
    }
}

/// Message from a reader thread
#[derive(Debug)]
pub enum StreamEvent {
    Data(Vec<u8>),
    Failed(String),
}

/// Captured program output, bounded by `limit`
pub struct OutputCapture {
    limit: usize,
    data: Vec<u8>,
    integrity: OutputIntegrity,
    transcript: Option<File>,
}

impl OutputCapture {
    /// Create a capture, optionally mirrored into a transcript file
    pub fn new(limit: usize, transcript: Option<&Path>) -> Result<Self> {
        let transcript = match transcript {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Some(OpenOptions::new().create(true).append(true).open(path)?)
            }
            None => None,
        };
        Ok(Self {
            limit,
            data: Vec::new(),
            integrity: OutputIntegrity::Complete,
            transcript,
        })
    }

    /// Keep what fits under the limit; the rest marks the capture truncated
    pub fn ingest(&mut self, chunk: &[u8]) {
        let remaining = self.limit.saturating_sub(self.data.len());
        let kept = &chunk[..chunk.len().min(remaining)];
        if kept.len() < chunk.len() {
            self.integrity = OutputIntegrity::TruncatedByLimit;
        }
        if kept.is_empty() {
            return;
        }
        self.data.extend_from_slice(kept);
        if let Some(file) = self.transcript.as_mut() {
            if let Err(e) = file.write_all(kept) {
                log::warn!("transcript write failed, disabling transcript: {}", e);
                self.transcript = None;
            }
        }
    }

    pub fn mark_read_error(&mut self) {
        if self.integrity == OutputIntegrity::Complete {
            self.integrity = OutputIntegrity::ReadError;
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn integrity(&self) -> OutputIntegrity {
        self.integrity
    }

    pub fn is_truncated(&self) -> bool {
        self.integrity == OutputIntegrity::TruncatedByLimit
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.transcript.as_mut() {
            let _ = file.flush();
        }
    }
}

/// Forward everything read from `stream` as chunks until EOF.
///
/// A pseudo-terminal master reports EIO once the last slave descriptor closes;
/// that is treated as end of stream.
pub fn spawn_reader<R: Read + Send + 'static>(
    mut stream: R,
    tx: Sender<StreamEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(StreamEvent::Data(chunk[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Failed(e.to_string()));
                    break;
                }
            }
        }
    })
}
