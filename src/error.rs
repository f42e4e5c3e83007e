//! Error types shared across the capture pipeline and the supervisor.

use std::path::PathBuf;

use thiserror::Error;

use crate::stream_id::StreamId;

/// Failures surfaced by a [`FrameSource`](crate::capture::FrameSource) or its stream.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The address could not be opened (unreachable host, bad scheme, ...).
    #[error("failed to open {address}: {reason}")]
    Open { address: String, reason: String },

    /// The source has no more frames to give.
    #[error("end of stream")]
    EndOfStream,

    /// A frame could not be read or decoded.
    #[error("read failed: {0}")]
    Read(String),
}

impl SourceError {
    pub fn open(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::Open {
            address: address.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode contact sheet: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum ComposeError {
    /// Pixel payload does not match the declared dimensions.
    #[error("frame #{sequence} has {len} bytes, expected {expected}")]
    MalformedFrame {
        sequence: u64,
        len: usize,
        expected: usize,
    },
}

/// Caller-facing errors returned by [`StreamSupervisor`](crate::StreamSupervisor).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("stream '{0}' is already running")]
    AlreadyRunning(StreamId),

    #[error("no stream found for '{0}'")]
    NotFound(StreamId),

    #[error("stream '{0}' is not running")]
    NotRunning(StreamId),

    #[error("stream '{0}' is already being stopped")]
    StopInProgress(StreamId),

    #[error("not enough frames captured for '{id}' ({have} of {need})")]
    InsufficientFrames {
        id: StreamId,
        have: usize,
        need: usize,
    },

    #[error(transparent)]
    SourceOpen(SourceError),

    #[error("interval must be a finite, non-negative number of seconds, got {0}")]
    InvalidInterval(f64),

    #[error("invalid stream id {0:?}")]
    InvalidStreamId(String),

    #[error("finalizing '{id}' failed: {reason}")]
    Finalize { id: StreamId, reason: String },

    #[error("worker for '{0}' did not exit in time")]
    StopTimedOut(StreamId),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
