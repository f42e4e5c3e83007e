//! Per-stream capture worker
//!
//! A worker runs on its own OS thread because frame decoding blocks:
//!
//! ```text
//! Starting --open ok--> Running --cancel / EOS / read error--> Draining
//!    |                                                            |
//!    +--open failed--> Failed                 Finalizing <--------+
//!                                                 |
//!                                             Terminated
//! ```
//!
//! The supervisor may move a `Running` worker to `Stopping` before it
//! raises the cancellation signal; the worker then drains like any other
//! exit from the capture loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use crossbeam::atomic::AtomicCell;
use flume::RecvTimeoutError;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{Frame, FrameSource, SourceGuard};
use crate::error::SourceError;
use crate::pipeline::{compose, select_top_k, StreamBuffer, TOP_K};
use crate::sink::ImageSink;
use crate::stream_id::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Draining,
    Finalizing,
    Terminated,
    Failed,
}

impl WorkerState {
    /// `true` until the worker has reached a terminal state.
    pub fn is_live(self) -> bool {
        !matches!(self, WorkerState::Terminated | WorkerState::Failed)
    }
}

/// How a worker's lifetime ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerOutcome {
    /// Contact sheet written to this location.
    Saved(PathBuf),
    /// Finalized without an image.
    InsufficientFrames { have: usize },
    /// Composition or persistence failed.
    Failed(String),
    /// The source never opened; nothing was captured.
    OpenFailed(String),
}

/// One-shot stop flag observed by a single worker.
///
/// The flag is the source of truth; the channel only exists so the
/// inter-frame sleep wakes up as soon as the flag is raised.
pub struct CancellationSignal {
    flag: AtomicBool,
    tx: flume::Sender<()>,
    rx: flume::Receiver<()>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self {
            flag: AtomicBool::new(false),
            tx,
            rx,
        }
    }

    /// Raise the signal. Returns `false` if it was already raised.
    pub fn cancel(&self) -> bool {
        if self.flag.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.tx.try_send(());
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for up to `interval`. Returns `true` if the signal is raised.
    pub fn wait(&self, interval: Duration) -> bool {
        if self.is_cancelled() || interval.is_zero() {
            return self.is_cancelled();
        }
        match self.rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between a worker thread and the supervisor.
pub struct WorkerShared {
    pub buffer: StreamBuffer,
    pub cancel: CancellationSignal,
    state: AtomicCell<WorkerState>,
    outcome: ArcSwapOption<WorkerOutcome>,
}

impl WorkerShared {
    pub fn new() -> Self {
        Self {
            buffer: StreamBuffer::new(),
            cancel: CancellationSignal::new(),
            state: AtomicCell::new(WorkerState::Starting),
            outcome: ArcSwapOption::empty(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state.load()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state);
    }

    /// Mark a running worker as stopping and raise its signal.
    pub fn request_stop(&self) {
        let _ = self
            .state
            .compare_exchange(WorkerState::Running, WorkerState::Stopping);
        self.cancel.cancel();
    }

    /// Outcome, once the worker has finalized.
    pub fn outcome(&self) -> Option<Arc<WorkerOutcome>> {
        self.outcome.load_full()
    }
}

impl Default for WorkerShared {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    Cancelled,
    EndOfStream,
    ReadFailed,
}

/// Drives one frame source into one buffer and finalizes on exit.
pub struct CaptureWorker<S, K> {
    id: StreamId,
    address: String,
    interval: Duration,
    source: Arc<S>,
    sink: Arc<K>,
    shared: Arc<WorkerShared>,
}

impl<S: FrameSource, K: ImageSink> CaptureWorker<S, K> {
    pub fn new(
        id: StreamId,
        address: impl Into<String>,
        interval: Duration,
        source: Arc<S>,
        sink: Arc<K>,
        shared: Arc<WorkerShared>,
    ) -> Self {
        Self {
            id,
            address: address.into(),
            interval,
            source,
            sink,
            shared,
        }
    }

    /// Run to completion on the calling thread.
    ///
    /// The open result is reported on `opened` before any frame is read.
    #[instrument(name = "capture", skip_all, fields(stream = %self.id))]
    pub fn run(self, opened: flume::Sender<Result<(), SourceError>>) -> WorkerOutcome {
        let stream = match self.source.open(&self.address) {
            Ok(stream) => stream,
            Err(e) => {
                error!(address = %self.address, "failed to open source: {}", e);
                let outcome = WorkerOutcome::OpenFailed(e.to_string());
                self.publish(outcome.clone(), WorkerState::Failed);
                let _ = opened.send(Err(e));
                return outcome;
            }
        };

        self.shared.set_state(WorkerState::Running);
        let _ = opened.send(Ok(()));
        info!(interval = ?self.interval, "capture started");

        let reason = {
            let mut guard = SourceGuard::new(stream, self.address.clone());
            self.capture_loop(&mut guard)
        };

        self.shared.set_state(WorkerState::Draining);
        let snapshot = self.shared.buffer.drain();
        info!(?reason, frames = snapshot.len(), "capture ended");

        self.shared.set_state(WorkerState::Finalizing);
        let outcome = finalize(&self.id, &snapshot, self.sink.as_ref());
        drop(snapshot);
        self.shared.buffer.clear();

        self.publish(outcome.clone(), WorkerState::Terminated);
        outcome
    }

    fn capture_loop(&self, guard: &mut SourceGuard<S::Stream>) -> ExitReason {
        loop {
            if self.shared.cancel.is_cancelled() {
                return ExitReason::Cancelled;
            }

            match guard.read() {
                Ok(frame) => self.store(frame),
                Err(SourceError::EndOfStream) => {
                    info!("source reached end of stream");
                    return ExitReason::EndOfStream;
                }
                Err(e) => {
                    error!(address = %self.address, "failed to read frame: {}", e);
                    return ExitReason::ReadFailed;
                }
            }

            if self.shared.cancel.wait(self.interval) {
                return ExitReason::Cancelled;
            }
        }
    }

    fn store(&self, frame: Frame) {
        let sequence = frame.meta.sequence;
        if self.shared.buffer.push(frame) {
            metrics::counter!("lumasheet_frames_captured").increment(1);
            debug!(sequence, buffered = self.shared.buffer.len(), "frame stored");
        }
    }

    fn publish(&self, outcome: WorkerOutcome, state: WorkerState) {
        self.shared.outcome.store(Some(Arc::new(outcome)));
        self.shared.set_state(state);
    }
}

/// Rank, compose and persist the final snapshot of a stream.
pub fn finalize<K: ImageSink + ?Sized>(
    id: &StreamId,
    frames: &[Frame],
    sink: &K,
) -> WorkerOutcome {
    let Some(top) = select_top_k(frames, TOP_K) else {
        warn!(stream = %id, have = frames.len(), "not enough frames captured");
        metrics::counter!("lumasheet_finalize_insufficient").increment(1);
        return WorkerOutcome::InsufficientFrames { have: frames.len() };
    };

    let sheet = match compose(&top) {
        Ok(sheet) => sheet,
        Err(e) => {
            error!(stream = %id, "failed to compose contact sheet: {}", e);
            return WorkerOutcome::Failed(e.to_string());
        }
    };

    match sink.save(id, &sheet) {
        Ok(path) => WorkerOutcome::Saved(path),
        Err(e) => {
            error!(stream = %id, "failed to save contact sheet: {}", e);
            WorkerOutcome::Failed(e.to_string())
        }
    }
}
