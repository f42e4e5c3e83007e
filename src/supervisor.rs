//! Registry of capture workers and the start/stop/status control surface.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::FrameSource;
use crate::error::{SourceError, SupervisorError};
use crate::pipeline::TOP_K;
use crate::sink::ImageSink;
use crate::stream_id::StreamId;
use crate::worker::{CaptureWorker, WorkerOutcome, WorkerShared, WorkerState};
use crate::SupervisorConfig;

/// Where a finished contact sheet was written.
pub type ImageLocation = PathBuf;

struct WorkerRecord {
    address: String,
    interval: Duration,
    shared: Arc<WorkerShared>,
    /// Taken by the one `stop` that waits on this worker.
    handle: Option<JoinHandle<()>>,
    done: Option<flume::Receiver<WorkerOutcome>>,
}

/// Point-in-time view of one stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub id: StreamId,
    pub address: String,
    pub interval_secs: f64,
    pub state: WorkerState,
    pub buffered: usize,
    pub frames_captured: u64,
    pub frames_evicted: u64,
    /// Time since the newest buffered frame was captured
    pub last_frame_age_ms: Option<u64>,
    pub cancel_requested: bool,
    pub outcome: Option<WorkerOutcome>,
}

/// A worker that has been signalled and is ready to be awaited.
struct Detached {
    id: StreamId,
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
    done: flume::Receiver<WorkerOutcome>,
}

/// Owns every capture worker. At most one live worker per [`StreamId`].
pub struct StreamSupervisor<S, K> {
    source: Arc<S>,
    sink: Arc<K>,
    config: SupervisorConfig,
    registry: Mutex<HashMap<StreamId, WorkerRecord>>,
}

impl<S: FrameSource, K: ImageSink> StreamSupervisor<S, K> {
    pub fn new(source: S, sink: K, config: SupervisorConfig) -> Self {
        Self {
            source: Arc::new(source),
            sink: Arc::new(sink),
            config,
            registry: Mutex::new(HashMap::new()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<StreamId, WorkerRecord>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start capturing `address` under an identifier derived from it.
    pub async fn start(
        &self,
        address: &str,
        interval_secs: f64,
    ) -> Result<StreamId, SupervisorError> {
        let id = StreamId::from_address(address);
        self.start_with_id(id, address, interval_secs).await
    }

    /// Start capturing `address` under a caller-chosen identifier.
    ///
    /// Returns once the worker has opened its source, so an unreachable
    /// address fails here rather than on a later `stop`.
    #[instrument(skip_all, fields(stream = %id))]
    pub async fn start_with_id(
        &self,
        id: StreamId,
        address: &str,
        interval_secs: f64,
    ) -> Result<StreamId, SupervisorError> {
        let interval = Duration::try_from_secs_f64(interval_secs)
            .map_err(|_| SupervisorError::InvalidInterval(interval_secs))?;

        let shared = Arc::new(WorkerShared::new());
        let (opened_tx, opened_rx) = flume::bounded(1);
        let (done_tx, done_rx) = flume::bounded(1);

        {
            let mut registry = self.registry();
            if let Some(existing) = registry.get(&id) {
                if existing.shared.state().is_live() {
                    return Err(SupervisorError::AlreadyRunning(id));
                }
            }

            let worker = CaptureWorker::new(
                id.clone(),
                address,
                interval,
                self.source.clone(),
                self.sink.clone(),
                shared.clone(),
            );
            let handle = thread::Builder::new()
                .name(format!("capture-{id}"))
                .spawn(move || {
                    let outcome = worker.run(opened_tx);
                    let _ = done_tx.send(outcome);
                })?;

            // Replaces a terminated record for the same id, if any
            registry.insert(
                id.clone(),
                WorkerRecord {
                    address: address.to_string(),
                    interval,
                    shared: shared.clone(),
                    handle: Some(handle),
                    done: Some(done_rx),
                },
            );
        }

        let open_timeout = self.config.open_timeout();
        let opened = match tokio::time::timeout(open_timeout, opened_rx.recv_async()).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SourceError::open(address, "worker exited before opening")),
            Err(_) => {
                warn!(address, "source did not open in time");
                self.abandon(&id, &shared);
                return Err(SupervisorError::SourceOpen(SourceError::open(
                    address,
                    "timed out opening source",
                )));
            }
        };

        if let Err(e) = opened {
            self.reap_failed(&id, &shared).await;
            return Err(SupervisorError::SourceOpen(e));
        }

        info!(address, interval = ?interval, "stream started");
        Ok(id)
    }

    /// Join a worker whose source failed to open, then forget it.
    async fn reap_failed(&self, id: &StreamId, shared: &Arc<WorkerShared>) {
        let handle = {
            let mut registry = self.registry();
            registry
                .get_mut(id)
                .filter(|record| Arc::ptr_eq(&record.shared, shared))
                .and_then(|record| record.handle.take())
        };
        join_worker(id, handle).await;
        self.remove_if_same(id, shared);
    }

    /// Forget a worker whose open timed out and reap it once it exits.
    ///
    /// The worker is cancelled, so a late open finalizes without frames and
    /// never writes a sheet. The id is free again immediately.
    fn abandon(&self, id: &StreamId, shared: &Arc<WorkerShared>) {
        shared.request_stop();
        let record = {
            let mut registry = self.registry();
            let same = registry
                .get(id)
                .is_some_and(|record| Arc::ptr_eq(&record.shared, shared));
            if same {
                registry.remove(id)
            } else {
                None
            }
        };
        let Some(WorkerRecord { handle, done, .. }) = record else {
            return;
        };

        let id = id.clone();
        tokio::spawn(async move {
            if let Some(done) = done {
                let outcome = done.recv_async().await;
                debug!(stream = %id, ?outcome, "abandoned worker exited");
            }
            join_worker(&id, handle).await;
        });
    }

    fn remove_if_same(&self, id: &StreamId, shared: &Arc<WorkerShared>) {
        let mut registry = self.registry();
        if registry
            .get(id)
            .is_some_and(|record| Arc::ptr_eq(&record.shared, shared))
        {
            registry.remove(id);
        }
    }

    /// Stop a stream and return the location of its contact sheet.
    ///
    /// Fails fast with `InsufficientFrames` while fewer than nine frames are
    /// buffered; the worker keeps running in that case. Returns
    /// `StopInProgress` if another caller is already waiting on the worker.
    #[instrument(skip_all, fields(stream = %id))]
    pub async fn stop(&self, id: &StreamId) -> Result<ImageLocation, SupervisorError> {
        let detached = self.detach(id, true)?;
        self.wait_for(detached).await
    }

    /// Check a record and, if it may be stopped, raise its signal.
    fn detach(&self, id: &StreamId, require_frames: bool) -> Result<Detached, SupervisorError> {
        let mut registry = self.registry();
        let record = registry
            .get_mut(id)
            .ok_or_else(|| SupervisorError::NotFound(id.clone()))?;

        let state = record.shared.state();
        if !state.is_live() {
            return Err(SupervisorError::NotRunning(id.clone()));
        }

        // Draining/Finalizing workers already hold their final snapshot
        let capturing = matches!(state, WorkerState::Starting | WorkerState::Running);
        let have = record.shared.buffer.len();
        if require_frames && capturing && have < TOP_K {
            return Err(SupervisorError::InsufficientFrames {
                id: id.clone(),
                have,
                need: TOP_K,
            });
        }

        // Someone else is already waiting on this worker
        let done = record
            .done
            .take()
            .ok_or_else(|| SupervisorError::StopInProgress(id.clone()))?;

        record.shared.request_stop();
        Ok(Detached {
            id: id.clone(),
            shared: record.shared.clone(),
            handle: record.handle.take(),
            done,
        })
    }

    async fn wait_for(&self, detached: Detached) -> Result<ImageLocation, SupervisorError> {
        let Detached {
            id,
            shared,
            handle,
            done,
        } = detached;

        let received = match self.config.stop_timeout() {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, done.recv_async()).await;
                let Ok(received) = waited else {
                    warn!(stream = %id, ?limit, "worker did not exit in time");
                    // Hand the worker back so a later stop or shutdown can wait again
                    let mut registry = self.registry();
                    if let Some(record) = registry
                        .get_mut(&id)
                        .filter(|record| Arc::ptr_eq(&record.shared, &shared))
                    {
                        record.done = Some(done);
                        record.handle = handle;
                    }
                    return Err(SupervisorError::StopTimedOut(id));
                };
                received
            }
            None => done.recv_async().await,
        };

        let outcome = received.unwrap_or_else(|_| {
            WorkerOutcome::Failed("worker thread exited without an outcome".into())
        });
        join_worker(&id, handle).await;
        self.remove_if_same(&id, &shared);
        info!(stream = %id, "stream stopped");

        match outcome {
            WorkerOutcome::Saved(path) => Ok(path),
            WorkerOutcome::InsufficientFrames { have } => Err(SupervisorError::InsufficientFrames {
                id,
                have,
                need: TOP_K,
            }),
            WorkerOutcome::Failed(reason) => Err(SupervisorError::Finalize { id, reason }),
            WorkerOutcome::OpenFailed(_) => Err(SupervisorError::NotRunning(id)),
        }
    }

    /// Stop every live worker, regardless of how many frames each holds.
    pub async fn shutdown(&self) -> Vec<(StreamId, Result<ImageLocation, SupervisorError>)> {
        let ids: Vec<StreamId> = {
            let registry = self.registry();
            let mut ids: Vec<StreamId> = registry
                .iter()
                .filter(|(_, record)| record.shared.state().is_live())
                .map(|(id, _)| id.clone())
                .collect();
            ids.sort();
            ids
        };

        // Signal everyone first so the workers drain in parallel
        let mut detached = Vec::with_capacity(ids.len());
        let mut results = Vec::new();
        for id in ids {
            match self.detach(&id, false) {
                Ok(d) => detached.push(d),
                Err(e) => results.push((id, Err(e))),
            }
        }

        for d in detached {
            let id = d.id.clone();
            results.push((id, self.wait_for(d).await));
        }
        results
    }

    /// Drop the record of a stream that has ended, returning its last status.
    pub async fn forget(&self, id: &StreamId) -> Result<StreamStatus, SupervisorError> {
        let record = match self.registry().entry(id.clone()) {
            Entry::Vacant(_) => return Err(SupervisorError::NotFound(id.clone())),
            Entry::Occupied(entry) if entry.get().shared.state().is_live() => {
                return Err(SupervisorError::AlreadyRunning(id.clone()));
            }
            Entry::Occupied(entry) => entry.remove(),
        };

        let status = status_of(id, &record);
        join_worker(id, record.handle).await;
        debug!(stream = %id, "stream record forgotten");
        Ok(status)
    }

    /// Forget every stream that has ended. Returns how many were removed.
    pub async fn prune(&self) -> usize {
        let ended: Vec<(StreamId, WorkerRecord)> = {
            let mut registry = self.registry();
            let ids: Vec<StreamId> = registry
                .iter()
                .filter(|(_, record)| !record.shared.state().is_live())
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| registry.remove(&id).map(|record| (id, record)))
                .collect()
        };

        let count = ended.len();
        for (id, record) in ended {
            join_worker(&id, record.handle).await;
        }
        if count > 0 {
            debug!(count, "pruned ended streams");
        }
        count
    }

    pub fn status(&self, id: &StreamId) -> Option<StreamStatus> {
        self.registry().get(id).map(|record| status_of(id, record))
    }

    /// Status of every known stream, ordered by id.
    pub fn list(&self) -> Vec<StreamStatus> {
        let mut all: Vec<StreamStatus> = self
            .registry()
            .iter()
            .map(|(id, record)| status_of(id, record))
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

fn status_of(id: &StreamId, record: &WorkerRecord) -> StreamStatus {
    let stats = record.shared.buffer.stats();
    StreamStatus {
        id: id.clone(),
        address: record.address.clone(),
        interval_secs: record.interval.as_secs_f64(),
        state: record.shared.state(),
        buffered: record.shared.buffer.len(),
        frames_captured: stats.frames_written,
        frames_evicted: stats.frames_evicted,
        last_frame_age_ms: record
            .shared
            .buffer
            .newest_capture()
            .map(|at| at.elapsed().as_millis() as u64),
        cancel_requested: record.shared.cancel.is_cancelled(),
        outcome: record.shared.outcome().map(|o| (*o).clone()),
    }
}

/// Join a worker thread that has already reported its outcome.
async fn join_worker(id: &StreamId, handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else {
        return;
    };
    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!(stream = %id, "worker thread panicked"),
        Err(e) => error!(stream = %id, "failed to join worker thread: {}", e),
    }
}
