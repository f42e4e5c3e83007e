//! Bounded rolling window of captured frames for one stream

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use crate::capture::Frame;

/// Frames retained per stream.
pub const BUFFER_CAPACITY: usize = 100;

/// Ring buffer shared between a capture worker (writer) and the supervisor
/// (reader). Every access goes through one mutex, so a snapshot never sees a
/// half-applied push.
pub struct StreamBuffer {
    inner: Mutex<Inner>,

    /// Statistics
    stats: CachePadded<Stats>,
}

struct Inner {
    ring: HeapRb<Frame>,
    sealed: bool,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_evicted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub frames_written: u64,
    pub frames_evicted: u64,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    /// # Panics
    /// If `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: HeapRb::new(capacity),
                sealed: false,
            }),
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame, dropping the oldest one when full.
    ///
    /// Returns `false` once the buffer has been sealed by [`drain`](Self::drain).
    pub fn push(&self, frame: Frame) -> bool {
        let mut inner = self.lock();
        if inner.sealed {
            return false;
        }

        if inner.ring.push_overwrite(frame).is_some() {
            self.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("lumasheet_frames_evicted").increment(1);
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Consistent copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.lock().ring.iter().cloned().collect()
    }

    /// Seal the buffer against further pushes and take the final snapshot.
    pub fn drain(&self) -> Vec<Frame> {
        let mut inner = self.lock();
        inner.sealed = true;
        inner.ring.iter().cloned().collect()
    }

    /// Release all retained frames.
    pub fn clear(&self) {
        self.lock().ring.clear();
    }

    /// Capture time of the newest retained frame.
    pub fn newest_capture(&self) -> Option<Instant> {
        self.lock().ring.iter().last().map(|frame| frame.timestamp)
    }

    pub fn len(&self) -> usize {
        self.lock().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            frames_written: self.stats.frames_written.load(Ordering::Relaxed),
            frames_evicted: self.stats.frames_evicted.load(Ordering::Relaxed),
        }
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, SharedString, Unit};

    fn frame(seq: u64) -> Frame {
        Frame::solid(seq, 2, 2, [seq as u8; 3])
    }

    fn sequences(frames: &[Frame]) -> Vec<u64> {
        frames.iter().map(|f| f.meta.sequence).collect()
    }

    #[test]
    fn evicts_oldest_first_at_capacity() {
        let buffer = StreamBuffer::new();
        for seq in 0..130 {
            assert!(buffer.push(frame(seq)));
            assert!(buffer.len() <= BUFFER_CAPACITY);
        }

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), BUFFER_CAPACITY);
        assert_eq!(sequences(&snapshot), (30..130).collect::<Vec<_>>());
        assert_eq!(
            buffer.stats(),
            BufferStats {
                frames_written: 130,
                frames_evicted: 30
            }
        );
    }

    #[test]
    fn snapshot_is_detached_from_later_pushes() {
        let buffer = StreamBuffer::with_capacity(3);
        buffer.push(frame(0));
        buffer.push(frame(1));

        let snapshot = buffer.snapshot();
        buffer.push(frame(2));
        buffer.push(frame(3));

        assert_eq!(sequences(&snapshot), vec![0, 1]);
        assert_eq!(sequences(&buffer.snapshot()), vec![1, 2, 3]);
    }

    #[test]
    fn drain_seals_buffer() {
        let buffer = StreamBuffer::with_capacity(4);
        buffer.push(frame(0));

        let last = buffer.drain();
        assert_eq!(sequences(&last), vec![0]);
        assert!(buffer.is_sealed());
        assert!(!buffer.push(frame(1)));
        assert_eq!(buffer.len(), 1);

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn newest_capture_tracks_last_push() {
        let buffer = StreamBuffer::with_capacity(2);
        assert!(buffer.newest_capture().is_none());

        let first = frame(0);
        let second = frame(1);
        let stamp = second.timestamp;
        buffer.push(first);
        buffer.push(second);
        assert_eq!(buffer.newest_capture(), Some(stamp));

        buffer.clear();
        assert!(buffer.newest_capture().is_none());
    }

    #[derive(Default)]
    struct Tally(AtomicU64);

    impl metrics::CounterFn for Tally {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::Relaxed);
        }

        fn absolute(&self, value: u64) {
            self.0.fetch_max(value, Ordering::Relaxed);
        }
    }

    /// Counts every counter by name.
    #[derive(Default)]
    struct CountingRecorder {
        counters: Mutex<HashMap<String, Arc<Tally>>>,
    }

    impl CountingRecorder {
        fn get(&self, name: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .get(name)
                .map_or(0, |tally| tally.0.load(Ordering::Relaxed))
        }
    }

    impl metrics::Recorder for CountingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let tally = self
                .counters
                .lock()
                .unwrap()
                .entry(key.name().to_string())
                .or_default()
                .clone();
            Counter::from_arc(tally)
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn evictions_reach_the_installed_recorder() {
        let recorder = CountingRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            let buffer = StreamBuffer::with_capacity(3);
            for seq in 0..5 {
                buffer.push(frame(seq));
            }
        });
        assert_eq!(recorder.get("lumasheet_frames_evicted"), 2);
    }

    #[test]
    fn concurrent_snapshots_are_never_torn() {
        let buffer = Arc::new(StreamBuffer::with_capacity(10));
        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for seq in 0..2_000 {
                    buffer.push(frame(seq));
                }
            })
        };

        for _ in 0..200 {
            let seqs = sequences(&buffer.snapshot());
            assert!(seqs.len() <= 10);
            assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
        }
        writer.join().unwrap();
        assert_eq!(buffer.len(), 10);
    }
}
