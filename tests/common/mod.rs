#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use lumasheet::capture::{Frame, FrameSource, FrameStream};
use lumasheet::pipeline::ContactSheet;
use lumasheet::{ImageSink, SinkError, SourceError, StreamId, SupervisorConfig};

pub const FRAME_WIDTH: u32 = 6;
pub const FRAME_HEIGHT: u32 = 4;

/// Grey level of scripted frame `i`.
pub fn level(i: usize) -> u8 {
    (10 + 20 * i).min(255) as u8
}

/// Scripted source: `frames` frames getting brighter, then a stall until
/// [`release`](FakeSource::release), then end of stream (or a read error).
///
/// Addresses starting with `fail://` refuse to open.
#[derive(Clone)]
pub struct FakeSource {
    frames: usize,
    fail_at_end: bool,
    first_open_delay: Arc<Mutex<Option<Duration>>>,
    released: Arc<AtomicBool>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            fail_at_end: false,
            first_open_delay: Arc::new(Mutex::new(None)),
            released: Arc::new(AtomicBool::new(false)),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn endless() -> Self {
        Self::new(usize::MAX)
    }

    pub fn failing_at_end(mut self) -> Self {
        self.fail_at_end = true;
        self
    }

    /// Block the next `open` call for `delay`; later opens are immediate.
    pub fn slow_first_open(self, delay: Duration) -> Self {
        *self.first_open_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Let stalled streams finish.
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

pub struct FakeStream {
    next: usize,
    frames: usize,
    fail_at_end: bool,
    released: Arc<AtomicBool>,
    closed: Arc<AtomicUsize>,
}

impl FrameSource for FakeSource {
    type Stream = FakeStream;

    fn open(&self, address: &str) -> Result<FakeStream, SourceError> {
        let delay = self.first_open_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if address.starts_with("fail://") {
            return Err(SourceError::open(address, "connection refused"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeStream {
            next: 0,
            frames: self.frames,
            fail_at_end: self.fail_at_end,
            released: self.released.clone(),
            closed: self.closed.clone(),
        })
    }
}

impl FrameStream for FakeStream {
    fn read(&mut self) -> Result<Frame, SourceError> {
        if self.next < self.frames {
            let i = self.next;
            self.next += 1;
            if self.frames == usize::MAX {
                thread::sleep(Duration::from_millis(1));
            }
            return Ok(Frame::solid(i as u64, FRAME_WIDTH, FRAME_HEIGHT, [level(i); 3]));
        }

        // Stall like a live source with nothing new to decode
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.released.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        if self.fail_at_end {
            Err(SourceError::Read("connection reset".into()))
        } else {
            Err(SourceError::EndOfStream)
        }
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Keeps every saved sheet in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    pub saved: Arc<Mutex<Vec<(StreamId, RgbImage)>>>,
}

impl MemorySink {
    pub fn last(&self) -> Option<(StreamId, RgbImage)> {
        self.saved.lock().unwrap().last().cloned()
    }
}

impl ImageSink for MemorySink {
    fn save(&self, key: &StreamId, sheet: &ContactSheet) -> Result<PathBuf, SinkError> {
        self.saved
            .lock()
            .unwrap()
            .push((key.clone(), sheet.image().clone()));
        Ok(PathBuf::from(format!("memory/{key}.jpg")))
    }
}

pub fn supervisor_config(stop_timeout_secs: u64) -> SupervisorConfig {
    SupervisorConfig {
        open_timeout_secs: 5,
        stop_timeout_secs,
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
