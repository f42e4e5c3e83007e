use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;

/// Channels per pixel. Every source decodes to packed RGB24.
pub const CHANNELS: usize = 3;

/// Decoded RGB24 frame.
///
/// The payload is immutable, so cloning a frame out of the buffer hands the
/// ranker a stable copy that later appends cannot touch.
#[derive(Clone)]
pub struct Frame {
    /// Row-major packed RGB pixels, `width * height * 3` bytes
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(sequence: u64, width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
            }),
            timestamp: Instant::now(),
        }
    }

    /// Frame filled with a single RGB colour.
    pub fn solid(sequence: u64, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data: Vec<u8> = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * CHANNELS)
            .collect();
        Self::new(sequence, width, height, data)
    }

    pub fn expected_len(&self) -> usize {
        self.meta.width as usize * self.meta.height as usize * CHANNELS
    }

    /// Sum of every channel intensity in the frame.
    pub fn brightness(&self) -> u64 {
        self.data.iter().map(|&v| u64::from(v)).sum()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}
