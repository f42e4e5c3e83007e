//! Frame source contract and scheme dispatch.

use std::time::Duration;

use tracing::debug;

use crate::capture::frame::Frame;
use crate::capture::synthetic::{SyntheticSource, SyntheticStream};
use crate::error::SourceError;

/// Opens decoded-frame streams for stream addresses.
pub trait FrameSource: Send + Sync + 'static {
    type Stream: FrameStream;

    fn open(&self, address: &str) -> Result<Self::Stream, SourceError>;
}

/// An open stream handle.
pub trait FrameStream: Send + 'static {
    /// Next decoded frame. `EndOfStream` and `Read` both end capture.
    fn read(&mut self) -> Result<Frame, SourceError>;

    /// Release the underlying handle. Called exactly once, from [`SourceGuard`].
    fn close(&mut self) {}
}

/// Owns an open stream and closes it on every exit path.
pub struct SourceGuard<S: FrameStream> {
    stream: S,
    address: String,
}

impl<S: FrameStream> SourceGuard<S> {
    pub fn new(stream: S, address: impl Into<String>) -> Self {
        Self {
            stream,
            address: address.into(),
        }
    }

    pub fn read(&mut self) -> Result<Frame, SourceError> {
        self.stream.read()
    }
}

impl<S: FrameStream> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        debug!(address = %self.address, "closing frame source");
        self.stream.close();
    }
}

/// Production source: picks a backend from the address scheme.
#[derive(Debug, Clone)]
pub struct StreamSource {
    synthetic: SyntheticSource,
    read_timeout: Duration,
}

impl StreamSource {
    pub fn new(synthetic: SyntheticSource, read_timeout: Duration) -> Self {
        Self {
            synthetic,
            read_timeout,
        }
    }
}

pub enum StreamBackend {
    Synthetic(SyntheticStream),
    #[cfg(feature = "gstreamer-pipeline")]
    Gstreamer(crate::capture::gst_capture::GstStream),
}

impl FrameSource for StreamSource {
    type Stream = StreamBackend;

    fn open(&self, address: &str) -> Result<Self::Stream, SourceError> {
        if address.starts_with(SyntheticSource::SCHEME) {
            return self.synthetic.open(address).map(StreamBackend::Synthetic);
        }

        #[cfg(feature = "gstreamer-pipeline")]
        {
            crate::capture::gst_capture::GstStream::open(address, self.read_timeout)
                .map(StreamBackend::Gstreamer)
        }
        #[cfg(not(feature = "gstreamer-pipeline"))]
        {
            let _ = self.read_timeout;
            Err(SourceError::open(
                address,
                "network streams require the gstreamer-pipeline feature",
            ))
        }
    }
}

impl FrameStream for StreamBackend {
    fn read(&mut self) -> Result<Frame, SourceError> {
        match self {
            StreamBackend::Synthetic(stream) => stream.read(),
            #[cfg(feature = "gstreamer-pipeline")]
            StreamBackend::Gstreamer(stream) => stream.read(),
        }
    }

    fn close(&mut self) {
        match self {
            StreamBackend::Synthetic(stream) => stream.close(),
            #[cfg(feature = "gstreamer-pipeline")]
            StreamBackend::Gstreamer(stream) => stream.close(),
        }
    }
}
