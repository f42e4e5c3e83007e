pub mod frame;
pub mod source;
pub mod synthetic;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;

pub use frame::{Frame, FrameMetadata};
pub use source::{FrameSource, FrameStream, SourceGuard, StreamSource};
pub use synthetic::SyntheticSource;
