//! GStreamer-backed network stream decoding (rtsp, http, file URIs)

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::capture::frame::{Frame, CHANNELS};
use crate::capture::source::FrameStream;
use crate::error::SourceError;

/// Decoding pipeline for a single stream address
pub struct GstStream {
    address: String,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    read_timeout: Duration,
    sequence: u64,
}

impl GstStream {
    /// Build the pipeline and bring it to Playing.
    pub fn open(address: &str, read_timeout: Duration) -> Result<Self, SourceError> {
        gst::init().map_err(|e| SourceError::open(address, format!("gstreamer init: {e}")))?;

        let pipeline_str = Self::build_pipeline_string(address);
        debug!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| SourceError::open(address, e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| SourceError::open(address, "failed to create pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| SourceError::open(address, "appsink element missing"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| SourceError::open(address, "appsink element has unexpected type"))?;

        // Keep only the newest decoded frame; the worker samples at its own cadence
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 1u32);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        let mut stream = Self {
            address: address.to_string(),
            pipeline,
            appsink,
            read_timeout,
            sequence: 0,
        };
        stream.start()?;
        Ok(stream)
    }

    fn build_pipeline_string(address: &str) -> String {
        format!(
            "uridecodebin uri=\"{}\" ! \
             videoconvert ! \
             video/x-raw,format=RGB ! \
             appsink name=appsink",
            address
        )
    }

    /// On failure the pipeline is left for `Drop` to tear down.
    fn start(&mut self) -> Result<(), SourceError> {
        if let Err(e) = self.pipeline.set_state(gst::State::Playing) {
            let reason = self.poll_bus().unwrap_or_else(|| format!("{e:?}"));
            return Err(SourceError::open(&self.address, reason));
        }

        let timeout = gst::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        let (state_change, _, _) = self.pipeline.state(Some(timeout));
        if let Err(e) = state_change {
            let reason = self.poll_bus().unwrap_or_else(|| format!("{e:?}"));
            return Err(SourceError::open(&self.address, reason));
        }

        info!(address = %self.address, "connected");
        Ok(())
    }

    fn stop_pipeline(&self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(address = %self.address, "failed to stop pipeline: {:?}", e);
        }
    }

    /// Drain pending bus messages, returning the first error or EOS text.
    fn poll_bus(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let mut failure = None;
        while let Some(message) = bus.timed_pop(gst::ClockTime::ZERO) {
            use gst::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    failure.get_or_insert_with(|| {
                        format!(
                            "{} ({})",
                            err.error(),
                            err.debug().map(|d| d.to_string()).unwrap_or_default()
                        )
                    });
                }
                MessageView::Eos(..) => {
                    failure.get_or_insert_with(|| "end of stream".to_string());
                }
                _ => {}
            }
        }
        failure
    }
}

impl FrameStream for GstStream {
    fn read(&mut self) -> Result<Frame, SourceError> {
        if let Some(reason) = self.poll_bus() {
            if self.appsink.is_eos() {
                return Err(SourceError::EndOfStream);
            }
            return Err(SourceError::Read(reason));
        }

        let timeout = gst::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Err(SourceError::EndOfStream);
            }
            return Err(SourceError::Read(format!(
                "no frame within {:?}",
                self.read_timeout
            )));
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        let frame = Frame::new(self.sequence, width, height, pixels);
        self.sequence += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        self.stop_pipeline();
    }
}

impl Drop for GstStream {
    fn drop(&mut self) {
        self.stop_pipeline();
    }
}

/// Copy a sample into tightly packed RGB rows.
fn sample_to_pixels(sample: &gst::Sample) -> Result<(Vec<u8>, u32, u32), SourceError> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| SourceError::Read("sample contains no buffer".into()))?;
    let caps = sample
        .caps()
        .ok_or_else(|| SourceError::Read("sample has no caps".into()))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|_| SourceError::Read("failed to parse video info from caps".into()))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * CHANNELS;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|_| SourceError::Read("failed to map buffer".into()))?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let chunk = data
            .get(start..start + row_bytes)
            .ok_or_else(|| SourceError::Read("buffer row out of bounds".into()))?;
        pixels.extend_from_slice(chunk);
    }
    Ok((pixels, width, height))
}
