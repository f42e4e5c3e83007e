//! Synthetic frame source for `synthetic://` addresses.
//!
//! `synthetic://<name>?frames=N&start=B&step=S&end=eos|error&open=fail`
//!
//! Frame `i` is a uniform grey of level `start + i * step` (saturating), so
//! later frames are brighter when `step > 0`. Without `frames` the stream
//! never ends.

use tracing::info;

use crate::capture::frame::Frame;
use crate::capture::source::FrameStream;
use crate::error::SourceError;

#[derive(Debug, Clone)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndMode {
    Eos,
    Error,
}

#[derive(Debug)]
pub struct SyntheticStream {
    width: u32,
    height: u32,
    limit: Option<u64>,
    start: u8,
    step: u8,
    end: EndMode,
    sequence: u64,
}

impl SyntheticSource {
    pub const SCHEME: &'static str = "synthetic://";

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn open(&self, address: &str) -> Result<SyntheticStream, SourceError> {
        let rest = address
            .strip_prefix(Self::SCHEME)
            .ok_or_else(|| SourceError::open(address, "not a synthetic:// address"))?;
        let query = rest.split_once('?').map(|(_, q)| q).unwrap_or_default();

        let mut stream = SyntheticStream {
            width: self.width,
            height: self.height,
            limit: None,
            start: 0,
            step: 1,
            end: EndMode::Eos,
            sequence: 0,
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let bad = |what: &str| SourceError::open(address, format!("bad {what}: {value:?}"));
            match key {
                "frames" => stream.limit = Some(value.parse().map_err(|_| bad("frames"))?),
                "start" => stream.start = value.parse().map_err(|_| bad("start"))?,
                "step" => stream.step = value.parse().map_err(|_| bad("step"))?,
                "end" => {
                    stream.end = match value {
                        "eos" => EndMode::Eos,
                        "error" => EndMode::Error,
                        _ => return Err(bad("end")),
                    }
                }
                "open" if value == "fail" => {
                    return Err(SourceError::open(address, "connection refused"));
                }
                _ => return Err(SourceError::open(address, format!("unknown parameter {key:?}"))),
            }
        }

        info!(address, "connected (synthetic)");
        Ok(stream)
    }
}

impl FrameStream for SyntheticStream {
    fn read(&mut self) -> Result<Frame, SourceError> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return match self.end {
                EndMode::Eos => Err(SourceError::EndOfStream),
                EndMode::Error => Err(SourceError::Read("synthetic stream dropped".into())),
            };
        }

        let level = self
            .sequence
            .saturating_mul(u64::from(self.step))
            .saturating_add(u64::from(self.start))
            .min(u64::from(u8::MAX)) as u8;
        let frame = Frame::solid(self.sequence, self.width, self.height, [level; 3]);
        self.sequence += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_get_brighter() {
        let source = SyntheticSource::new(8, 8);
        let mut stream = source.open("synthetic://cam?frames=3&start=10&step=20").unwrap();

        let levels: Vec<u8> = (0..3).map(|_| stream.read().unwrap().data[0]).collect();
        assert_eq!(levels, vec![10, 30, 50]);
        assert!(matches!(stream.read(), Err(SourceError::EndOfStream)));
    }

    #[test]
    fn level_saturates() {
        let source = SyntheticSource::new(2, 2);
        let mut stream = source.open("synthetic://cam?start=250&step=100").unwrap();
        stream.read().unwrap();
        assert_eq!(stream.read().unwrap().data[0], 255);
    }

    #[test]
    fn end_error_reports_read_failure() {
        let source = SyntheticSource::new(2, 2);
        let mut stream = source.open("synthetic://cam?frames=0&end=error").unwrap();
        assert!(matches!(stream.read(), Err(SourceError::Read(_))));
    }

    #[test]
    fn open_failure_and_bad_parameters() {
        let source = SyntheticSource::new(2, 2);
        assert!(source.open("synthetic://cam?open=fail").is_err());
        assert!(source.open("synthetic://cam?frames=lots").is_err());
        assert!(source.open("synthetic://cam?colour=red").is_err());
        assert!(source.open("rtsp://cam").is_err());
    }
}
