//! Contact sheet persistence

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use tracing::info;

use crate::error::SinkError;
use crate::pipeline::ContactSheet;
use crate::stream_id::StreamId;

/// Receives finished contact sheets.
pub trait ImageSink: Send + Sync + 'static {
    /// Persist `sheet` under `key` and return where it went. Saving the same
    /// key again replaces the previous sheet.
    fn save(&self, key: &StreamId, sheet: &ContactSheet) -> Result<PathBuf, SinkError>;
}

/// Writes `<root>/<key>.jpg`.
#[derive(Debug, Clone)]
pub struct JpegDirSink {
    root: PathBuf,
    quality: u8,
}

impl JpegDirSink {
    pub fn new(root: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            root: root.into(),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &StreamId) -> PathBuf {
        self.root.join(format!("{key}.jpg"))
    }
}

impl ImageSink for JpegDirSink {
    fn save(&self, key: &StreamId, sheet: &ContactSheet) -> Result<PathBuf, SinkError> {
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;

        let path = self.path_for(key);
        // Encode next to the target and rename, so readers never see a partial JPEG
        let tmp = path.with_extension("jpg.partial");
        {
            let file = File::create(&tmp).map_err(io_err(&tmp))?;
            let mut writer = BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut writer, self.quality).encode_image(sheet.image())?;
            writer.flush().map_err(io_err(&tmp))?;
        }
        fs::rename(&tmp, &path).map_err(io_err(&path))?;

        metrics::counter!("lumasheet_sheets_written").increment(1);
        info!(stream = %key, path = %path.display(), "contact sheet saved");
        Ok(path)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError {
    let path = path.to_path_buf();
    move |source| SinkError::Io { path, source }
}
