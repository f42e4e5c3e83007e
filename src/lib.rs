//! Contact sheets of the brightest frames from live video streams.
//!
//! Counters are emitted through the [`metrics`] facade and stay no-ops until
//! the embedding application installs a recorder:
//!
//! - `lumasheet_frames_captured`: frames appended to a stream buffer
//! - `lumasheet_frames_evicted`: oldest frames dropped by a full buffer
//! - `lumasheet_finalize_insufficient`: streams that ended with too few frames
//! - `lumasheet_sheets_written`: contact sheets persisted by [`JpegDirSink`]

pub mod capture;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod stream_id;
pub mod supervisor;
pub mod worker;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameSource, FrameStream, StreamSource, SyntheticSource};
pub use error::{ConfigError, SinkError, SourceError, SupervisorError};
pub use pipeline::{compose, select_top_k, ContactSheet, StreamBuffer};
pub use sink::{ImageSink, JpegDirSink};
pub use stream_id::StreamId;
pub use supervisor::{ImageLocation, StreamStatus, StreamSupervisor};
pub use worker::{WorkerOutcome, WorkerState};

/// Prefix for environment overrides, e.g. `LUMASHEET__STORAGE__ROOT`.
pub const ENV_PREFIX: &str = "LUMASHEET";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LoggingConfig,
    /// Streams started when the daemon boots
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub default_interval_secs: f64,
    pub read_timeout_ms: u64,
    pub synthetic_width: u32,
    pub synthetic_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub open_timeout_secs: u64,
    /// `0` waits for workers indefinitely
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub address: String,
    #[serde(default)]
    pub interval_secs: Option<f64>,
    #[serde(default)]
    pub id: Option<StreamId>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 1.0,
            read_timeout_ms: 2_000,
            synthetic_width: 320,
            synthetic_height: 240,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("images"),
            jpeg_quality: 90,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            open_timeout_secs: 10,
            stop_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "lumasheet=info".to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl SupervisorConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Option<Duration> {
        (self.stop_timeout_secs > 0).then(|| Duration::from_secs(self.stop_timeout_secs))
    }
}

impl Config {
    /// Load defaults, then `path` (if any), then `LUMASHEET__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_interval = |secs: f64| secs.is_finite() && secs >= 0.0;

        if !valid_interval(self.capture.default_interval_secs) {
            return Err(ConfigError::Invalid(format!(
                "capture.default_interval_secs must be >= 0, got {}",
                self.capture.default_interval_secs
            )));
        }
        if self.capture.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.read_timeout_ms must be positive".into(),
            ));
        }
        if self.capture.synthetic_width == 0 || self.capture.synthetic_height == 0 {
            return Err(ConfigError::Invalid(
                "capture.synthetic_width/height must be positive".into(),
            ));
        }
        if !(1..=100).contains(&self.storage.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "storage.jpeg_quality must be within 1..=100, got {}",
                self.storage.jpeg_quality
            )));
        }
        if self.supervisor.open_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "supervisor.open_timeout_secs must be positive".into(),
            ));
        }
        for stream in &self.streams {
            if let Some(secs) = stream.interval_secs.filter(|s| !valid_interval(*s)) {
                return Err(ConfigError::Invalid(format!(
                    "stream {} has invalid interval {}",
                    stream.address, secs
                )));
            }
        }
        Ok(())
    }

    /// Frame source wired from the capture settings.
    pub fn stream_source(&self) -> StreamSource {
        StreamSource::new(
            SyntheticSource::new(self.capture.synthetic_width, self.capture.synthetic_height),
            self.capture.read_timeout(),
        )
    }

    /// JPEG sink wired from the storage settings.
    pub fn image_sink(&self) -> JpegDirSink {
        JpegDirSink::new(self.storage.root.clone(), self.storage.jpeg_quality)
    }
}
