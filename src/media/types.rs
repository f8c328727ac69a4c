use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ffmpeg_cli::{hw, Accelerator, PixelFormat, Toolchain};

use crate::error::StreamError;
use crate::media::probe::{Ffprobe, Prober};
use crate::media::queue::DEFAULT_CAPACITY;

/// One raw video frame, laid out as the configured pixel format dictates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawFrame {
    data: Bytes,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl From<Vec<u8>> for RawFrame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<Bytes> for RawFrame {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl AsRef<[u8]> for RawFrame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Display for RawFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawFrame {{ data: {} }}", self.data.len())
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Settings shared by every pump kind.
#[derive(Clone, Debug)]
pub struct PumpOptions {
    pub toolchain: Toolchain,
    /// Start a new probe/launch cycle after the stream fails.
    pub reconnect: bool,
    /// How long construction waits for the first confirmed frame.
    pub startup_timeout: Duration,
    /// Pause between a failed cycle and the next probe.
    pub reconnect_delay: Duration,
    /// Grace period between terminate and kill on teardown.
    pub teardown_grace: Duration,
    pub queue_capacity: usize,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            toolchain: Toolchain::default(),
            reconnect: false,
            startup_timeout: Duration::from_secs(9),
            reconnect_delay: Duration::from_secs(1),
            teardown_grace: ffmpeg_cli::config::TEARDOWN_GRACE,
            queue_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl PumpOptions {
    fn validate(&self) -> Result<(), StreamError> {
        if self.queue_capacity == 0 {
            return Err(StreamError::Config("queue capacity must be positive".into()));
        }
        if self.startup_timeout.is_zero() {
            return Err(StreamError::Config("startup timeout must be positive".into()));
        }
        Ok(())
    }
}

fn require_url(kind: &str, url: &str) -> Result<(), StreamError> {
    if url.trim().is_empty() {
        return Err(StreamError::Config(format!("{} url is empty", kind)));
    }
    Ok(())
}

/// Configuration of a [`SourcePump`](crate::media::pull::SourcePump).
#[derive(Clone, Debug)]
pub struct PullConfig {
    pub url: String,
    pub pixel_format: PixelFormat,
    pub accelerator: Arc<dyn Accelerator>,
    pub prober: Arc<dyn Prober>,
    pub options: PumpOptions,
}

impl PullConfig {
    pub fn builder(url: impl Into<String>) -> PullConfigBuilder {
        PullConfigBuilder {
            url: url.into(),
            pixel_format: PixelFormat::default(),
            accelerator: None,
            prober: None,
            options: PumpOptions::default(),
        }
    }
}

pub struct PullConfigBuilder {
    url: String,
    pixel_format: PixelFormat,
    accelerator: Option<Arc<dyn Accelerator>>,
    prober: Option<Arc<dyn Prober>>,
    options: PumpOptions,
}

impl PullConfigBuilder {
    pub fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.options.reconnect = reconnect;
        self
    }

    /// Hardware profile to try; falls back to software when unavailable.
    pub fn accelerator(mut self, accelerator: Arc<dyn Accelerator>) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    /// Replaces the default `ffprobe` based prober.
    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn toolchain(mut self, toolchain: Toolchain) -> Self {
        self.options.toolchain = toolchain;
        self
    }

    pub fn options(mut self, options: PumpOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<PullConfig, StreamError> {
        require_url("source", &self.url)?;
        self.options.validate()?;
        Ok(PullConfig {
            prober: self
                .prober
                .unwrap_or_else(|| Arc::new(Ffprobe::from(&self.options.toolchain))),
            accelerator: self.accelerator.unwrap_or_else(hw::no_accel),
            url: self.url,
            pixel_format: self.pixel_format,
            options: self.options,
        })
    }
}

/// Configuration of a [`SinkPump`](crate::media::push::SinkPump).
#[derive(Clone, Debug)]
pub struct PushConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub pixel_format: PixelFormat,
    /// Codec family, resolved through the accelerator ("h264", "hevc", ...).
    pub codec: String,
    pub accelerator: Arc<dyn Accelerator>,
    /// ffmpeg `-rw_timeout` for the output connection.
    pub rw_timeout: Duration,
    pub options: PumpOptions,
}

impl PushConfig {
    pub const MAX_FRAME_RATE: u32 = 120;

    pub fn builder(url: impl Into<String>, width: u32, height: u32, frame_rate: u32) -> PushConfigBuilder {
        PushConfigBuilder {
            url: url.into(),
            width,
            height,
            frame_rate,
            pixel_format: PixelFormat::default(),
            codec: "h264".to_string(),
            accelerator: None,
            rw_timeout: Duration::from_secs(3),
            options: PumpOptions::default(),
        }
    }

    /// A black frame of the configured geometry, which is also the size every
    /// input frame must have.
    pub fn black_frame(&self) -> Result<RawFrame, StreamError> {
        Ok(RawFrame::new(
            self.pixel_format.black_frame(self.width, self.height)?,
        ))
    }

    /// Time between two written frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }
}

pub struct PushConfigBuilder {
    url: String,
    width: u32,
    height: u32,
    frame_rate: u32,
    pixel_format: PixelFormat,
    codec: String,
    accelerator: Option<Arc<dyn Accelerator>>,
    rw_timeout: Duration,
    options: PumpOptions,
}

impl PushConfigBuilder {
    pub fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.options.reconnect = reconnect;
        self
    }

    pub fn accelerator(mut self, accelerator: Arc<dyn Accelerator>) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    pub fn rw_timeout(mut self, rw_timeout: Duration) -> Self {
        self.rw_timeout = rw_timeout;
        self
    }

    pub fn toolchain(mut self, toolchain: Toolchain) -> Self {
        self.options.toolchain = toolchain;
        self
    }

    pub fn options(mut self, options: PumpOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<PushConfig, StreamError> {
        require_url("sink", &self.url)?;
        if self.frame_rate == 0 || self.frame_rate >= PushConfig::MAX_FRAME_RATE {
            return Err(StreamError::Config(format!(
                "frame rate must be between 1 and {}, got {}",
                PushConfig::MAX_FRAME_RATE - 1,
                self.frame_rate
            )));
        }
        // also rejects zero and odd 4:2:0 geometry
        self.pixel_format.frame_shape(self.width, self.height)?;
        if self.codec.trim().is_empty() {
            return Err(StreamError::Config("codec is empty".into()));
        }
        self.options.validate()?;

        Ok(PushConfig {
            url: self.url,
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            pixel_format: self.pixel_format,
            codec: self.codec,
            accelerator: self.accelerator.unwrap_or_else(hw::no_accel),
            rw_timeout: self.rw_timeout,
            options: self.options,
        })
    }
}

/// How a [`Relay`](crate::media::relay::Relay) treats the video it forwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEncoding {
    /// Remux packets as they are (`-c:v copy`).
    Copy,
    /// Re-encode with this codec family, resolved through the accelerator.
    Encode(String),
}

impl Default for RelayEncoding {
    fn default() -> Self {
        RelayEncoding::Encode("h264".to_string())
    }
}

/// Configuration of a [`Relay`](crate::media::relay::Relay).
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub source_url: String,
    pub sink_url: String,
    pub encoding: RelayEncoding,
    pub accelerator: Arc<dyn Accelerator>,
    pub prober: Arc<dyn Prober>,
    pub options: PumpOptions,
}

impl RelayConfig {
    pub fn builder(source_url: impl Into<String>, sink_url: impl Into<String>) -> RelayConfigBuilder {
        RelayConfigBuilder {
            source_url: source_url.into(),
            sink_url: sink_url.into(),
            encoding: RelayEncoding::default(),
            accelerator: None,
            prober: None,
            options: PumpOptions::default(),
        }
    }
}

pub struct RelayConfigBuilder {
    source_url: String,
    sink_url: String,
    encoding: RelayEncoding,
    accelerator: Option<Arc<dyn Accelerator>>,
    prober: Option<Arc<dyn Prober>>,
    options: PumpOptions,
}

impl RelayConfigBuilder {
    pub fn encoding(mut self, encoding: RelayEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.options.reconnect = reconnect;
        self
    }

    pub fn accelerator(mut self, accelerator: Arc<dyn Accelerator>) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn toolchain(mut self, toolchain: Toolchain) -> Self {
        self.options.toolchain = toolchain;
        self
    }

    pub fn options(mut self, options: PumpOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<RelayConfig, StreamError> {
        require_url("source", &self.source_url)?;
        require_url("sink", &self.sink_url)?;
        if let RelayEncoding::Encode(codec) = &self.encoding {
            if codec.trim().is_empty() {
                return Err(StreamError::Config("codec is empty".into()));
            }
        }
        self.options.validate()?;

        Ok(RelayConfig {
            prober: self
                .prober
                .unwrap_or_else(|| Arc::new(Ffprobe::from(&self.options.toolchain))),
            accelerator: self.accelerator.unwrap_or_else(hw::no_accel),
            source_url: self.source_url,
            sink_url: self.sink_url,
            encoding: self.encoding,
            options: self.options,
        })
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
