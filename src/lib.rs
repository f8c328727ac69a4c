//! Video sources and sinks driven through the `ffmpeg` command line.
//!
//! [`SourcePump`] pulls decoded raw frames out of a file or network stream,
//! [`SinkPump`] pushes raw frames into an encoder for delivery to a streaming
//! server and [`Relay`] forwards one stream to another without touching frames.

pub mod error;
pub mod media;

pub use error::StreamError;
pub use ffmpeg_cli::{
    hw::{self, Accelerator},
    metadata::{check_url, is_stream},
    FrameShape, PixelFormat, ProbeError, StreamDescriptor, StreamInfo, Toolchain,
};
pub use media::{
    probe::{Ffprobe, Prober},
    pull::SourcePump,
    push::SinkPump,
    queue::{FrameQueue, PopError},
    relay::Relay,
    state::{PumpPhase, PumpStatus},
    types::{
        PullConfig, PullConfigBuilder, PumpOptions, PushConfig, PushConfigBuilder, RawFrame,
        RelayConfig, RelayConfigBuilder, RelayEncoding,
    },
};
