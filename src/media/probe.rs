use std::{fmt::Debug, path::PathBuf};

use ffmpeg_cli::{metadata, ProbeError, StreamDescriptor, Toolchain};

/// Source of stream metadata for a URL.
///
/// Called from a blocking context; implementations may block for as long as
/// the probe takes.
pub trait Prober: Send + Sync + Debug {
    fn probe(&self, url: &str) -> Result<StreamDescriptor, ProbeError>;
}

/// Probes video streams by running `ffprobe`.
#[derive(Clone, Debug)]
pub struct Ffprobe {
    program: PathBuf,
}

impl Ffprobe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl From<&Toolchain> for Ffprobe {
    fn from(toolchain: &Toolchain) -> Self {
        Self::new(toolchain.ffprobe())
    }
}

impl Prober for Ffprobe {
    fn probe(&self, url: &str) -> Result<StreamDescriptor, ProbeError> {
        metadata::probe(&self.program, url, false)
    }
}
