use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

/// Connect timeout handed to `ffprobe -timeout`.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a terminated process gets to exit before it is killed.
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Locations of the external programs this crate drives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toolchain {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    nvidia_smi: PathBuf,
}

impl Toolchain {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            nvidia_smi: PathBuf::from("nvidia-smi"),
        }
    }

    /// Program names from `VIDEOSTREAM_FFMPEG`, `VIDEOSTREAM_FFPROBE` and
    /// `VIDEOSTREAM_NVIDIA_SMI`, falling back to whatever is on `PATH`.
    pub fn from_env() -> Self {
        let lookup = |key: &str, default: &str| {
            std::env::var_os(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| OsString::from(default))
        };
        Self {
            ffmpeg: lookup("VIDEOSTREAM_FFMPEG", "ffmpeg").into(),
            ffprobe: lookup("VIDEOSTREAM_FFPROBE", "ffprobe").into(),
            nvidia_smi: lookup("VIDEOSTREAM_NVIDIA_SMI", "nvidia-smi").into(),
        }
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe(&self) -> &Path {
        &self.ffprobe
    }

    pub fn nvidia_smi(&self) -> &Path {
        &self.nvidia_smi
    }

    pub fn with_ffmpeg(mut self, ffmpeg: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self
    }

    pub fn with_ffprobe(mut self, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffprobe = ffprobe.into();
        self
    }

    pub fn with_nvidia_smi(mut self, nvidia_smi: impl Into<PathBuf>) -> Self {
        self.nvidia_smi = nvidia_smi.into();
        self
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        toolchain().clone()
    }
}

/// Process-wide toolchain, read from the environment on first use.
pub fn toolchain() -> &'static Toolchain {
    static TOOLCHAIN: LazyLock<Toolchain> = LazyLock::new(Toolchain::from_env);
    &TOOLCHAIN
}

/// Formats a duration the way ffmpeg's `-timeout`/`-rw_timeout` expect it.
pub fn micros_arg(duration: Duration) -> String {
    duration.as_micros().to_string()
}
