use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ffmpeg_cli::{ProbeError, StreamDescriptor, StreamInfo, Toolchain};

use crate::media::probe::Prober;
use crate::media::state::PumpStatus;

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Writes an executable `/bin/sh` script named `name` into `dir`.
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> anyhow::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Toolchain whose ffmpeg is the script `body`.
pub(crate) fn fake_ffmpeg(dir: &Path, body: &str) -> anyhow::Result<Toolchain> {
    let ffmpeg = write_script(dir, "ffmpeg", body)?;
    Ok(Toolchain::new(ffmpeg, dir.join("ffprobe")))
}

/// Prober answering with a fixed video stream for the first `successes`
/// calls. Later calls fail, or answer with the `later` stream if one is set.
#[derive(Debug)]
pub(crate) struct StubProber {
    descriptor: StreamDescriptor,
    later: Option<StreamDescriptor>,
    successes: usize,
    calls: AtomicUsize,
}

fn video_stream(codec: &str, width: u32, height: u32) -> StreamDescriptor {
    StreamDescriptor::new(vec![StreamInfo {
        index: 0,
        codec_type: Some("video".to_string()),
        codec_name: codec.to_string(),
        width,
        height,
        avg_frame_rate: "25/1".to_string(),
    }])
}

impl StubProber {
    pub fn video(codec: &str, width: u32, height: u32) -> Self {
        Self {
            descriptor: video_stream(codec, width, height),
            later: None,
            successes: usize::MAX,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(mut self, successes: usize) -> Self {
        self.successes = successes;
        self
    }

    /// Once the successes are used up, report this geometry instead of failing.
    pub fn then_video(mut self, width: u32, height: u32) -> Self {
        let codec = self
            .descriptor
            .video()
            .map(|v| v.codec_name.clone())
            .unwrap_or_default();
        self.later = Some(video_stream(&codec, width, height));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Prober for StubProber {
    fn probe(&self, url: &str) -> Result<StreamDescriptor, ProbeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.successes {
            Ok(self.descriptor.clone())
        } else if let Some(later) = &self.later {
            Ok(later.clone())
        } else {
            Err(ProbeError::Failed {
                url: url.to_string(),
                diagnostic: "Connection refused".to_string(),
            })
        }
    }
}

/// Polls `status` until `done` holds or `timeout` passes.
pub(crate) fn wait_for(
    timeout: Duration,
    status: impl Fn() -> PumpStatus,
    done: impl Fn(&PumpStatus) -> bool,
) -> PumpStatus {
    let deadline = Instant::now() + timeout;
    loop {
        let current = status();
        if done(&current) || Instant::now() >= deadline {
            return current;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
