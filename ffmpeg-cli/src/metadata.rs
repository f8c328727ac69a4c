//! Stream metadata through `ffprobe`.

use std::{
    ffi::OsString,
    path::Path,
    process::{Command, Stdio},
    time::Duration,
};

use serde::Deserialize;

use crate::config::{PROBE_TIMEOUT, micros_arg};

/// Per-stream record from `ffprobe -show_streams`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub index: usize,
    /// "video" | "audio" | ...
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// e.g. "30000/1001"
    #[serde(default)]
    pub avg_frame_rate: String,
}

impl StreamInfo {
    pub fn is_video(&self) -> bool {
        match self.codec_type.as_deref() {
            Some(kind) => kind == "video",
            None => self.width > 0 && self.height > 0,
        }
    }

    /// Average frame rate, `None` when ffprobe reports `0/0` or nothing.
    pub fn fps(&self) -> Option<f64> {
        let rate = self.avg_frame_rate.trim();
        let value = match rate.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.trim().parse().ok()?;
                let den: f64 = den.trim().parse().ok()?;
                if den == 0.0 {
                    return None;
                }
                num / den
            }
            None => rate.parse().ok()?,
        };
        (value.is_finite() && value > 0.0).then_some(value)
    }
}

/// Ordered streams of one probed source.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamDescriptor {
    #[serde(default)]
    streams: Vec<StreamInfo>,
}

impl StreamDescriptor {
    pub fn new(streams: Vec<StreamInfo>) -> Self {
        Self { streams }
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    /// First video stream.
    pub fn video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.is_video())
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("cannot run {program}: {reason}")]
    Unavailable { program: String, reason: String },
    #[error("probing {url} failed: {diagnostic}")]
    Failed { url: String, diagnostic: String },
    #[error("{url} has no video stream")]
    NoVideo { url: String },
    #[error("unreadable probe output for {url}: {reason}")]
    Malformed {
        url: String,
        reason: String,
        output: String,
    },
}

impl ProbeError {
    /// Raw text the failing command produced, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            ProbeError::Unavailable { reason, .. } => Some(reason),
            ProbeError::Failed { diagnostic, .. } => Some(diagnostic),
            ProbeError::Malformed { output, .. } => Some(output),
            ProbeError::NoVideo { .. } => None,
        }
    }
}

/// Arguments for probing `url`.
pub fn probe_args(url: &str, want_audio: bool, timeout: Duration) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-v".into(),
        "error".into(),
        "-timeout".into(),
        micros_arg(timeout).into(),
    ];
    if url.starts_with("rtsp://") {
        args.extend(["-rtsp_transport".into(), "tcp".into()]);
    }
    if !want_audio {
        args.extend(["-select_streams".into(), "v".into()]);
    }
    args.extend([
        "-print_format".into(),
        "json".into(),
        "-show_streams".into(),
        "-i".into(),
        url.into(),
    ]);
    args
}

/// Runs `ffprobe` against `url` and returns its streams.
///
/// Blocks for as long as ffprobe runs; the connect timeout bounds unreachable
/// network sources.
pub fn probe(ffprobe: &Path, url: &str, want_audio: bool) -> Result<StreamDescriptor, ProbeError> {
    let args = probe_args(url, want_audio, PROBE_TIMEOUT);
    log::debug!("probe: {} {:?}", ffprobe.display(), args);

    let output = Command::new(ffprobe)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ProbeError::Unavailable {
            program: ffprobe.display().to_string(),
            reason: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostic = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        return Err(ProbeError::Failed {
            url: url.to_string(),
            diagnostic: diagnostic.to_string(),
        });
    }

    parse_probe_output(url, &stdout)
}

/// Parses ffprobe's JSON, ignoring anything printed around it.
pub fn parse_probe_output(url: &str, text: &str) -> Result<StreamDescriptor, ProbeError> {
    let malformed = |reason: String| ProbeError::Malformed {
        url: url.to_string(),
        reason,
        output: text.to_string(),
    };

    let json = json_span(text).ok_or_else(|| malformed("no JSON object in output".to_string()))?;
    let descriptor: StreamDescriptor =
        serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;

    if descriptor.video().is_none() {
        return Err(ProbeError::NoVideo {
            url: url.to_string(),
        });
    }
    Ok(descriptor)
}

/// Slice from the first `{` to the last `}`.
pub fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Whether `url` is reachable and readable by ffprobe.
pub fn check_url(ffprobe: &Path, url: &str) -> bool {
    let status = Command::new(ffprobe)
        .args(["-v", "error", "-timeout"])
        .arg(micros_arg(PROBE_TIMEOUT))
        .arg("-i")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) => status.success(),
        Err(e) => {
            log::warn!("cannot run {}: {}", ffprobe.display(), e);
            false
        }
    }
}

/// Guesses from the URL whether it names a live stream rather than a file.
///
/// Container extensions win over protocol prefixes, anything else is a file.
pub fn is_stream(url: &str) -> bool {
    const FILE_SUFFIXES: [&str; 5] = ["mp4", "mkv", "flv", "avi", "mov"];
    const STREAM_PREFIXES: [&str; 8] = [
        "rtmp", "rtsp", "http", "https", "rtmps", "hls", "dash", "m3u8",
    ];

    let url = url.to_lowercase();
    if FILE_SUFFIXES.iter().any(|s| url.ends_with(s)) {
        return false;
    }
    STREAM_PREFIXES.iter().any(|p| url.starts_with(p))
}

#[cfg(test)]
#[path = "metadata_test.rs"]
mod metadata_test;
