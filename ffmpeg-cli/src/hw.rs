//! Hardware-accelerated codec discovery.
//!
//! Each backend is an [`Accelerator`] that knows which ffmpeg arguments enable it
//! and which codec names replace the software ones. Capability probing runs the
//! external tools once per profile and caches the outcome; any failure along the
//! way leaves the profile unavailable and callers fall back to software codecs.

use std::{
    collections::BTreeMap,
    ffi::OsStr,
    fmt::Debug,
    path::Path,
    process::{Command, Stdio},
    sync::{Arc, LazyLock, Mutex, PoisonError},
};

use anyhow::{Context, bail};

use crate::config::Toolchain;

/// What a capability probe found out about one backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capability {
    pub available: bool,
    /// codec -> accelerated encoder, e.g. `h264 -> h264_nvenc`
    pub encoders: BTreeMap<String, String>,
    /// codec -> accelerated decoder, e.g. `h264 -> h264_cuvid`
    pub decoders: BTreeMap<String, String>,
}

impl Capability {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// A hardware-backed codec family.
pub trait Accelerator: Send + Sync + Debug {
    /// Registry name of the profile.
    fn name(&self) -> &'static str;

    /// Input options that enable hardware decoding (`-hwaccel ...`).
    fn hwaccel_args(&self) -> Vec<String>;

    /// Options appended after `-c:v <encoder>`.
    fn encoder_params(&self) -> Vec<String>;

    /// Probe result, computed on first use and cached afterwards.
    fn capability(&self) -> Capability;

    /// False only for the software profile.
    fn is_hardware(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.capability().available
    }

    /// Accelerated decoder for `codec`, or `codec` itself when the profile is
    /// unavailable or has no mapping.
    fn resolve_decoder(&self, codec: &str) -> String {
        resolve(&self.capability(), codec, |c| &c.decoders)
    }

    /// Accelerated encoder for `codec`, or `codec` itself when the profile is
    /// unavailable or has no mapping.
    fn resolve_encoder(&self, codec: &str) -> String {
        resolve(&self.capability(), codec, |c| &c.encoders)
    }
}

fn resolve(
    capability: &Capability,
    codec: &str,
    map: impl Fn(&Capability) -> &BTreeMap<String, String>,
) -> String {
    if !capability.available {
        return codec.to_string();
    }
    map(capability)
        .get(codec)
        .cloned()
        .unwrap_or_else(|| codec.to_string())
}

/// Memoized probe result with a test-only reset.
#[derive(Debug)]
pub struct ProbeCache<T> {
    slot: Mutex<Option<T>>,
}

impl<T: Clone> ProbeCache<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Returns the cached value, running `probe` under the lock if there is none.
    pub fn get_or_probe(&self, probe: impl FnOnce() -> T) -> T {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = slot.as_ref() {
            return value.clone();
        }
        let value = probe();
        *slot = Some(value.clone());
        value
    }

    #[cfg(test)]
    pub fn reset(&self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<T: Clone> Default for ProbeCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------
// Software
// ------------------------------------------------------------------------

/// Software codecs, always available.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAccel;

impl NoAccel {
    const ENCODERS: [(&'static str, &'static str); 4] = [
        ("h264", "libx264"),
        ("hevc", "libx265"),
        ("vp9", "libvpx-vp9"),
        ("av1", "libaom-av1"),
    ];
}

impl Accelerator for NoAccel {
    fn name(&self) -> &'static str {
        "none"
    }

    fn hwaccel_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn encoder_params(&self) -> Vec<String> {
        ["-tune", "zerolatency", "-preset", "ultrafast"]
            .map(String::from)
            .to_vec()
    }

    fn capability(&self) -> Capability {
        let encoders = Self::ENCODERS
            .iter()
            .map(|(codec, encoder)| (codec.to_string(), encoder.to_string()))
            .collect();
        let decoders = Self::ENCODERS
            .iter()
            .map(|(codec, _)| (codec.to_string(), codec.to_string()))
            .collect();
        Capability {
            available: true,
            encoders,
            decoders,
        }
    }

    fn is_hardware(&self) -> bool {
        false
    }
}

// ------------------------------------------------------------------------
// NVIDIA
// ------------------------------------------------------------------------

/// NVENC/CUVID through `-hwaccel cuda`.
///
/// Available when `ffmpeg -encoders` lists at least one `_nvenc` encoder,
/// `ffmpeg -decoders` lists at least one `_cuvid` decoder and `nvidia-smi -L`
/// reports a GPU.
#[derive(Debug)]
pub struct NvidiaAccel {
    toolchain: Toolchain,
    codecs: ProbeCache<Option<Codecs>>,
    devices: ProbeCache<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Codecs {
    encoders: BTreeMap<String, String>,
    decoders: BTreeMap<String, String>,
}

impl NvidiaAccel {
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            toolchain,
            codecs: ProbeCache::new(),
            devices: ProbeCache::new(),
        }
    }

    /// Number of GPUs `nvidia-smi -L` lists, 0 if it cannot be run.
    pub fn device_count(&self) -> usize {
        self.devices.get_or_probe(|| {
            match run_capture(self.toolchain.nvidia_smi(), ["-L"]) {
                Ok(output) => count_device_headers(&output, "GPU "),
                Err(e) => {
                    log::debug!("nvidia device probe failed: {:#}", e);
                    0
                }
            }
        })
    }

    fn codecs(&self) -> Option<Codecs> {
        self.codecs.get_or_probe(|| match self.probe_codecs() {
            Ok(codecs) => codecs,
            Err(e) => {
                log::debug!("nvidia codec probe failed: {:#}", e);
                None
            }
        })
    }

    fn probe_codecs(&self) -> anyhow::Result<Option<Codecs>> {
        let ffmpeg = self.toolchain.ffmpeg();

        let encoders = parse_codec_listing(&run_capture(ffmpeg, ["-encoders"])?, "_nvenc");
        if encoders.is_empty() {
            return Ok(None);
        }
        let decoders = parse_codec_listing(&run_capture(ffmpeg, ["-decoders"])?, "_cuvid");
        if decoders.is_empty() {
            return Ok(None);
        }

        Ok(Some(Codecs { encoders, decoders }))
    }

    #[cfg(test)]
    pub(crate) fn reset(&self) {
        self.codecs.reset();
        self.devices.reset();
    }
}

impl Default for NvidiaAccel {
    fn default() -> Self {
        Self::new(Toolchain::default())
    }
}

impl Accelerator for NvidiaAccel {
    fn name(&self) -> &'static str {
        "nvidia"
    }

    fn hwaccel_args(&self) -> Vec<String> {
        vec!["-hwaccel".to_string(), "cuda".to_string()]
    }

    fn encoder_params(&self) -> Vec<String> {
        vec!["-preset".to_string(), "p1".to_string()]
    }

    fn capability(&self) -> Capability {
        // no point asking for devices when ffmpeg was built without nvenc
        let Some(codecs) = self.codecs() else {
            return Capability::unavailable();
        };
        if self.device_count() == 0 {
            return Capability::unavailable();
        }
        Capability {
            available: true,
            encoders: codecs.encoders,
            decoders: codecs.decoders,
        }
    }
}

// ------------------------------------------------------------------------
// Registry
// ------------------------------------------------------------------------

static NO_ACCEL: LazyLock<Arc<dyn Accelerator>> = LazyLock::new(|| Arc::new(NoAccel));
static NVIDIA: LazyLock<Arc<dyn Accelerator>> =
    LazyLock::new(|| Arc::new(NvidiaAccel::default()));

/// The shared software profile.
pub fn no_accel() -> Arc<dyn Accelerator> {
    NO_ACCEL.clone()
}

/// NVIDIA profile probing with the programs of `toolchain`.
///
/// The shared instance is returned for the process-wide toolchain; any other
/// toolchain gets a profile with its own capability cache.
pub fn nvidia(toolchain: &Toolchain) -> Arc<dyn Accelerator> {
    if toolchain == crate::config::toolchain() {
        return NVIDIA.clone();
    }
    Arc::new(NvidiaAccel::new(toolchain.clone()))
}

/// Process-wide profile for `name`, so every caller shares one capability cache.
/// These probe with the process-wide toolchain, see [`nvidia`] for others.
pub fn by_name(name: &str) -> Option<Arc<dyn Accelerator>> {
    match name.to_ascii_lowercase().as_str() {
        "none" | "cpu" => Some(no_accel()),
        "nvidia" | "cuda" => Some(NVIDIA.clone()),
        _ => None,
    }
}

/// Returns `accel` if it can be used, otherwise the software profile.
pub fn negotiate(accel: &Arc<dyn Accelerator>) -> Arc<dyn Accelerator> {
    if accel.is_available() {
        return accel.clone();
    }
    log::warn!(
        "accelerator {} is not available, falling back to software codecs",
        accel.name()
    );
    no_accel()
}

// ------------------------------------------------------------------------
// Tool output parsing
// ------------------------------------------------------------------------

/// Runs a program to completion and returns its stdout. Non-zero exit is an
/// error.
pub(crate) fn run_capture<I, S>(program: &Path, args: I) -> anyhow::Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .with_context(|| format!("failed to run {}", program.display()))?;
    if !output.status.success() {
        bail!("{} exited with {}", program.display(), output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Collects video codecs named `<base><suffix>` from `ffmpeg -encoders` or
/// `ffmpeg -decoders` output, keyed by the part before the first `_`.
///
/// Matching lines look like ` V....D h264_nvenc           NVIDIA NVENC H.264 encoder`.
pub fn parse_codec_listing(text: &str, suffix: &str) -> BTreeMap<String, String> {
    let mut found = BTreeMap::new();
    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        let (Some(flags), Some(name)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        if flags.len() != 6 || !flags.starts_with('V') {
            continue;
        }
        // the name must be followed by more text on the line
        if tokens.next().is_none() {
            continue;
        }
        let Some(base) = name.strip_suffix(suffix) else {
            continue;
        };
        if !(2..=8).contains(&base.len()) {
            continue;
        }
        let key = name.split('_').next().unwrap_or(name);
        found.insert(key.to_string(), name.to_string());
    }
    found
}

/// Number of lines starting with `prefix`, e.g. `GPU ` in `nvidia-smi -L` output.
pub fn count_device_headers(text: &str, prefix: &str) -> usize {
    text.lines().filter(|line| line.starts_with(prefix)).count()
}

#[cfg(test)]
#[path = "hw_test.rs"]
mod hw_test;
