//! Process-level plumbing around the `ffmpeg` and `ffprobe` command line tools.
//!
//! Nothing here links against libav*; every operation runs one of the external
//! programs and talks to it through arguments, pipes and its text output.

pub mod config;
pub mod frame;
pub mod hw;
pub mod metadata;
pub mod process;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Toolchain, toolchain};
pub use frame::{FrameError, FrameShape, PixelFormat};
pub use hw::{Accelerator, NoAccel, NvidiaAccel};
pub use metadata::{ProbeError, StreamDescriptor, StreamInfo};
pub use process::{ProcessState, Supervisor};
