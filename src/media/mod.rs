//! Pumps: supervised ffmpeg processes with a background worker each
//!
//! Data Flow:
//! ```text
//!  source ──► ffmpeg (decode) ──stdout──► [SourcePump worker] ──► FrameQueue ──► read_frame()
//!
//!  put_frame() ──► FrameQueue ──► [SinkPump worker, paced] ──stdin──► ffmpeg (encode) ──► sink
//!
//!  source ──► ffmpeg (copy / re-encode) ──► sink                          [Relay worker]
//! ```
//!
//! Every worker runs the same cycle on its own thread:
//! probe ─► launch ─► stream ─► release ─► (reconnect ? probe : stopped)
//!
//! Status is published through a watch channel and never blocks the caller.

pub mod command;
pub mod probe;
pub mod pull;
pub mod push;
pub mod queue;
pub mod relay;
pub mod state;
pub mod types;

#[cfg(all(test, unix))]
pub(crate) mod testing;
