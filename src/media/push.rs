//! Push side: raw frames into an encoder publishing to a streaming server.

use std::sync::Arc;

use ffmpeg_cli::{hw, Accelerator, Supervisor};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::StreamError;
use crate::media::command::push_args;
use crate::media::queue::FrameQueue;
use crate::media::state::{wait_ready, PumpControl, PumpPhase, PumpStatus, Worker};
use crate::media::types::{PushConfig, RawFrame};

/// Consecutive successful writes after which the sink counts as pushing.
pub const CONFIRM_WRITES: u64 = 10;

/// Feeds raw frames to a supervised `ffmpeg` encoder at a fixed frame rate.
///
/// The worker writes one frame per tick. It takes the next queued frame when
/// there is one and repeats the previous frame otherwise, starting from a
/// black frame in the configured pixel format, so the output never stalls.
pub struct SinkPump {
    url: String,
    frame_size: usize,
    control: Arc<PumpControl>,
    queue: Arc<FrameQueue>,
    worker: Worker,
}

impl SinkPump {
    /// Starts the encoder and waits up to the startup timeout for it to
    /// accept frames. A sink that is not pushing by then keeps trying; the
    /// timeout is only recorded in [`status`](Self::status).
    pub fn open(config: PushConfig) -> Result<Self, StreamError> {
        let label = format!("push {}", config.url);
        let black = config.black_frame()?;
        let frame_size = black.len();
        log::info!(
            "{}: {}x{}@{} {} via {}",
            label,
            config.width,
            config.height,
            config.frame_rate,
            config.pixel_format,
            config.codec
        );

        let (control, ready) = PumpControl::new(label, config.options.reconnect);
        let accel = hw::negotiate(&config.accelerator);
        let queue = Arc::new(FrameQueue::new(config.options.queue_capacity));
        let startup_timeout = config.options.startup_timeout;
        let url = config.url.clone();

        let task = PushTask {
            config: Arc::new(config),
            accel,
            control: control.clone(),
            queue: queue.clone(),
            black,
        };
        let worker = Worker::spawn("push", control.clone(), move || task.run())?;

        if !wait_ready(&ready, startup_timeout) {
            log::warn!("{}: not pushing after {:?}", control.label(), startup_timeout);
            control.record_error(StreamError::StartupTimeout(startup_timeout));
        }

        Ok(Self {
            url,
            frame_size,
            control,
            queue,
            worker,
        })
    }

    /// Queues a frame for sending without blocking.
    ///
    /// The frame is dropped when the queue is full. A frame of the wrong size
    /// is rejected.
    pub fn put_frame(&self, frame: impl Into<RawFrame>) -> Result<(), StreamError> {
        let frame = frame.into();
        if frame.len() != self.frame_size {
            return Err(StreamError::Config(format!(
                "frame has {} bytes, expected {}",
                frame.len(),
                self.frame_size
            )));
        }
        if self.queue.try_push(frame).is_err() {
            log::trace!("{}: queue full, frame dropped", self.control.label());
        }
        Ok(())
    }

    /// Whether the encoder has accepted more than [`CONFIRM_WRITES`] frames in
    /// a row in its current cycle.
    pub fn is_pushing(&self) -> bool {
        self.control.is_live()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> PumpStatus {
        self.control.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<PumpStatus> {
        self.control.subscribe()
    }

    pub fn set_reconnect(&self, reconnect: bool) {
        self.control.set_reconnect(reconnect);
    }

    /// Stops the worker and tears down the encoder. Blocks until both are
    /// gone; calling it again is a no-op.
    pub fn release(&self) {
        self.control.set_reconnect(false);
        self.control.request_stop();
        self.worker.join();
        self.queue.close();
        self.queue.clear();
    }
}

impl Drop for SinkPump {
    fn drop(&mut self) {
        self.release();
    }
}

struct PushTask {
    config: Arc<PushConfig>,
    accel: Arc<dyn Accelerator>,
    control: Arc<PumpControl>,
    queue: Arc<FrameQueue>,
    black: RawFrame,
}

impl PushTask {
    async fn run(self) {
        // survives reconnects, so a new encoder starts from the last picture
        let mut held = self.black.clone();
        loop {
            let result = self.cycle(&mut held).await;
            if !self
                .control
                .next_cycle(result, self.config.options.reconnect_delay)
                .await
            {
                break;
            }
        }
        log::info!("{}: stopped", self.control.label());
    }

    async fn cycle(&self, held: &mut RawFrame) -> Result<(), StreamError> {
        let cycle = self.control.begin_cycle();
        self.control.set_phase(PumpPhase::Launching);

        let args = push_args(&self.config, self.accel.as_ref());
        let ffmpeg = self.config.options.toolchain.ffmpeg();
        log::debug!("{}: {} {:?}", self.control.label(), ffmpeg.display(), args);

        let mut sup = Supervisor::new(ffmpeg).with_grace(self.config.options.teardown_grace);
        sup.start(&args).map_err(|e| StreamError::launch(ffmpeg, e))?;
        log::info!("{}: cycle {} launched", self.control.label(), cycle);

        self.control.set_phase(PumpPhase::Streaming);
        let result = self.stream(&mut sup, held).await;
        sup.release().await;
        result
    }

    async fn stream(&self, sup: &mut Supervisor, held: &mut RawFrame) -> Result<(), StreamError> {
        let Some(stdin) = sup.stdin() else {
            return Err(StreamError::StreamEnded("encoder has no stdin".into()));
        };
        let cancel = self.control.cancel_token().clone();
        let mut ticker = tokio::time::interval(self.config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut written = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            if let Some(frame) = self.queue.try_pop() {
                *held = frame;
            }

            let frame = held.clone();
            let write = async {
                stdin.write_all(frame.as_ref()).await?;
                stdin.flush().await
            };
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = write => result,
            };
            if let Err(e) = result {
                let reason = if e.kind() == std::io::ErrorKind::BrokenPipe {
                    "encoder closed its input".to_string()
                } else {
                    e.to_string()
                };
                return Err(StreamError::StreamEnded(format!(
                    "write failed after {} frames: {}",
                    written, reason
                )));
            }

            written += 1;
            self.control.count_frame();
            if written == CONFIRM_WRITES + 1 {
                log::info!("{}: pushing", self.control.label());
                self.control.set_live(true);
            }
        }
    }
}

#[cfg(test)]
#[path = "push_test.rs"]
mod push_test;
