//! Pull side: decoded raw frames out of a file or network stream.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use ffmpeg_cli::{hw, Accelerator, FrameShape, ProbeError, StreamDescriptor, Supervisor};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use crate::error::StreamError;
use crate::media::command::{pull_args, select_decoder};
use crate::media::queue::{FrameQueue, PopError};
use crate::media::state::{wait_ready, PumpControl, PumpPhase, PumpStatus, Worker};
use crate::media::types::{PullConfig, RawFrame};

/// Reads decoded frames from a source through a supervised `ffmpeg`.
///
/// Frames land in a small drop-oldest queue, so a slow reader always gets the
/// most recent ones. With reconnect enabled, a failed stream is probed and
/// launched again until [`release`](Self::release).
pub struct SourcePump {
    url: String,
    control: Arc<PumpControl>,
    queue: Arc<FrameQueue>,
    descriptor: Arc<Mutex<StreamDescriptor>>,
    config: Arc<PullConfig>,
    worker: Worker,
}

impl SourcePump {
    /// Probes the source and starts pulling.
    ///
    /// Fails when the source cannot be probed or its geometry does not fit the
    /// pixel format. If no frame arrives within the startup timeout the pump is
    /// released, the timeout is recorded in [`status`](Self::status) and the
    /// pump is still returned, reporting not open.
    pub fn open(config: PullConfig) -> Result<Self, StreamError> {
        let label = format!("pull {}", config.url);
        log::info!("{}: probing", label);

        let (control, ready) = PumpControl::new(label, config.options.reconnect);
        control.set_phase(PumpPhase::Probing);
        let descriptor = config.prober.probe(&config.url)?;
        frame_geometry(&config, &descriptor)?;

        let accel = hw::negotiate(&config.accelerator);
        let config = Arc::new(config);
        let queue = Arc::new(FrameQueue::new(config.options.queue_capacity));
        let shared = Arc::new(Mutex::new(descriptor.clone()));

        let task = PullTask {
            config: config.clone(),
            accel,
            control: control.clone(),
            queue: queue.clone(),
            descriptor: shared.clone(),
        };
        let worker = Worker::spawn("pull", control.clone(), move || task.run(descriptor))?;

        let pump = Self {
            url: config.url.clone(),
            control,
            queue,
            descriptor: shared,
            config,
            worker,
        };

        let timeout = pump.config.options.startup_timeout;
        if !wait_ready(&ready, timeout) {
            log::error!("pull {}: no frames within {:?}, giving up", pump.url, timeout);
            pump.release();
            // after the join, so a cycle failing during teardown cannot overwrite it
            pump.control.record_error(StreamError::StartupTimeout(timeout));
        }
        Ok(pump)
    }

    /// Takes the oldest buffered frame.
    ///
    /// [`PopError::Closed`] means the pump has stopped and every frame it
    /// produced has been read.
    pub fn read_frame(&self, blocking: bool, timeout: Option<Duration>) -> Result<RawFrame, PopError> {
        self.queue.pop(blocking, timeout)
    }

    /// Whether frames are currently flowing. False while reconnecting.
    pub fn is_open(&self) -> bool {
        self.control.is_live()
    }

    pub fn has_frame(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Streams of the most recent probe.
    pub fn stream_info(&self) -> StreamDescriptor {
        self.descriptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shape of the frames currently produced.
    pub fn frame_shape(&self) -> Option<FrameShape> {
        frame_geometry(&self.config, &self.stream_info()).ok()
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

    /// Turns reconnecting on or off for the running pump.
    pub fn set_reconnect(&self, reconnect: bool) {
        self.control.set_reconnect(reconnect);
    }

    /// Stops the worker and tears down the transcoder. Blocks until both are
    /// gone; calling it again is a no-op.
    pub fn release(&self) {
        self.control.set_reconnect(false);
        self.control.request_stop();
        self.worker.join();
        self.queue.close();
        self.queue.clear();
    }
}

impl Drop for SourcePump {
    fn drop(&mut self) {
        self.release();
    }
}

/// Frame shape for the probed video geometry in the configured pixel format.
fn frame_geometry(config: &PullConfig, descriptor: &StreamDescriptor) -> Result<FrameShape, StreamError> {
    let video = descriptor.video().ok_or_else(|| ProbeError::NoVideo {
        url: config.url.clone(),
    })?;
    Ok(config.pixel_format.frame_shape(video.width, video.height)?)
}

struct PullTask {
    config: Arc<PullConfig>,
    accel: Arc<dyn Accelerator>,
    control: Arc<PumpControl>,
    queue: Arc<FrameQueue>,
    descriptor: Arc<Mutex<StreamDescriptor>>,
}

impl PullTask {
    async fn run(self, initial: StreamDescriptor) {
        let mut probed = Some(initial);
        loop {
            let result = self.cycle(probed.take()).await;
            if !self
                .control
                .next_cycle(result, self.config.options.reconnect_delay)
                .await
            {
                break;
            }
        }
        self.queue.close();
        log::info!("{}: stopped", self.control.label());
    }

    /// One probe, launch and read cycle. `Ok` means a stop was requested.
    async fn cycle(&self, probed: Option<StreamDescriptor>) -> Result<(), StreamError> {
        let cycle = self.control.begin_cycle();
        self.control.set_phase(PumpPhase::Probing);

        let descriptor = match probed {
            Some(descriptor) => descriptor,
            None => match self.probe().await? {
                Some(descriptor) => descriptor,
                None => return Ok(()),
            },
        };
        // a source coming back may report no size yet or a new one
        let shape = frame_geometry(&self.config, &descriptor).map_err(|e| match e {
            StreamError::Config(reason) => {
                StreamError::StreamEnded(format!("unusable source geometry: {}", reason))
            }
            other => other,
        })?;
        *self.descriptor.lock().unwrap_or_else(PoisonError::into_inner) = descriptor.clone();

        self.control.set_phase(PumpPhase::Launching);
        let decoder = select_decoder(self.accel.as_ref(), &descriptor);
        let args = pull_args(&self.config, self.accel.as_ref(), decoder.as_deref());
        let ffmpeg = self.config.options.toolchain.ffmpeg();
        log::debug!("{}: {} {:?}", self.control.label(), ffmpeg.display(), args);

        let mut sup = Supervisor::new(ffmpeg).with_grace(self.config.options.teardown_grace);
        sup.start(&args).map_err(|e| StreamError::launch(ffmpeg, e))?;
        log::info!(
            "{}: cycle {} launched, {} frames of {} bytes",
            self.control.label(),
            cycle,
            shape,
            shape.byte_len()
        );

        self.control.set_phase(PumpPhase::Streaming);
        let result = self.stream(&mut sup, shape.byte_len()).await;
        sup.release().await;
        result
    }

    /// Re-probes on the blocking pool. `None` if stopped meanwhile.
    async fn probe(&self) -> Result<Option<StreamDescriptor>, StreamError> {
        let prober = self.config.prober.clone();
        let url = self.config.url.clone();
        let probe = tokio::task::spawn_blocking(move || prober.probe(&url));

        tokio::select! {
            _ = self.control.cancel_token().cancelled() => Ok(None),
            joined = probe => match joined {
                Ok(result) => Ok(Some(result?)),
                Err(e) => Err(StreamError::StreamEnded(format!("probe task failed: {}", e))),
            },
        }
    }

    async fn stream(&self, sup: &mut Supervisor, frame_size: usize) -> Result<(), StreamError> {
        let Some(stdout) = sup.stdout() else {
            return Err(StreamError::StreamEnded("transcoder has no stdout".into()));
        };
        let cancel = self.control.cancel_token().clone();
        let mut delivered = 0u64;

        loop {
            let mut buf = BytesMut::zeroed(frame_size);
            let read = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                read = read_full(&mut *stdout, &mut buf) => read,
            };
            match read {
                Ok(n) if n == frame_size => {}
                Ok(n) => {
                    // never hand out a truncated frame
                    return Err(StreamError::StreamEnded(format!(
                        "end of stream after {} frames ({} of {} bytes read)",
                        delivered, n, frame_size
                    )));
                }
                Err(e) => return Err(StreamError::StreamEnded(e.to_string())),
            }

            if self.queue.push(RawFrame::new(buf.freeze())).is_some() {
                log::trace!("{}: reader is behind, dropped oldest frame", self.control.label());
            }
            delivered += 1;
            let total = self.control.count_frame();
            if delivered == 1 {
                log::info!("{}: streaming", self.control.label());
                self.control.set_live(true);
            }
            log::trace!("{}: frame {}", self.control.label(), total);
        }
    }
}

/// Fills `buf` unless the stream ends first. Returns the bytes read.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
#[path = "pull_test.rs"]
mod pull_test;
