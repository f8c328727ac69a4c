//! Relay: one `ffmpeg` reading a source and publishing it elsewhere.

use std::sync::Arc;
use std::time::Duration;

use ffmpeg_cli::{hw, Accelerator, StreamDescriptor, Supervisor};
use tokio::sync::watch;

use crate::error::StreamError;
use crate::media::command::{relay_args, select_decoder};
use crate::media::state::{wait_ready, PumpControl, PumpPhase, PumpStatus, Worker};
use crate::media::types::{RelayConfig, RelayEncoding};

/// How long a relay process must stay up before the relay counts as running.
pub const CONFIRM_WINDOW: Duration = Duration::from_millis(500);

/// Forwards a source to a sink without handing frames to the caller.
///
/// Each cycle probes the source and runs a single process; the cycle ends
/// when that process exits.
pub struct Relay {
    source_url: String,
    sink_url: String,
    control: Arc<PumpControl>,
    worker: Worker,
}

impl Relay {
    /// Probes the source and starts relaying. Waits up to the startup timeout
    /// for a process to stay up for [`CONFIRM_WINDOW`], releasing the relay if
    /// none does.
    pub fn open(config: RelayConfig) -> Result<Self, StreamError> {
        let label = format!("relay {} -> {}", config.source_url, config.sink_url);
        log::info!("{}: probing", label);

        let (control, ready) = PumpControl::new(label, config.options.reconnect);
        control.set_phase(PumpPhase::Probing);
        let descriptor = config.prober.probe(&config.source_url)?;

        let accel = hw::negotiate(&config.accelerator);
        let startup_timeout = config.options.startup_timeout;
        let task = RelayTask {
            config: Arc::new(config),
            accel,
            control: control.clone(),
        };
        let source_url = task.config.source_url.clone();
        let sink_url = task.config.sink_url.clone();
        let worker = Worker::spawn("relay", control.clone(), move || task.run(descriptor))?;

        let relay = Self {
            source_url,
            sink_url,
            control,
            worker,
        };
        if !wait_ready(&ready, startup_timeout) {
            log::error!("{}: not running after {:?}", relay.control.label(), startup_timeout);
            relay.release();
            relay
                .control
                .record_error(StreamError::StartupTimeout(startup_timeout));
        }
        Ok(relay)
    }

    /// Whether the relay process is currently running.
    pub fn is_running(&self) -> bool {
        self.control.is_live()
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn sink_url(&self) -> &str {
        &self.sink_url
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

    /// Stops the worker and tears down the process. Idempotent.
    pub fn release(&self) {
        self.control.set_reconnect(false);
        self.control.request_stop();
        self.worker.join();
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.release();
    }
}

struct RelayTask {
    config: Arc<RelayConfig>,
    accel: Arc<dyn Accelerator>,
    control: Arc<PumpControl>,
}

impl RelayTask {
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
        log::info!("{}: stopped", self.control.label());
    }

    async fn cycle(&self, probed: Option<StreamDescriptor>) -> Result<(), StreamError> {
        let cycle = self.control.begin_cycle();
        self.control.set_phase(PumpPhase::Probing);

        let descriptor = match probed {
            Some(descriptor) => descriptor,
            None => {
                let prober = self.config.prober.clone();
                let url = self.config.source_url.clone();
                let probe = tokio::task::spawn_blocking(move || prober.probe(&url));
                tokio::select! {
                    _ = self.control.cancel_token().cancelled() => return Ok(()),
                    joined = probe => joined
                        .map_err(|e| StreamError::StreamEnded(format!("probe task failed: {}", e)))??,
                }
            }
        };

        self.control.set_phase(PumpPhase::Launching);
        let decoder = match self.config.encoding {
            RelayEncoding::Copy => None,
            RelayEncoding::Encode(_) => select_decoder(self.accel.as_ref(), &descriptor),
        };
        let args = relay_args(&self.config, self.accel.as_ref(), decoder.as_deref());
        let ffmpeg = self.config.options.toolchain.ffmpeg();
        log::debug!("{}: {} {:?}", self.control.label(), ffmpeg.display(), args);

        let mut sup = Supervisor::new(ffmpeg).with_grace(self.config.options.teardown_grace);
        sup.start(&args).map_err(|e| StreamError::launch(ffmpeg, e))?;
        log::info!("{}: cycle {} launched", self.control.label(), cycle);
        self.control.set_phase(PumpPhase::Streaming);

        let cancel = self.control.cancel_token().clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            ended = self.supervise(&mut sup, cycle) => Err(ended),
        };
        sup.release().await;
        result
    }

    /// Waits for the process to exit, marking the relay running once it has
    /// survived the confirmation window.
    async fn supervise(&self, sup: &mut Supervisor, cycle: u64) -> StreamError {
        let exited = tokio::select! {
            exited = sup.wait() => exited,
            _ = tokio::time::sleep(CONFIRM_WINDOW) => {
                log::info!("{}: cycle {} running", self.control.label(), cycle);
                self.control.set_live(true);
                sup.wait().await
            }
        };
        match exited {
            Ok(status) => StreamError::StreamEnded(format!("relay process exited: {}", status)),
            Err(e) => StreamError::StreamEnded(e.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod relay_test;
