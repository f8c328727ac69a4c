use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;

/// Where a pump's background loop currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpPhase {
    Initializing,
    Probing,
    Launching,
    Streaming,
    Reconnecting,
    Stopped,
}

/// Snapshot of a pump, published by its worker after every state change.
#[derive(Clone, Debug)]
pub struct PumpStatus {
    pub phase: PumpPhase,
    /// Frames are flowing: the source delivered a frame in the current cycle,
    /// or the sink wrote enough consecutive frames to count as pushing.
    pub live: bool,
    /// Frames delivered (pull) or written (push) over the pump's lifetime.
    pub frames: u64,
    /// Probe/launch cycles started.
    pub cycles: u64,
    pub last_error: Option<StreamError>,
}

impl Default for PumpStatus {
    fn default() -> Self {
        Self {
            phase: PumpPhase::Initializing,
            live: false,
            frames: 0,
            cycles: 0,
            last_error: None,
        }
    }
}

/// State shared between a pump handle and its worker thread.
#[derive(Debug)]
pub(crate) struct PumpControl {
    label: String,
    status: watch::Sender<PumpStatus>,
    cancel: CancellationToken,
    reconnect: AtomicBool,
    ready: Mutex<Option<SyncSender<()>>>,
}

impl PumpControl {
    /// Returns the control block and the receiving end of its one-shot
    /// "first frames flowing" signal.
    pub fn new(label: impl Into<String>, reconnect: bool) -> (Arc<Self>, Receiver<()>) {
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (status, _) = watch::channel(PumpStatus::default());
        let control = Arc::new(Self {
            label: label.into(),
            status,
            cancel: CancellationToken::new(),
            reconnect: AtomicBool::new(reconnect),
            ready: Mutex::new(Some(ready_tx)),
        });
        (control, ready_rx)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> PumpStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PumpStatus> {
        self.status.subscribe()
    }

    pub fn is_live(&self) -> bool {
        self.status.borrow().live
    }

    pub fn set_phase(&self, phase: PumpPhase) {
        self.status.send_if_modified(|s| {
            let changed = s.phase != phase;
            s.phase = phase;
            changed
        });
    }

    pub fn set_live(&self, live: bool) {
        self.status.send_if_modified(|s| {
            let changed = s.live != live;
            s.live = live;
            changed
        });
        if live {
            self.signal_ready();
        }
    }

    pub fn record_error(&self, err: StreamError) {
        self.status.send_modify(|s| s.last_error = Some(err));
    }

    pub fn count_frame(&self) -> u64 {
        let mut frames = 0;
        self.status.send_modify(|s| {
            s.frames += 1;
            frames = s.frames;
        });
        frames
    }

    /// Marks the start of a probe/launch cycle and returns its number.
    pub fn begin_cycle(&self) -> u64 {
        let mut cycle = 0;
        self.status.send_modify(|s| {
            s.cycles += 1;
            cycle = s.cycles;
        });
        cycle
    }

    pub fn reconnect_enabled(&self) -> bool {
        self.reconnect.load(Ordering::Relaxed)
    }

    pub fn set_reconnect(&self, reconnect: bool) {
        self.reconnect.store(reconnect, Ordering::Relaxed);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Releases whoever waits on construction. Only the first call counts.
    pub fn signal_ready(&self) {
        let sender = self
            .ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.try_send(());
        }
    }

    /// Bookkeeping after a cycle ended with `result`. Returns whether another
    /// cycle should start, after sleeping `delay` unless stopped meanwhile.
    pub async fn next_cycle(&self, result: Result<(), StreamError>, delay: Duration) -> bool {
        self.set_live(false);
        if let Err(e) = result {
            log::error!("{}: {}", self.label, e);
            let retryable = e.is_retryable();
            self.record_error(e);
            if !retryable {
                return false;
            }
        }
        if self.is_cancelled() || !self.reconnect_enabled() {
            return false;
        }

        self.set_phase(PumpPhase::Reconnecting);
        log::warn!("{}: reconnecting in {:?}", self.label, delay);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Blocks until the worker signals that frames are flowing or has stopped.
/// Returns false if `timeout` elapsed first.
pub(crate) fn wait_ready(ready: &Receiver<()>, timeout: Duration) -> bool {
    match ready.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

/// Dedicated OS thread running one pump's loop on a current-thread runtime.
#[derive(Debug)]
pub(crate) struct Worker {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn spawn<F, Fut>(kind: &str, control: Arc<PumpControl>, body: F) -> Result<Self, StreamError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()>,
    {
        let name = format!("videostream-{}", kind);
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        runtime.block_on(body());
                        // an abandoned probe may still sit on the blocking pool
                        runtime.shutdown_background();
                    }
                    Err(e) => {
                        log::error!("{}: failed to build runtime: {}", control.label(), e);
                        control.record_error(StreamError::Launch {
                            program: name,
                            source: Arc::new(e),
                        });
                    }
                }
                control.set_live(false);
                control.set_phase(PumpPhase::Stopped);
                control.signal_ready();
            })
            .map_err(|e| StreamError::Launch {
                program: "worker thread".to_string(),
                source: Arc::new(e),
            })?;

        Ok(Self {
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Waits for the worker to finish. Later calls return immediately.
    pub fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("pump worker panicked");
            }
        }
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |h| h.is_finished())
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;
