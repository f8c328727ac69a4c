use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::media::types::RawFrame;

pub const DEFAULT_CAPACITY: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    /// Non-blocking pop on an empty queue.
    #[error("queue is empty")]
    Empty,
    #[error("timed out waiting for a frame")]
    Timeout,
    /// The producer is gone and every buffered frame has been taken.
    #[error("queue is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Inner {
    frames: VecDeque<RawFrame>,
    closed: bool,
}

/// Bounded frame buffer shared between a pump's worker and its caller.
///
/// `push` evicts the oldest frame when full, so a slow consumer always sees the
/// most recent frames in capture order.
#[derive(Debug)]
pub struct FrameQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    available: Condvar,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `frame`, returning the frame evicted to make room, if any.
    pub fn push(&self, frame: RawFrame) -> Option<RawFrame> {
        let mut inner = self.lock();
        let dropped = if inner.frames.len() >= self.capacity {
            inner.frames.pop_front()
        } else {
            None
        };
        inner.frames.push_back(frame);
        drop(inner);
        self.available.notify_one();
        dropped
    }

    /// Inserts `frame` only if there is room; otherwise hands it back.
    pub fn try_push(&self, frame: RawFrame) -> Result<(), RawFrame> {
        let mut inner = self.lock();
        if inner.frames.len() >= self.capacity {
            return Err(frame);
        }
        inner.frames.push_back(frame);
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Takes the oldest frame.
    ///
    /// With `blocking` set, waits until a frame arrives, the queue is closed or
    /// `timeout` (if any) elapses. Frames still buffered when the queue closes
    /// are handed out before [`PopError::Closed`].
    pub fn pop(&self, blocking: bool, timeout: Option<Duration>) -> Result<RawFrame, PopError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.lock();
        loop {
            if let Some(frame) = inner.frames.pop_front() {
                return Ok(frame);
            }
            if inner.closed {
                return Err(PopError::Closed);
            }
            if !blocking {
                return Err(PopError::Empty);
            }
            inner = match deadline {
                None => self
                    .available
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PopError::Timeout);
                    }
                    self.available
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    pub fn try_pop(&self) -> Option<RawFrame> {
        self.lock().frames.pop_front()
    }

    /// Wakes every waiter; later pushes are still accepted.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn clear(&self) {
        self.lock().frames.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().frames.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
