//! Completion signal shared between a channel and the threads waiting on it.
//!
//! A [`Notifier`] is a generation counter guarded by a condition variable.
//! Waiters record the generation *before* probing the channel, then sleep
//! until it moves on. A notification that lands between the probe and the
//! sleep therefore cannot be lost.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Signal {
    generation: Mutex<u64>,
    cond: Condvar,
}

/// Wakes threads waiting for data arrival, operation completion or close.
///
/// Drivers that cannot signal arrivals themselves are given a polling
/// notifier: waits are then capped at the polling interval so the waiter
/// re-probes the device periodically.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    signal: Arc<Signal>,
    poll_interval: Option<Duration>,
}

impl Notifier {
    /// Event-driven notifier: waits only end on `notify` or timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier whose waits never exceed `interval`.
    pub fn polling(interval: Duration) -> Self {
        Self {
            signal: Arc::default(),
            poll_interval: Some(interval),
        }
    }

    /// Polling interval, if this notifier polls.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }

    /// Current generation. Capture this before probing the channel.
    pub fn generation(&self) -> u64 {
        *self.signal.generation.lock()
    }

    /// Advance the generation and wake every waiter.
    pub fn notify(&self) {
        let mut generation = self.signal.generation.lock();
        *generation = generation.wrapping_add(1);
        self.signal.cond.notify_all();
    }

    /// Block until the generation differs from `seen` or `timeout` elapses.
    ///
    /// Returns `true` if a notification arrived. A polling notifier may
    /// return `false` early, after its polling interval.
    pub fn wait_past(&self, seen: u64, timeout: Duration) -> bool {
        let timeout = match self.poll_interval {
            Some(interval) => interval.min(timeout),
            None => timeout,
        };
        let deadline = Instant::now() + timeout;

        let mut generation = self.signal.generation.lock();
        while *generation == seen {
            if self
                .signal
                .cond
                .wait_until(&mut generation, deadline)
                .timed_out()
            {
                return *generation != seen;
            }
        }
        true
    }
}
