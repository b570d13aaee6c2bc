//! Background receive loop.
//!
//! One dedicated thread per device waits for data-ready on the handle,
//! drains whatever is queued and hands each chunk to the [`ObserverBus`].
//! The loop links to the handle without owning it: close the handle only
//! after [`ReceiveLoop::stop`], otherwise the loop ends with
//! [`DeviceError::ShutdownRace`].

use crate::error::{DeviceError, DeviceResult, Operation};
use crate::handle::{Port, PortHandle};
use crate::observer::{ObserverBus, ReceiveEvent};
use crate::port::Notifier;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Cooperative stop signal shared between a loop and its owner.
///
/// Cloning shares the flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Timing of the receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverSettings {
    /// Upper bound on one wait for data-ready. Also bounds how long
    /// cancellation can go unnoticed if the wake-up is missed.
    pub poll_interval: Duration,
    /// Timeout for each drain read.
    pub read_timeout: Duration,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            read_timeout: Duration::from_millis(50),
        }
    }
}

impl ReceiverSettings {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

/// Observable state of a [`ReceiveLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiverState {
    Stopped = 0,
    /// About to probe for data.
    Waiting = 1,
    /// Draining bytes that were ready when probed.
    ImmediateData = 2,
    /// Parked on the notifier until data arrives or the poll interval ends.
    AwaitingCompletion = 3,
}

impl ReceiverState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Waiting,
            2 => Self::ImmediateData,
            3 => Self::AwaitingCompletion,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn set(&self, state: ReceiverState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn get(&self) -> ReceiverState {
        ReceiverState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Marks the loop stopped however its thread exits, panics included.
struct StopOnExit(SharedState);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.set(ReceiverState::Stopped);
    }
}

/// Treat a handle closed under the loop as a shutdown race.
fn raced(operation: Operation) -> impl Fn(DeviceError) -> DeviceError {
    move |err| match err {
        DeviceError::NotOpen => DeviceError::ShutdownRace { operation },
        other => other,
    }
}

impl Port {
    pub(crate) fn arm_data_notify(&self) -> DeviceResult<()> {
        self.with_native(|native| native.channel.arm_data_notify().map_err(DeviceError::Read))
    }

    pub(crate) fn data_ready(&self) -> DeviceResult<bool> {
        self.with_native(|native| native.channel.data_ready().map_err(DeviceError::Read))
    }
}

/// Handle to a running receive thread.
///
/// Dropping the loop stops it; use [`ReceiveLoop::stop`] to observe how it
/// ended.
#[derive(Debug)]
pub struct ReceiveLoop {
    port_id: String,
    token: CancellationToken,
    notifier: Notifier,
    state: SharedState,
    thread: Option<JoinHandle<DeviceResult<()>>>,
}

impl ReceiveLoop {
    /// Arm data-ready notification on `handle` and spawn the loop thread.
    ///
    /// Every chunk received is published on `bus` from the loop thread.
    pub fn start(
        handle: &PortHandle,
        bus: ObserverBus,
        settings: ReceiverSettings,
        token: CancellationToken,
    ) -> DeviceResult<Self> {
        let port = handle.link();
        port.arm_data_notify()?;

        let port_id = port.port_id().to_string();
        let notifier = port.notifier().clone();
        let state = SharedState(Arc::new(AtomicU8::new(ReceiverState::Waiting as u8)));

        let thread = {
            let token = token.clone();
            let thread_state = state.clone();
            thread::Builder::new()
                .name(format!("serial-rx:{}", port_id))
                .spawn(move || {
                    let _stopped = StopOnExit(thread_state.clone());
                    let result = run(&port, &bus, settings, &token, &thread_state);
                    match &result {
                        Ok(()) => debug!("Receive loop on {} finished", port.port_id()),
                        Err(e) => warn!("Receive loop on {} ended: {}", port.port_id(), e),
                    }
                    result
                })
                .map_err(|e| {
                    state.set(ReceiverState::Stopped);
                    DeviceError::Spawn(e)
                })?
        };
        debug!("Receive loop started on {}", port_id);

        Ok(Self {
            port_id,
            token,
            notifier,
            state,
            thread: Some(thread),
        })
    }

    pub fn state(&self) -> ReceiverState {
        self.state.get()
    }

    /// Whether the loop thread is still alive.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// The token this loop watches.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the loop, wake it and wait for the thread to exit.
    ///
    /// Returns the error the loop terminated with, if any.
    pub fn stop(mut self) -> DeviceResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> DeviceResult<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.token.cancel();
        self.notifier.notify();

        let result = match thread.join() {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Receive loop on {} panicked: {}", self.port_id, message);
                Err(DeviceError::ReceiverPanicked(message))
            }
        };
        debug!("Receive loop stopped on {}", self.port_id);
        result
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            debug!("Receive loop on {} dropped after: {}", self.port_id, e);
        }
    }
}

fn run(
    port: &Port,
    bus: &ObserverBus,
    settings: ReceiverSettings,
    token: &CancellationToken,
    state: &SharedState,
) -> DeviceResult<()> {
    loop {
        // Capture before checking the token so a stop that lands after the
        // check still ends the wait below.
        let seen = port.notifier().generation();
        if token.is_cancelled() {
            return Ok(());
        }

        state.set(ReceiverState::Waiting);
        if port.data_ready().map_err(raced(Operation::WaitData))? {
            state.set(ReceiverState::ImmediateData);
            drain(port, bus, settings, token)?;
            continue;
        }

        state.set(ReceiverState::AwaitingCompletion);
        port.notifier().wait_past(seen, settings.poll_interval);
    }
}

fn drain(
    port: &Port,
    bus: &ObserverBus,
    settings: ReceiverSettings,
    token: &CancellationToken,
) -> DeviceResult<()> {
    while !token.is_cancelled() {
        let available = port.available_bytes().map_err(raced(Operation::Read))?;
        if available == 0 {
            break;
        }

        let mut buf = vec![0u8; available];
        let n = port
            .read(&mut buf, settings.read_timeout)
            .map_err(raced(Operation::Read))?;
        if n == 0 {
            break;
        }
        buf.truncate(n);

        let delivered = bus.publish(&ReceiveEvent::new(buf));
        trace!("Published {} bytes from {} to {} subscribers", n, port.port_id(), delivered);
    }
    Ok(())
}
