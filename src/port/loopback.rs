//! In-memory loop-back transport.
//!
//! Simulates a bank of serial ports without hardware. Bytes written to a
//! port are queued back on the same port as if the TX and RX lines were
//! jumpered together, and tests can inject remote traffic, read back what
//! was written, and schedule driver faults.
//!
//! # Example
//! ```
//! use serial_device::port::{Channel, IoStatus, LoopbackTransport, Transport};
//!
//! let transport = LoopbackTransport::new().with_port("LOOP0");
//! let mut channel = transport.open("LOOP0").unwrap();
//!
//! assert_eq!(channel.start_write(b"ping").unwrap(), IoStatus::Complete(4));
//!
//! let mut buf = [0u8; 8];
//! assert_eq!(channel.start_read(&mut buf).unwrap(), IoStatus::Complete(4));
//! assert_eq!(&buf[..4], b"ping");
//! ```

use super::error::TransportError;
use super::notify::Notifier;
use super::traits::{Channel, CommTimeouts, IoStatus, LineState, Transport};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity at which waiters re-probe a port that simulates write latency.
const LATENCY_POLL: Duration = Duration::from_millis(1);

/// Faults armed for the next matching call.
#[derive(Debug, Default)]
struct Faults {
    get_state: Option<String>,
    set_state: Option<String>,
    write: Option<String>,
    read: Option<String>,
}

#[derive(Debug)]
struct LoopbackPort {
    held: bool,
    echo: bool,
    armed: bool,
    rx: VecDeque<u8>,
    write_log: Vec<Vec<u8>>,
    pending_write: Option<(Vec<u8>, Instant)>,
    write_latency: Option<Duration>,
    line: LineState,
    timeouts: Option<CommTimeouts>,
    purge_count: usize,
    faults: Faults,
    notifier: Notifier,
}

impl LoopbackPort {
    fn new() -> Self {
        Self {
            held: false,
            echo: true,
            armed: false,
            rx: VecDeque::new(),
            write_log: Vec::new(),
            pending_write: None,
            write_latency: None,
            line: LineState::default(),
            timeouts: None,
            purge_count: 0,
            faults: Faults::default(),
            notifier: Notifier::new(),
        }
    }

    fn deliver(&mut self, data: Vec<u8>) -> usize {
        let len = data.len();
        if self.echo {
            self.rx.extend(&data);
        }
        self.write_log.push(data);
        self.notifier.notify();
        len
    }

    fn take_rx(&mut self, buf: &mut [u8]) -> IoStatus {
        if buf.is_empty() {
            return IoStatus::Complete(0);
        }
        if self.rx.is_empty() {
            return IoStatus::Pending;
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        IoStatus::Complete(n)
    }
}

fn fault(slot: &mut Option<String>) -> Result<(), TransportError> {
    match slot.take() {
        Some(message) => Err(TransportError::injected(message)),
        None => Ok(()),
    }
}

type Ports = Arc<Mutex<HashMap<String, LoopbackPort>>>;

/// A bank of simulated ports sharing one state table.
///
/// Cloning is cheap; every clone observes and controls the same ports.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    ports: Ports,
}

impl LoopbackTransport {
    /// Create a transport with no ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add_port`](Self::add_port).
    pub fn with_port(self, port_id: impl Into<String>) -> Self {
        self.add_port(port_id);
        self
    }

    /// Make `port_id` exist. Re-adding an existing port is a no-op.
    pub fn add_port(&self, port_id: impl Into<String>) {
        self.ports
            .lock()
            .entry(port_id.into())
            .or_insert_with(LoopbackPort::new);
    }

    /// Queue bytes on the port as if sent by the remote end.
    ///
    /// Returns `false` if the port does not exist.
    pub fn inject(&self, port_id: &str, data: &[u8]) -> bool {
        self.with_port_mut(port_id, |port| {
            port.rx.extend(data);
            port.notifier.notify();
        })
        .is_some()
    }

    /// Every completed write on the port, in order.
    pub fn written(&self, port_id: &str) -> Vec<Vec<u8>> {
        self.with_port_mut(port_id, |port| port.write_log.clone())
            .unwrap_or_default()
    }

    /// Whether writes are echoed back into the receive queue (default on).
    pub fn set_echo(&self, port_id: &str, echo: bool) {
        self.with_port_mut(port_id, |port| port.echo = echo);
    }

    /// Delay completion of every write. Applies to channels opened afterwards.
    pub fn set_write_latency(&self, port_id: &str, latency: Option<Duration>) {
        self.with_port_mut(port_id, |port| {
            port.write_latency = latency;
            port.notifier = match latency {
                Some(_) => Notifier::polling(LATENCY_POLL),
                None => Notifier::new(),
            };
        });
    }

    /// Fail the next `get_state` with an injected fault.
    pub fn fail_next_get_state(&self, port_id: &str, message: impl Into<String>) {
        let message = message.into();
        self.with_port_mut(port_id, |port| port.faults.get_state = Some(message));
    }

    /// Fail the next `set_state` with an injected fault.
    pub fn fail_next_set_state(&self, port_id: &str, message: impl Into<String>) {
        let message = message.into();
        self.with_port_mut(port_id, |port| port.faults.set_state = Some(message));
    }

    /// Fail the next write issue or completion poll.
    pub fn fail_next_write(&self, port_id: &str, message: impl Into<String>) {
        let message = message.into();
        self.with_port_mut(port_id, |port| port.faults.write = Some(message));
    }

    /// Fail the next read issue or completion poll.
    pub fn fail_next_read(&self, port_id: &str, message: impl Into<String>) {
        let message = message.into();
        self.with_port_mut(port_id, |port| port.faults.read = Some(message));
    }

    /// Whether a channel currently holds the port.
    pub fn is_held(&self, port_id: &str) -> bool {
        self.with_port_mut(port_id, |port| port.held)
            .unwrap_or(false)
    }

    /// Bytes waiting in the receive queue.
    pub fn pending_rx(&self, port_id: &str) -> usize {
        self.with_port_mut(port_id, |port| port.rx.len())
            .unwrap_or(0)
    }

    /// The parameter block last written to the port.
    pub fn line_state(&self, port_id: &str) -> Option<LineState> {
        self.with_port_mut(port_id, |port| port.line.clone())
    }

    /// The timing policy last pushed to the port.
    pub fn timeouts(&self, port_id: &str) -> Option<CommTimeouts> {
        self.with_port_mut(port_id, |port| port.timeouts).flatten()
    }

    /// How many times the port has been purged.
    pub fn purge_count(&self, port_id: &str) -> usize {
        self.with_port_mut(port_id, |port| port.purge_count)
            .unwrap_or(0)
    }

    fn with_port_mut<R>(&self, port_id: &str, f: impl FnOnce(&mut LoopbackPort) -> R) -> Option<R> {
        self.ports.lock().get_mut(port_id).map(f)
    }
}

impl Transport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    fn open(&self, port_id: &str) -> Result<Box<dyn Channel>, TransportError> {
        let mut ports = self.ports.lock();
        let port = ports
            .get_mut(port_id)
            .ok_or_else(|| TransportError::not_found(port_id))?;
        if port.held {
            return Err(TransportError::busy(port_id));
        }
        port.held = true;

        Ok(Box::new(LoopbackChannel {
            port_id: port_id.to_string(),
            ports: Arc::clone(&self.ports),
            notifier: port.notifier.clone(),
            closed: false,
        }))
    }
}

/// Channel onto one simulated port.
#[derive(Debug)]
struct LoopbackChannel {
    port_id: String,
    ports: Ports,
    notifier: Notifier,
    closed: bool,
}

impl LoopbackChannel {
    fn port<R>(
        &self,
        f: impl FnOnce(&mut LoopbackPort) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut ports = self.ports.lock();
        let port = ports.get_mut(&self.port_id).ok_or(TransportError::Closed)?;
        f(port)
    }
}

impl Channel for LoopbackChannel {
    fn get_state(&mut self) -> Result<LineState, TransportError> {
        self.port(|port| {
            fault(&mut port.faults.get_state)?;
            Ok(port.line.clone())
        })
    }

    fn set_state(&mut self, state: &LineState) -> Result<(), TransportError> {
        self.port(|port| {
            fault(&mut port.faults.set_state)?;
            if !(5..=8).contains(&state.data_bits) || state.baud_rate == 0 {
                return Err(TransportError::Unsupported("parameter block out of range"));
            }
            port.line = state.clone();
            Ok(())
        })
    }

    fn set_timeouts(&mut self, timeouts: &CommTimeouts) -> Result<(), TransportError> {
        self.port(|port| {
            port.timeouts = Some(*timeouts);
            Ok(())
        })
    }

    fn purge(&mut self) -> Result<(), TransportError> {
        self.port(|port| {
            port.rx.clear();
            port.pending_write = None;
            port.purge_count += 1;
            Ok(())
        })
    }

    fn available_bytes(&mut self) -> Result<usize, TransportError> {
        self.port(|port| Ok(port.rx.len()))
    }

    fn start_write(&mut self, data: &[u8]) -> Result<IoStatus, TransportError> {
        self.port(|port| {
            fault(&mut port.faults.write)?;
            match port.write_latency {
                Some(latency) => {
                    port.pending_write = Some((data.to_vec(), Instant::now() + latency));
                    Ok(IoStatus::Pending)
                }
                None => Ok(IoStatus::Complete(port.deliver(data.to_vec()))),
            }
        })
    }

    fn write_result(&mut self) -> Result<IoStatus, TransportError> {
        self.port(|port| {
            fault(&mut port.faults.write)?;
            let ready_at = match &port.pending_write {
                Some((_, ready_at)) => *ready_at,
                None => return Err(TransportError::NoPendingOperation),
            };
            if Instant::now() < ready_at {
                return Ok(IoStatus::Pending);
            }
            match port.pending_write.take() {
                Some((data, _)) => Ok(IoStatus::Complete(port.deliver(data))),
                None => Err(TransportError::NoPendingOperation),
            }
        })
    }

    fn start_read(&mut self, buf: &mut [u8]) -> Result<IoStatus, TransportError> {
        self.port(|port| {
            fault(&mut port.faults.read)?;
            Ok(port.take_rx(buf))
        })
    }

    fn read_result(&mut self, buf: &mut [u8]) -> Result<IoStatus, TransportError> {
        self.port(|port| {
            fault(&mut port.faults.read)?;
            Ok(port.take_rx(buf))
        })
    }

    fn arm_data_notify(&mut self) -> Result<(), TransportError> {
        self.port(|port| {
            port.armed = true;
            Ok(())
        })
    }

    fn data_ready(&mut self) -> Result<bool, TransportError> {
        self.port(|port| Ok(port.armed && !port.rx.is_empty()))
    }

    fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(port) = self.ports.lock().get_mut(&self.port_id) {
            port.held = false;
            port.armed = false;
            port.pending_write = None;
        }
        self.notifier.notify();
    }
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        self.close();
    }
}
