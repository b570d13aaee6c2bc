//! Exclusive ownership of one open port.
//!
//! A [`PortHandle`] is either open or the closed sentinel. All native access
//! goes through a single mutex held by the shared [`Port`], which the
//! receive loop links to without taking ownership.

use crate::error::{DeviceError, DeviceResult};
use crate::io::PendingOperation;
use crate::line::LineSettings;
use crate::port::{Channel, CommTimeouts, Notifier, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// The open native resource plus the state staged against it.
pub(crate) struct Native {
    pub(crate) channel: Box<dyn Channel>,
    pub(crate) settings: LineSettings,
    pub(crate) timeouts: CommTimeouts,
    pub(crate) read_op: PendingOperation,
    pub(crate) write_op: PendingOperation,
}

impl Native {
    fn new(channel: Box<dyn Channel>) -> Self {
        Self {
            channel,
            settings: LineSettings::default(),
            timeouts: CommTimeouts::default(),
            read_op: PendingOperation::default(),
            write_op: PendingOperation::default(),
        }
    }
}

/// State shared between a handle and anything linked to it.
pub(crate) struct Port {
    port_id: String,
    native: Mutex<Option<Native>>,
    notifier: Notifier,
}

impl Port {
    fn closed() -> Self {
        Self {
            port_id: String::new(),
            native: Mutex::new(None),
            notifier: Notifier::new(),
        }
    }

    pub(crate) fn port_id(&self) -> &str {
        &self.port_id
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub(crate) fn is_open(&self) -> bool {
        self.native.lock().is_some()
    }

    /// Run `f` against the open native resource, holding the handle lock.
    pub(crate) fn with_native<R>(
        &self,
        f: impl FnOnce(&mut Native) -> DeviceResult<R>,
    ) -> DeviceResult<R> {
        let mut guard = self.native.lock();
        let native = guard.as_mut().ok_or(DeviceError::NotOpen)?;
        f(native)
    }

    fn close(&self) -> bool {
        let taken = self.native.lock().take();
        match taken {
            Some(mut native) => {
                native.channel.close();
                // Wake anything parked on a pending operation so it can
                // observe the close.
                self.notifier.notify();
                true
            }
            None => false,
        }
    }
}

/// Exclusive owner of an open serial port.
///
/// Not `Clone`: exactly one live handle refers to a native resource.
/// [`PortHandle::default`] is the closed sentinel, which makes
/// `std::mem::take` (or [`PortHandle::take`]) an explicit move-out that
/// invalidates the source.
///
/// # Example
/// ```
/// use serial_device::port::LoopbackTransport;
/// use serial_device::PortHandle;
///
/// let transport = LoopbackTransport::new().with_port("LOOP0");
/// let mut handle = PortHandle::open(&transport, "LOOP0")?;
/// assert!(handle.is_open());
///
/// let mut moved = handle.take();
/// assert!(!handle.is_open());
/// assert!(moved.is_open());
///
/// moved.close();
/// moved.close();
/// # Ok::<(), serial_device::DeviceError>(())
/// ```
pub struct PortHandle {
    pub(crate) port: Arc<Port>,
}

impl PortHandle {
    /// Request exclusive read/write access to `port_id`.
    ///
    /// The port is opened with driver defaults; callers apply settings
    /// afterwards (see [`SerialDevice::open`](crate::SerialDevice::open) for
    /// the full sequence).
    pub fn open(transport: &dyn Transport, port_id: &str) -> DeviceResult<Self> {
        let channel = transport.open(port_id).map_err(|source| {
            warn!("Could not open port {} via {}: {}", port_id, transport.name(), source);
            DeviceError::open(port_id, source)
        })?;
        let notifier = channel.notifier();
        debug!("Opened port {} via {}", port_id, transport.name());

        Ok(Self {
            port: Arc::new(Port {
                port_id: port_id.to_string(),
                native: Mutex::new(Some(Native::new(channel))),
                notifier,
            }),
        })
    }

    /// Release the native resource. Calling this on a closed handle is a no-op.
    ///
    /// Stop any receive loop linked to this handle first; a loop that finds
    /// the handle closed under it terminates with
    /// [`DeviceError::ShutdownRace`].
    pub fn close(&mut self) {
        if self.port.close() {
            debug!("Closed port {}", self.port.port_id());
        }
    }

    /// Move ownership out, leaving the closed sentinel behind.
    pub fn take(&mut self) -> PortHandle {
        std::mem::take(self)
    }

    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    /// Identifier the handle was opened with; empty for the sentinel.
    pub fn port_id(&self) -> &str {
        self.port.port_id()
    }

    pub(crate) fn link(&self) -> Arc<Port> {
        Arc::clone(&self.port)
    }
}

impl Default for PortHandle {
    fn default() -> Self {
        Self {
            port: Arc::new(Port::closed()),
        }
    }
}

impl Drop for PortHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortHandle")
            .field("port_id", &self.port.port_id())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::LoopbackTransport;

    #[test]
    fn test_open_missing_port() {
        let transport = LoopbackTransport::new();
        let err = PortHandle::open(&transport, "LOOP7").unwrap_err();
        assert!(matches!(err, DeviceError::Open { ref port, .. } if port == "LOOP7"));
    }

    #[test]
    fn test_open_held_port() {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        let _held = PortHandle::open(&transport, "LOOP0").unwrap();

        let err = PortHandle::open(&transport, "LOOP0").unwrap_err();
        assert!(err.is_open_error());
    }

    #[test]
    fn test_close_is_idempotent() {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        let mut handle = PortHandle::open(&transport, "LOOP0").unwrap();

        handle.close();
        handle.close();
        assert!(!handle.is_open());
        assert!(!transport.is_held("LOOP0"));
    }

    #[test]
    fn test_drop_releases_port() {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        {
            let _handle = PortHandle::open(&transport, "LOOP0").unwrap();
            assert!(transport.is_held("LOOP0"));
        }
        assert!(!transport.is_held("LOOP0"));
    }

    #[test]
    fn test_take_invalidates_source() {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        let mut source = PortHandle::open(&transport, "LOOP0").unwrap();

        let dest = source.take();
        assert!(!source.is_open());
        assert_eq!(source.port_id(), "");
        assert!(dest.is_open());
        assert_eq!(dest.port_id(), "LOOP0");

        // Dropping the invalidated source must not release the port.
        drop(source);
        assert!(transport.is_held("LOOP0"));
    }

    #[test]
    fn test_sentinel_rejects_io() {
        let handle = PortHandle::default();
        assert!(matches!(handle.available_bytes(), Err(DeviceError::NotOpen)));
    }
}
