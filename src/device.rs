//! High-level device: a port handle, its subscribers and an optional
//! receive loop, torn down in the right order.

use crate::error::{DeviceError, DeviceResult};
use crate::handle::PortHandle;
use crate::line::LineSettings;
use crate::observer::{ObserverBus, ReceiveEvent, SubscriptionId};
use crate::port::{ByteSize, CommTimeouts, FlowControl, LineState, StopBits, Transport};
use crate::receiver::{CancellationToken, ReceiveLoop, ReceiverSettings};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything needed to bring a device up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceSettings {
    pub line: LineSettings,
    pub timeouts: CommTimeouts,
    pub receiver: ReceiverSettings,
}

/// An open serial device.
///
/// # Example
/// ```
/// use serial_device::port::LoopbackTransport;
/// use serial_device::{DeviceSettings, SerialDevice};
/// use std::time::Duration;
///
/// let transport = LoopbackTransport::new().with_port("LOOP0");
/// let mut device = SerialDevice::open(&transport, "LOOP0", &DeviceSettings::default())?;
/// let (_id, events) = device.bus().subscribe_channel();
///
/// device.start_receiving()?;
/// device.write(b"ATE0\r")?;
/// let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
/// assert_eq!(event.bytes, b"ATE0\r");
///
/// device.close()?;
/// # Ok::<(), serial_device::DeviceError>(())
/// ```
#[derive(Debug)]
pub struct SerialDevice {
    handle: PortHandle,
    bus: ObserverBus,
    receiver: Option<ReceiveLoop>,
    receiver_settings: ReceiverSettings,
}

impl SerialDevice {
    /// Open `port_id`, apply line settings and timeouts, then discard
    /// anything already queued on the device.
    pub fn open(
        transport: &dyn Transport,
        port_id: &str,
        settings: &DeviceSettings,
    ) -> DeviceResult<Self> {
        settings.line.validate()?;
        let handle = PortHandle::open(transport, port_id)?;
        handle.apply_settings(&settings.line)?;
        handle.set_timeouts(settings.timeouts)?;
        handle.clear_buffers()?;
        info!(
            "Device {} ready at {} baud via {}",
            port_id,
            settings.line.baud_rate,
            transport.name()
        );

        Ok(Self {
            handle,
            bus: ObserverBus::new(),
            receiver: None,
            receiver_settings: settings.receiver,
        })
    }

    pub fn port_id(&self) -> &str {
        self.handle.port_id()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub fn handle(&self) -> &PortHandle {
        &self.handle
    }

    /// Subscribers fed by the receive loop.
    pub fn bus(&self) -> &ObserverBus {
        &self.bus
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ReceiveEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Start the receive loop.
    ///
    /// Fails with [`DeviceError::ReceiverRunning`] if one is already running.
    pub fn start_receiving(&mut self) -> DeviceResult<()> {
        self.start_receiving_with(CancellationToken::new())
    }

    /// Start the receive loop watching an externally owned token.
    pub fn start_receiving_with(&mut self, token: CancellationToken) -> DeviceResult<()> {
        if self.is_receiving() {
            return Err(DeviceError::ReceiverRunning);
        }
        // A loop that ended on its own is reaped before a new one starts.
        if let Some(finished) = self.receiver.take() {
            if let Err(e) = finished.stop() {
                warn!("Previous receive loop on {} ended with: {}", self.port_id(), e);
            }
        }
        let receiver = ReceiveLoop::start(
            &self.handle,
            self.bus.clone(),
            self.receiver_settings,
            token,
        )?;
        self.receiver = Some(receiver);
        Ok(())
    }

    /// Stop the receive loop, if any, and report how it ended.
    pub fn stop_receiving(&mut self) -> DeviceResult<()> {
        match self.receiver.take() {
            Some(receiver) => receiver.stop(),
            None => Ok(()),
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.receiver
            .as_ref()
            .map(ReceiveLoop::is_running)
            .unwrap_or(false)
    }

    pub fn write(&self, data: &[u8]) -> DeviceResult<usize> {
        self.handle.write(data)
    }

    pub fn write_with_timeout(&self, data: &[u8], timeout: Duration) -> DeviceResult<usize> {
        self.handle.write_with_timeout(data, timeout)
    }

    pub fn read(&self, buf: &mut [u8], timeout: Duration) -> DeviceResult<usize> {
        self.handle.read(buf, timeout)
    }

    pub fn available_bytes(&self) -> DeviceResult<usize> {
        self.handle.available_bytes()
    }

    pub fn set_baud_rate(&self, baud_rate: u32) -> DeviceResult<()> {
        self.handle.set_baud_rate(baud_rate)
    }

    pub fn set_byte_size(&self, byte_size: ByteSize) -> DeviceResult<()> {
        self.handle.set_byte_size(byte_size)
    }

    pub fn set_stop_bits(&self, stop_bits: StopBits) -> DeviceResult<()> {
        self.handle.set_stop_bits(stop_bits)
    }

    pub fn set_flow_control(&self, flow_control: FlowControl) -> DeviceResult<()> {
        self.handle.set_flow_control(flow_control)
    }

    pub fn clear_buffers(&self) -> DeviceResult<()> {
        self.handle.clear_buffers()
    }

    pub fn settings(&self) -> DeviceResult<LineSettings> {
        self.handle.settings()
    }

    pub fn line_state(&self) -> DeviceResult<LineState> {
        self.handle.line_state()
    }

    /// Stop the receive loop, then release the port. Idempotent.
    ///
    /// The port is released even if the loop reports an error; that error
    /// is returned afterwards.
    pub fn close(&mut self) -> DeviceResult<()> {
        let stopped = self.stop_receiving();
        if self.handle.is_open() {
            self.handle.close();
            debug!("Device {} closed", self.port_id());
        }
        stopped
    }
}

impl Drop for SerialDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Receive loop on {} ended with: {}", self.port_id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{LoopbackTransport, TransportError};
    use pretty_assertions::assert_eq;

    fn settings() -> DeviceSettings {
        DeviceSettings {
            receiver: ReceiverSettings::default().with_poll_interval(Duration::from_millis(50)),
            ..DeviceSettings::default()
        }
    }

    #[test]
    fn test_open_applies_configuration() {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        transport.inject("LOOP0", b"stale");

        let custom = DeviceSettings {
            line: LineSettings::default().with_baud_rate(115_200),
            ..settings()
        };
        let device = SerialDevice::open(&transport, "LOOP0", &custom).unwrap();

        let line = transport.line_state("LOOP0").unwrap();
        assert_eq!(line.baud_rate, 115_200);
        assert_eq!(line.flow_control, FlowControl::Hardware);
        assert!(line.dtr);
        assert_eq!(transport.timeouts("LOOP0"), Some(CommTimeouts::default()));
        assert_eq!(transport.purge_count("LOOP0"), 1);
        assert_eq!(device.available_bytes().unwrap(), 0);
    }

    #[test]
    fn test_open_rejects_zero_baud() {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        let bad = DeviceSettings {
            line: LineSettings::default().with_baud_rate(0),
            ..settings()
        };
        let err = SerialDevice::open(&transport, "LOOP0", &bad).unwrap_err();
        assert!(err.is_config_error());
        assert!(!transport.is_held("LOOP0"));
    }

    #[test]
    fn test_open_config_failure_releases_port() {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        transport.fail_next_set_state("LOOP0", "driver refused");

        let err = SerialDevice::open(&transport, "LOOP0", &settings()).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Config {
                source: TransportError::Injected(_),
                ..
            }
        ));
        assert!(!transport.is_held("LOOP0"));
    }

    #[test]
    fn test_second_start_is_rejected() {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        let mut device = SerialDevice::open(&transport, "LOOP0", &settings()).unwrap();

        device.start_receiving().unwrap();
        assert!(matches!(
            device.start_receiving(),
            Err(DeviceError::ReceiverRunning)
        ));
        device.stop_receiving().unwrap();
        assert!(!device.is_receiving());

        device.start_receiving().unwrap();
        assert!(device.is_receiving());
        device.close().unwrap();
    }

    #[test]
    fn test_close_stops_loop_first() {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        let mut device = SerialDevice::open(&transport, "LOOP0", &settings()).unwrap();
        device.start_receiving().unwrap();

        // Stop-then-close never surfaces a shutdown race.
        device.close().unwrap();
        assert!(!device.is_open());
        assert!(!transport.is_held("LOOP0"));
        device.close().unwrap();
    }

    #[test]
    fn test_write_reaches_subscribers() {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        let mut device = SerialDevice::open(&transport, "LOOP0", &settings()).unwrap();
        let (_id, events) = device.bus().subscribe_channel();
        device.start_receiving().unwrap();

        assert_eq!(device.write(b"AT\r").unwrap(), 3);
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.bytes, b"AT\r");
    }
}
