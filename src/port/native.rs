//! Native transport backed by the `serialport` crate.
//!
//! `serialport` exposes blocking, timeout-bounded I/O rather than an
//! overlapped model, so this channel emulates one: reads complete as soon as
//! the driver has bytes queued and report `Pending` otherwise, writes run to
//! completion bounded by the write total timeout, and the notifier polls so
//! that waiters re-probe the driver at a short fixed interval.

use super::error::TransportError;
use super::notify::Notifier;
use super::traits::{
    Channel, CommTimeouts, FlowControl, IoStatus, LineState, Parity, StopBits, Transport,
};
use std::io::{Read, Write};
use std::time::Duration;

/// How often waiters re-probe a native port for arrivals.
const NATIVE_POLL: Duration = Duration::from_millis(10);

/// Map a numeric COM index to the platform's device path.
///
/// ```
/// let name = serial_device::port::port_name(22);
/// #[cfg(windows)]
/// assert_eq!(name, r"\\.\COM22");
/// #[cfg(not(windows))]
/// assert_eq!(name, "/dev/ttyS22");
/// ```
pub fn port_name(number: u16) -> String {
    #[cfg(windows)]
    {
        format!(r"\\.\COM{number}")
    }

    #[cfg(not(windows))]
    {
        format!("/dev/ttyS{number}")
    }
}

/// Enumerate serial ports known to the operating system.
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    Ok(serialport::available_ports()?)
}

/// Transport opening real serial devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTransport;

impl NativeTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for NativeTransport {
    fn name(&self) -> &str {
        "native"
    }

    fn open(&self, port_id: &str) -> Result<Box<dyn Channel>, TransportError> {
        let timeouts = CommTimeouts::default();
        let port = serialport::new(port_id, LineState::default().baud_rate)
            .timeout(timeouts.read_total_constant)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::not_found(port_id),
                serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                    TransportError::not_found(port_id)
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::busy(port_id)
                }
                _ if e.description.to_lowercase().contains("busy") => {
                    TransportError::busy(port_id)
                }
                _ => TransportError::Serial(e),
            })?;

        Ok(Box::new(NativeChannel {
            port: Some(port),
            name: port_id.to_string(),
            timeouts,
            dtr: false,
            armed: false,
            notifier: Notifier::polling(NATIVE_POLL),
        }))
    }
}

/// One open `serialport` device.
struct NativeChannel {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeouts: CommTimeouts,
    /// `serialport` can drive DTR but not read it back.
    dtr: bool,
    armed: bool,
    notifier: Notifier,
}

impl NativeChannel {
    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<IoStatus, TransportError> {
        if buf.is_empty() {
            return Ok(IoStatus::Complete(0));
        }
        let port = self.port()?;
        let queued = port.bytes_to_read()? as usize;
        if queued == 0 {
            return Ok(IoStatus::Pending);
        }
        let len = buf.len().min(queued);
        match port.read(&mut buf[..len]) {
            Ok(n) => Ok(IoStatus::Complete(n)),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(IoStatus::Pending),
            Err(e) => Err(e.into()),
        }
    }
}

fn data_bits(bits: u8) -> Result<serialport::DataBits, TransportError> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        _ => Err(TransportError::Unsupported("data bits outside 5..=8")),
    }
}

fn bits_of(bits: serialport::DataBits) -> u8 {
    match bits {
        serialport::DataBits::Five => 5,
        serialport::DataBits::Six => 6,
        serialport::DataBits::Seven => 7,
        serialport::DataBits::Eight => 8,
    }
}

impl Channel for NativeChannel {
    fn get_state(&mut self) -> Result<LineState, TransportError> {
        let dtr = self.dtr;
        let port = self.port()?;
        Ok(LineState {
            baud_rate: port.baud_rate()?,
            data_bits: bits_of(port.data_bits()?),
            stop_bits: StopBits::from(port.stop_bits()?),
            parity: Parity::from(port.parity()?),
            flow_control: FlowControl::from(port.flow_control()?),
            dtr,
        })
    }

    fn set_state(&mut self, state: &LineState) -> Result<(), TransportError> {
        let stop_bits = serialport::StopBits::try_from(state.stop_bits)?;
        let bits = data_bits(state.data_bits)?;
        let port = self.port()?;
        port.set_baud_rate(state.baud_rate)?;
        port.set_data_bits(bits)?;
        port.set_stop_bits(stop_bits)?;
        port.set_parity(state.parity.into())?;
        port.set_flow_control(state.flow_control.into())?;
        port.write_data_terminal_ready(state.dtr)?;
        self.dtr = state.dtr;
        Ok(())
    }

    fn set_timeouts(&mut self, timeouts: &CommTimeouts) -> Result<(), TransportError> {
        self.port()?.set_timeout(timeouts.read_total_constant)?;
        self.timeouts = *timeouts;
        Ok(())
    }

    fn purge(&mut self) -> Result<(), TransportError> {
        self.port()?.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    fn available_bytes(&mut self) -> Result<usize, TransportError> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn start_write(&mut self, data: &[u8]) -> Result<IoStatus, TransportError> {
        let bound = self.timeouts.write_total(data.len());
        let read_bound = self.timeouts.read_total_constant;
        let port = self.port()?;
        port.set_timeout(bound)?;

        // A timed-out write reports the bytes that made it out, like a
        // short WriteFile.
        let mut written = 0;
        let outcome = loop {
            if written == data.len() {
                break Ok(());
            }
            match port.write(&data[written..]) {
                Ok(0) => break Ok(()),
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        port.set_timeout(read_bound)?;
        outcome?;
        Ok(IoStatus::Complete(written))
    }

    fn write_result(&mut self) -> Result<IoStatus, TransportError> {
        Err(TransportError::NoPendingOperation)
    }

    fn start_read(&mut self, buf: &mut [u8]) -> Result<IoStatus, TransportError> {
        self.read_available(buf)
    }

    fn read_result(&mut self, buf: &mut [u8]) -> Result<IoStatus, TransportError> {
        self.read_available(buf)
    }

    fn arm_data_notify(&mut self) -> Result<(), TransportError> {
        self.port()?;
        self.armed = true;
        Ok(())
    }

    fn data_ready(&mut self) -> Result<bool, TransportError> {
        let armed = self.armed;
        Ok(armed && self.port()?.bytes_to_read()? > 0)
    }

    fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            self.armed = false;
            self.notifier.notify();
        }
    }
}

impl std::fmt::Debug for NativeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeChannel")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .field("baud_rate", &self.port.as_ref().and_then(|p| p.baud_rate().ok()))
            .finish()
    }
}
