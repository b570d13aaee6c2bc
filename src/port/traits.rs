//! The transport contract consumed by the device layer.
//!
//! A [`Transport`] opens named ports and hands back a [`Channel`], which is
//! the exclusive native resource. Channels follow an overlapped model:
//! operations are *issued* and either complete immediately or report
//! [`IoStatus::Pending`], after which the caller polls for the result while
//! sleeping on the channel's [`Notifier`].

use super::error::TransportError;
use super::notify::Notifier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of issuing or polling an overlapped operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The operation finished and transferred this many bytes.
    Complete(usize),
    /// The operation is still in flight.
    Pending,
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteSize {
    Seven,
    Eight,
}

impl ByteSize {
    /// Width in bits.
    pub fn bits(self) -> u8 {
        match self {
            ByteSize::Seven => 7,
            ByteSize::Eight => 8,
        }
    }
}

impl TryFrom<u8> for ByteSize {
    type Error = u8;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            7 => Ok(ByteSize::Seven),
            8 => Ok(ByteSize::Eight),
            other => Err(other),
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl TryFrom<StopBits> for serialport::StopBits {
    type Error = TransportError;

    fn try_from(bits: StopBits) -> Result<Self, Self::Error> {
        match bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            StopBits::OnePointFive => Err(TransportError::Unsupported("1.5 stop bits")),
        }
    }
}

impl From<serialport::StopBits> for StopBits {
    fn from(bits: serialport::StopBits) -> Self {
        match bits {
            serialport::StopBits::One => StopBits::One,
            serialport::StopBits::Two => StopBits::Two,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<serialport::Parity> for Parity {
    fn from(parity: serialport::Parity) -> Self {
        match parity {
            serialport::Parity::None => Parity::None,
            serialport::Parity::Odd => Parity::Odd,
            serialport::Parity::Even => Parity::Even,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    /// XON/XOFF in band.
    Software,
    /// RTS/CTS handshake lines.
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

impl From<serialport::FlowControl> for FlowControl {
    fn from(flow: serialport::FlowControl) -> Self {
        match flow {
            serialport::FlowControl::None => FlowControl::None,
            serialport::FlowControl::Software => FlowControl::Software,
            serialport::FlowControl::Hardware => FlowControl::Hardware,
        }
    }
}

/// The device's full line parameter block.
///
/// Reconfiguration is always read-modify-write: the current block is read,
/// the staged fields are overlaid and the whole block is written back, so
/// fields this crate does not manage keep whatever the driver reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineState {
    pub baud_rate: u32,
    /// Raw data bits as reported by the driver (5..=8).
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Data-terminal-ready line asserted.
    pub dtr: bool,
}

impl Default for LineState {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            dtr: false,
        }
    }
}

/// Read/write timing policy pushed to the driver.
///
/// Total timeouts scale with the transfer length:
/// `constant + multiplier * len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommTimeouts {
    /// Maximum gap between two received bytes.
    pub read_interval: Duration,
    pub read_total_constant: Duration,
    pub read_total_multiplier: Duration,
    pub write_total_constant: Duration,
    pub write_total_multiplier: Duration,
}

impl Default for CommTimeouts {
    fn default() -> Self {
        Self {
            read_interval: Duration::from_millis(50),
            read_total_constant: Duration::from_millis(50),
            read_total_multiplier: Duration::from_millis(10),
            write_total_constant: Duration::from_millis(50),
            write_total_multiplier: Duration::from_millis(10),
        }
    }
}

impl CommTimeouts {
    /// Upper bound for reading `len` bytes.
    pub fn read_total(&self, len: usize) -> Duration {
        self.read_total_constant + scale(self.read_total_multiplier, len)
    }

    /// Upper bound for writing `len` bytes.
    pub fn write_total(&self, len: usize) -> Duration {
        self.write_total_constant + scale(self.write_total_multiplier, len)
    }

    pub fn with_read_interval(mut self, interval: Duration) -> Self {
        self.read_interval = interval;
        self
    }

    pub fn with_read_total(mut self, constant: Duration, multiplier: Duration) -> Self {
        self.read_total_constant = constant;
        self.read_total_multiplier = multiplier;
        self
    }

    pub fn with_write_total(mut self, constant: Duration, multiplier: Duration) -> Self {
        self.write_total_constant = constant;
        self.write_total_multiplier = multiplier;
        self
    }
}

fn scale(per_byte: Duration, len: usize) -> Duration {
    per_byte.saturating_mul(u32::try_from(len).unwrap_or(u32::MAX))
}

/// Opens ports by identifier.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Short transport name used in logs.
    fn name(&self) -> &str;

    /// Request exclusive read/write access to `port_id`.
    ///
    /// Fails with [`TransportError::NotFound`] if the port does not exist
    /// and [`TransportError::Busy`] if someone else holds it.
    fn open(&self, port_id: &str) -> Result<Box<dyn Channel>, TransportError>;
}

/// One open native port.
///
/// Every method is non-blocking apart from bounded driver calls; callers
/// serialize access and do their waiting on [`Channel::notifier`].
#[cfg_attr(test, mockall::automock)]
pub trait Channel: Send {
    /// Read the device's current parameter block.
    fn get_state(&mut self) -> Result<LineState, TransportError>;

    /// Write a full parameter block.
    fn set_state(&mut self, state: &LineState) -> Result<(), TransportError>;

    /// Push the timing policy to the driver.
    fn set_timeouts(&mut self, timeouts: &CommTimeouts) -> Result<(), TransportError>;

    /// Discard buffered bytes in both directions.
    fn purge(&mut self) -> Result<(), TransportError>;

    /// Bytes received and ready to read.
    fn available_bytes(&mut self) -> Result<usize, TransportError>;

    /// Issue a write of `data`.
    fn start_write(&mut self, data: &[u8]) -> Result<IoStatus, TransportError>;

    /// Poll the outstanding write.
    fn write_result(&mut self) -> Result<IoStatus, TransportError>;

    /// Issue a read of up to `buf.len()` bytes. On immediate completion the
    /// bytes are in `buf`.
    fn start_read(&mut self, buf: &mut [u8]) -> Result<IoStatus, TransportError>;

    /// Poll the outstanding read, copying completed bytes into `buf`.
    fn read_result(&mut self, buf: &mut [u8]) -> Result<IoStatus, TransportError>;

    /// Ask the driver to report data arrival.
    fn arm_data_notify(&mut self) -> Result<(), TransportError>;

    /// Whether received data is waiting. Only meaningful once armed.
    fn data_ready(&mut self) -> Result<bool, TransportError>;

    /// Signal woken on arrival, completion and close.
    fn notifier(&self) -> Notifier;

    /// Release the native resource.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = CommTimeouts::default();
        assert_eq!(timeouts.read_interval, Duration::from_millis(50));
        assert_eq!(timeouts.read_total(0), Duration::from_millis(50));
        assert_eq!(timeouts.read_total(16), Duration::from_millis(210));
        assert_eq!(timeouts.write_total(5), Duration::from_millis(100));
    }

    #[test]
    fn test_timeouts_overrides() {
        let timeouts = CommTimeouts::default()
            .with_read_interval(Duration::from_millis(5))
            .with_write_total(Duration::from_millis(200), Duration::ZERO);
        assert_eq!(timeouts.read_interval, Duration::from_millis(5));
        assert_eq!(timeouts.write_total(1000), Duration::from_millis(200));
    }

    #[test]
    fn test_byte_size_conversion() {
        assert_eq!(ByteSize::try_from(7), Ok(ByteSize::Seven));
        assert_eq!(ByteSize::try_from(8), Ok(ByteSize::Eight));
        assert_eq!(ByteSize::try_from(5), Err(5));
        assert_eq!(ByteSize::Seven.bits(), 7);
    }

    #[test]
    fn test_stop_bits_conversion() {
        let bits: serialport::StopBits = StopBits::Two.try_into().unwrap();
        assert_eq!(bits, serialport::StopBits::Two);

        let result: Result<serialport::StopBits, _> = StopBits::OnePointFive.try_into();
        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }

    #[test]
    fn test_flow_control_conversion() {
        let flow: serialport::FlowControl = FlowControl::Hardware.into();
        assert_eq!(flow, serialport::FlowControl::Hardware);
        assert_eq!(FlowControl::from(flow), FlowControl::Hardware);
    }

    #[test]
    fn test_parity_conversion() {
        let parity: serialport::Parity = Parity::Even.into();
        assert_eq!(parity, serialport::Parity::Even);
    }
}
