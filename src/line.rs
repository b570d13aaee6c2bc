//! Line configuration: staged settings and their application to a handle.
//!
//! Every setter stages one field and re-applies the whole configuration as a
//! read-modify-write of the device parameter block. If the apply fails the
//! device may be left partially configured; the error says so and
//! [`PortHandle::line_state`] re-reads what the device actually holds.

use crate::error::{DeviceError, DeviceResult};
use crate::handle::{Native, Port, PortHandle};
use crate::port::{ByteSize, CommTimeouts, FlowControl, LineState, Parity, StopBits};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Line parameters staged on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSettings {
    /// Baud rate (bits per second). Must be positive.
    pub baud_rate: u32,
    pub byte_size: ByteSize,
    pub stop_bits: StopBits,
    /// RTS/CTS hardware handshake by default; XON/XOFF is never enabled
    /// alongside it.
    pub flow_control: FlowControl,
    /// Assert DTR once configured.
    pub dtr: bool,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            byte_size: ByteSize::Eight,
            stop_bits: StopBits::One,
            flow_control: FlowControl::Hardware,
            dtr: true,
        }
    }
}

impl LineSettings {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_byte_size(mut self, byte_size: ByteSize) -> Self {
        self.byte_size = byte_size;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Reject values no device can accept.
    pub fn validate(&self) -> DeviceResult<()> {
        if self.baud_rate == 0 {
            return Err(DeviceError::invalid("baud_rate", "must be positive"));
        }
        Ok(())
    }

    /// Overlay these settings onto a parameter block read from the device.
    /// Parity is always none.
    pub fn overlay(&self, state: &mut LineState) {
        state.baud_rate = self.baud_rate;
        state.data_bits = self.byte_size.bits();
        state.stop_bits = self.stop_bits;
        state.parity = Parity::None;
        state.flow_control = self.flow_control;
        state.dtr = self.dtr;
    }
}

impl Native {
    fn apply_settings(&mut self, port_id: &str) -> DeviceResult<()> {
        let mut state = self.channel.get_state().map_err(|source| {
            warn!("Unable to retrieve settings of {}: {}", port_id, source);
            DeviceError::config(port_id, source)
        })?;
        self.settings.overlay(&mut state);
        trace!("Applying {:?} to {}", state, port_id);

        self.channel.set_state(&state).map_err(|source| {
            warn!("Unable to apply settings to {}: {}", port_id, source);
            DeviceError::config(port_id, source)
        })
    }
}

impl Port {
    fn stage(&self, stage: impl FnOnce(&mut LineSettings)) -> DeviceResult<()> {
        self.with_native(|native| {
            stage(&mut native.settings);
            native.settings.validate()?;
            native.apply_settings(self.port_id())
        })
    }

    fn push_timeouts(&self, timeouts: Option<CommTimeouts>) -> DeviceResult<()> {
        self.with_native(|native| {
            if let Some(timeouts) = timeouts {
                native.timeouts = timeouts;
            }
            native
                .channel
                .set_timeouts(&native.timeouts)
                .map_err(|source| {
                    warn!("Unable to apply timeouts to {}: {}", self.port_id(), source);
                    DeviceError::config(self.port_id(), source)
                })
        })
    }
}

impl PortHandle {
    /// Stage a new baud rate and re-apply the configuration.
    ///
    /// A zero rate is rejected without touching the device.
    pub fn set_baud_rate(&self, baud_rate: u32) -> DeviceResult<()> {
        if baud_rate == 0 {
            return Err(DeviceError::invalid("baud_rate", "must be positive"));
        }
        debug!("Setting baud rate of {} to {}", self.port_id(), baud_rate);
        self.port.stage(|settings| settings.baud_rate = baud_rate)
    }

    /// Stage a new byte size and re-apply the configuration.
    pub fn set_byte_size(&self, byte_size: ByteSize) -> DeviceResult<()> {
        debug!("Setting byte size of {} to {}", self.port_id(), byte_size.bits());
        self.port.stage(|settings| settings.byte_size = byte_size)
    }

    /// Stage new stop bits and re-apply the configuration.
    pub fn set_stop_bits(&self, stop_bits: StopBits) -> DeviceResult<()> {
        debug!("Setting stop bits of {} to {:?}", self.port_id(), stop_bits);
        self.port.stage(|settings| settings.stop_bits = stop_bits)
    }

    /// Stage a new flow control mode and re-apply the configuration.
    pub fn set_flow_control(&self, flow_control: FlowControl) -> DeviceResult<()> {
        debug!("Setting flow control of {} to {:?}", self.port_id(), flow_control);
        self.port.stage(|settings| settings.flow_control = flow_control)
    }

    /// Stage every field at once and apply them in a single transaction.
    pub fn apply_settings(&self, settings: &LineSettings) -> DeviceResult<()> {
        settings.validate()?;
        debug!("Applying {:?} to {}", settings, self.port_id());
        self.port.stage(|staged| *staged = *settings)
    }

    /// The staged settings. These are what was requested, not necessarily
    /// what the device holds after a failed apply.
    pub fn settings(&self) -> DeviceResult<LineSettings> {
        self.port.with_native(|native| Ok(native.settings))
    }

    /// Re-read the device's parameter block.
    pub fn line_state(&self) -> DeviceResult<LineState> {
        self.port.with_native(|native| {
            native
                .channel
                .get_state()
                .map_err(|source| DeviceError::config(self.port_id(), source))
        })
    }

    /// Push the staged timing policy to the driver.
    pub fn apply_timeouts(&self) -> DeviceResult<()> {
        self.port.push_timeouts(None)
    }

    /// Replace the timing policy and push it to the driver. The policy also
    /// bounds [`PortHandle::write`].
    pub fn set_timeouts(&self, timeouts: CommTimeouts) -> DeviceResult<()> {
        self.port.push_timeouts(Some(timeouts))
    }

    /// The staged timing policy.
    pub fn timeouts(&self) -> DeviceResult<CommTimeouts> {
        self.port.with_native(|native| Ok(native.timeouts))
    }

    /// Discard unconsumed bytes in both directions.
    ///
    /// The purge also abandons any outstanding read or write, so both
    /// directions return to [`OperationState::Idle`](crate::OperationState).
    pub fn clear_buffers(&self) -> DeviceResult<()> {
        self.port.with_native(|native| {
            native.channel.purge().map_err(|source| {
                warn!("Unable to clear {}: {}", self.port_id(), source);
                DeviceError::config(self.port_id(), source)
            })?;
            native.read_op = Default::default();
            native.write_op = Default::default();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{LoopbackTransport, MockChannel, Notifier, Transport, TransportError};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::time::Duration;

    fn loopback() -> (LoopbackTransport, PortHandle) {
        let transport = LoopbackTransport::new().with_port("LOOP0");
        let handle = PortHandle::open(&transport, "LOOP0").unwrap();
        (transport, handle)
    }

    #[derive(Debug)]
    struct SingleChannel(parking_lot::Mutex<Option<MockChannel>>);

    impl Transport for SingleChannel {
        fn name(&self) -> &str {
            "mock"
        }

        fn open(&self, port_id: &str) -> Result<Box<dyn crate::port::Channel>, TransportError> {
            match self.0.lock().take() {
                Some(channel) => Ok(Box::new(channel)),
                None => Err(TransportError::busy(port_id)),
            }
        }
    }

    fn mock_handle(channel: MockChannel) -> PortHandle {
        let transport = SingleChannel(parking_lot::Mutex::new(Some(channel)));
        PortHandle::open(&transport, "MOCK0").unwrap()
    }

    #[test]
    fn test_default_settings() {
        let settings = LineSettings::default();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.byte_size, ByteSize::Eight);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.flow_control, FlowControl::Hardware);
        assert!(settings.dtr);
    }

    #[test]
    fn test_overlay_forces_no_parity() {
        let mut state = LineState {
            parity: Parity::Even,
            ..LineState::default()
        };
        LineSettings::default().with_baud_rate(115_200).overlay(&mut state);

        assert_eq!(state.baud_rate, 115_200);
        assert_eq!(state.parity, Parity::None);
        assert_eq!(state.flow_control, FlowControl::Hardware);
        assert!(state.dtr);
    }

    #[test]
    fn test_set_baud_rate_reads_back() {
        let (transport, handle) = loopback();
        handle.set_baud_rate(115_200).unwrap();

        assert_eq!(handle.line_state().unwrap().baud_rate, 115_200);
        assert_eq!(handle.settings().unwrap().baud_rate, 115_200);
        assert_eq!(transport.line_state("LOOP0").unwrap().baud_rate, 115_200);
    }

    #[test]
    fn test_zero_baud_rejected_without_touching_device() {
        let (transport, handle) = loopback();
        let before = transport.line_state("LOOP0").unwrap();

        let err = handle.set_baud_rate(0).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidSetting { name: "baud_rate", .. }));
        assert_eq!(transport.line_state("LOOP0").unwrap(), before);
    }

    #[test]
    fn test_byte_and_stop_bits_apply() {
        let (_transport, handle) = loopback();
        handle.set_byte_size(ByteSize::Seven).unwrap();
        handle.set_stop_bits(StopBits::OnePointFive).unwrap();

        let state = handle.line_state().unwrap();
        assert_eq!(state.data_bits, 7);
        assert_eq!(state.stop_bits, StopBits::OnePointFive);
        assert_eq!(handle.settings().unwrap().stop_bits, StopBits::OnePointFive);
    }

    #[test]
    fn test_apply_failure_is_surfaced_and_staged_value_kept() {
        let (transport, handle) = loopback();
        transport.fail_next_set_state("LOOP0", "DCB rejected");

        let err = handle.set_baud_rate(57_600).unwrap_err();
        assert!(matches!(err, DeviceError::Config { .. }));
        assert_eq!(handle.settings().unwrap().baud_rate, 57_600);
        assert_eq!(handle.line_state().unwrap().baud_rate, 9600);
    }

    #[test]
    fn test_line_state_surfaces_read_failure() {
        let (transport, handle) = loopback();
        transport.fail_next_get_state("LOOP0", "GetCommState failed");

        let err = handle.line_state().unwrap_err();
        assert!(err.is_config_error());
        assert!(matches!(
            err,
            DeviceError::Config {
                source: TransportError::Injected(_),
                ..
            }
        ));
        // The fault is one-shot.
        assert_eq!(handle.line_state().unwrap().baud_rate, 9600);
    }

    #[test]
    fn test_get_state_failure_skips_write() {
        let mut channel = MockChannel::new();
        channel.expect_notifier().return_const(Notifier::new());
        channel
            .expect_get_state()
            .times(1)
            .returning(|| Err(TransportError::injected("GetCommState failed")));
        channel.expect_set_state().never();
        channel.expect_close().return_const(());

        let handle = mock_handle(channel);
        let err = handle.set_byte_size(ByteSize::Seven).unwrap_err();
        assert!(matches!(err, DeviceError::Config { ref port, .. } if port == "MOCK0"));
    }

    #[test]
    fn test_apply_is_read_modify_write() {
        let mut channel = MockChannel::new();
        channel.expect_notifier().return_const(Notifier::new());
        channel.expect_get_state().times(1).returning(|| {
            Ok(LineState {
                baud_rate: 1200,
                data_bits: 8,
                stop_bits: StopBits::Two,
                parity: Parity::Odd,
                flow_control: FlowControl::Software,
                dtr: false,
            })
        });
        channel
            .expect_set_state()
            .withf(|state| {
                state.baud_rate == 38_400
                    && state.parity == Parity::None
                    && state.flow_control == FlowControl::Hardware
                    && state.stop_bits == StopBits::One
            })
            .times(1)
            .returning(|_| Ok(()));
        channel.expect_close().return_const(());

        let handle = mock_handle(channel);
        handle.set_baud_rate(38_400).unwrap();
    }

    #[test]
    fn test_timeouts_are_overridable() {
        let (transport, handle) = loopback();
        handle.apply_timeouts().unwrap();
        assert_eq!(transport.timeouts("LOOP0"), Some(CommTimeouts::default()));

        let custom = CommTimeouts::default().with_read_interval(Duration::from_millis(5));
        handle.set_timeouts(custom).unwrap();
        assert_eq!(transport.timeouts("LOOP0"), Some(custom));
        assert_eq!(handle.timeouts().unwrap(), custom);
    }

    #[test]
    fn test_available_zero_after_clear() {
        let (transport, handle) = loopback();
        transport.inject("LOOP0", b"stale");

        handle.clear_buffers().unwrap();
        assert_eq!(handle.available_bytes().unwrap(), 0);
    }

    proptest! {
        #[test]
        fn prop_baud_rate_reads_back(rate in 1u32..=4_000_000) {
            let (_transport, handle) = loopback();
            handle.set_baud_rate(rate).unwrap();
            prop_assert_eq!(handle.line_state().unwrap().baud_rate, rate);
        }
    }
}
