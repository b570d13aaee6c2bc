//! Tests requiring actual serial hardware.
//!
//! # Running Hardware Tests
//!
//! ```bash
//! # Set environment variables
//! export TEST_PORT=COM3                  # or /dev/ttyUSB0 on Linux
//! export TEST_BAUD=9600                  # optional, default: 9600
//! export LOOPBACK_ENABLED=1              # if port has TX-RX loopback
//!
//! # Run tests
//! cargo test --features hardware-tests -- --ignored
//! ```

use serial_device::{DeviceError, NativeTransport, SerialDevice, StopBits, TransportError};
use std::time::Duration;

use crate::hardware::utils::{DeviceFixture, TimingHelper};

#[test]
#[ignore] // Requires hardware
fn test_real_port_open_close() {
    let Some(mut fixture) = DeviceFixture::setup() else {
        return;
    };

    assert!(fixture.device.is_open());
    fixture.device.close().expect("close");
    fixture.device.close().expect("second close is a no-op");
    assert!(!fixture.device.is_open());

    // The port is free again.
    let reopened = SerialDevice::open(
        &NativeTransport::new(),
        &fixture.config.port_name,
        &fixture.config.device_settings(),
    );
    assert!(reopened.is_ok(), "reopen failed: {:?}", reopened.err());
}

#[test]
#[ignore] // Requires hardware
fn test_real_port_held_exclusively() {
    let Some(fixture) = DeviceFixture::setup() else {
        return;
    };

    let second = SerialDevice::open(
        &NativeTransport::new(),
        &fixture.config.port_name,
        &fixture.config.device_settings(),
    );
    match second {
        Err(DeviceError::Open { .. }) => {}
        // Some Unix drivers allow a second open; nothing to assert there.
        Ok(_) => println!("⚠️  Driver allowed a second open"),
        Err(e) => panic!("Unexpected error: {}", e),
    }
}

#[test]
#[ignore] // Requires hardware
fn test_real_port_baud_read_back() {
    let Some(fixture) = DeviceFixture::setup() else {
        return;
    };

    for baud in [9600, 19200, 57600, 115200] {
        fixture.device.set_baud_rate(baud).expect("set baud");
        assert_eq!(fixture.device.line_state().expect("read back").baud_rate, baud);
    }
}

#[test]
#[ignore] // Requires hardware
fn test_real_port_one_point_five_stop_bits() {
    let Some(fixture) = DeviceFixture::setup() else {
        return;
    };

    let err = fixture
        .device
        .set_stop_bits(StopBits::OnePointFive)
        .unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Config {
            source: TransportError::Unsupported(_),
            ..
        }
    ));
}

#[test]
#[ignore] // Requires loopback hardware
fn test_real_port_ate0_round_trip() {
    let Some(mut fixture) = DeviceFixture::setup() else {
        return;
    };
    if !fixture.config.loopback_enabled {
        println!("⏭️  Skipping: LOOPBACK_ENABLED not set");
        return;
    }

    let (_id, events) = fixture.device.bus().subscribe_channel();
    fixture.device.start_receiving().expect("start loop");

    let timer = TimingHelper::new("ATE0 round trip");
    assert_eq!(fixture.device.write(b"ATE0\r").expect("write"), 5);

    let event = events
        .recv_timeout(fixture.config.timeout.max(Duration::from_secs(2)))
        .expect("no data received");
    assert!(!event.bytes.is_empty());
    timer.finish();

    fixture.device.close().expect("close");
}
