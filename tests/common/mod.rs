//! Shared test utilities for serial-device integration tests.
//!
//! This module provides common test infrastructure including:
//! - Loop-back transports with ready-made ports
//! - Device settings tuned for fast tests
//! - Collection of published events with deadlines

#![allow(dead_code)]

use serial_device::config::{LogFormat, LoggingConfig};
use serial_device::{
    DeviceSettings, LoopbackTransport, ReceiveEvent, ReceiverSettings, SerialDevice,
};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

/// Default port name used by loop-back tests.
pub const PORT: &str = "LOOP0";

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Route library logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    serial_device::logging::init(&LoggingConfig {
        level: "debug".to_string(),
        format: LogFormat::Compact,
        ansi: false,
    });
}

/// Create a loop-back transport exposing the given ports.
///
/// # Example
/// ```ignore
/// let transport = loopback(&["LOOP0", "LOOP1"]);
/// ```
pub fn loopback(ports: &[&str]) -> LoopbackTransport {
    let transport = LoopbackTransport::new();
    for port in ports {
        transport.add_port(*port);
    }
    transport
}

/// Device settings with a short receive poll interval.
pub fn fast_settings() -> DeviceSettings {
    DeviceSettings {
        receiver: ReceiverSettings::default().with_poll_interval(Duration::from_millis(50)),
        ..DeviceSettings::default()
    }
}

/// Open `PORT` on a fresh loop-back transport.
pub fn open_device(settings: &DeviceSettings) -> (LoopbackTransport, SerialDevice) {
    let transport = loopback(&[PORT]);
    let device = SerialDevice::open(&transport, PORT, settings).expect("open loop-back device");
    (transport, device)
}

/// Concatenate published events until `expected` bytes arrived or the
/// deadline passes.
pub fn collect_bytes(events: &Receiver<ReceiveEvent>, expected: usize, timeout: Duration) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut bytes = Vec::with_capacity(expected);
    while bytes.len() < expected {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match events.recv_timeout(deadline - now) {
            Ok(event) => bytes.extend_from_slice(&event.bytes),
            Err(_) => break,
        }
    }
    bytes
}

/// Assert that `elapsed` lies within `expected` plus `tolerance`.
pub fn assert_duration_within(elapsed: Duration, expected: Duration, tolerance: Duration) {
    assert!(
        elapsed <= expected + tolerance,
        "took {:?}, expected at most {:?} (+{:?})",
        elapsed,
        expected,
        tolerance
    );
}
