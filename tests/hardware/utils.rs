//! Utility functions for hardware testing.
//!
//! Provides helpers for port discovery, test setup/teardown, and timing utilities.

use serial_device::config::ConfigLoader;
use serial_device::{DeviceSettings, LineSettings, NativeTransport, SerialDevice};
use serialport::{available_ports, SerialPortInfo, SerialPortType};
use std::time::{Duration, Instant};

/// Test port configuration from environment.
pub struct TestPortConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub loopback_enabled: bool,
    pub timeout: Duration,
}

impl TestPortConfig {
    /// Read `TEST_PORT` / `TEST_BAUD` (or their `SERIAL_DEVICE_TESTING_*`
    /// forms) through the configuration loader.
    pub fn from_env() -> Option<Self> {
        let testing = ConfigLoader::with_defaults().into_config().testing;
        let port_name = testing.port.clone()?;

        Some(TestPortConfig {
            port_name,
            baud_rate: testing.baud,
            loopback_enabled: testing.loopback_enabled,
            timeout: testing.timeout(),
        })
    }

    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            line: LineSettings::default().with_baud_rate(self.baud_rate),
            ..DeviceSettings::default()
        }
    }
}

/// Discover all available serial ports on the system.
pub fn discover_available_ports() -> Vec<SerialPortInfo> {
    available_ports().unwrap_or_default()
}

/// Print available ports for debugging.
pub fn print_available_ports() {
    let ports = discover_available_ports();

    if ports.is_empty() {
        println!("No serial ports detected on this system");
        return;
    }

    println!("Available serial ports ({}):", ports.len());
    for (idx, port) in ports.iter().enumerate() {
        println!("  {}. {}", idx + 1, port.port_name);

        if let SerialPortType::UsbPort(usb_info) = &port.port_type {
            println!("     VID:PID = {:04x}:{:04x}", usb_info.vid, usb_info.pid);
            if let Some(ref product) = usb_info.product {
                println!("     Product: {}", product);
            }
        }
    }
}

/// Timing helper for measuring operation duration.
pub struct TimingHelper {
    start: Instant,
    name: String,
}

impl TimingHelper {
    pub fn new(name: &str) -> Self {
        println!("⏱️  Starting: {}", name);
        TimingHelper {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        println!("✅ Completed: {} in {:?}", self.name, elapsed);
        elapsed
    }
}

/// An opened hardware device plus the configuration it came from.
pub struct DeviceFixture {
    pub device: SerialDevice,
    pub config: TestPortConfig,
}

impl DeviceFixture {
    /// Open the configured test port, or `None` if no port is configured.
    pub fn setup() -> Option<Self> {
        let config = match TestPortConfig::from_env() {
            Some(config) => config,
            None => {
                println!("⏭️  Skipping: TEST_PORT not set");
                print_available_ports();
                return None;
            }
        };

        println!(
            "Setting up device fixture for {} at {} baud",
            config.port_name, config.baud_rate
        );
        let device = SerialDevice::open(
            &NativeTransport::new(),
            &config.port_name,
            &config.device_settings(),
        )
        .unwrap_or_else(|e| panic!("Failed to open {}: {}", config.port_name, e));

        Some(DeviceFixture { device, config })
    }
}
