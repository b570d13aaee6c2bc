//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All sections are optional in the file; missing keys fall back to defaults.

use super::error::{ConfigError, ConfigResult};
use crate::device::DeviceSettings;
use crate::line::LineSettings;
use crate::port::{ByteSize, CommTimeouts, FlowControl, StopBits};
use crate::receiver::ReceiverSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Line parameters and port aliases
    pub serial: SerialConfig,
    /// Driver timing policy
    pub timeouts: TimeoutsConfig,
    /// Background receive loop
    pub receiver: ReceiverConfig,
    /// Hardware testing configuration
    pub testing: TestingConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Settings used to open a device with this configuration.
    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            line: self.serial.line_settings(),
            timeouts: self.timeouts.comm_timeouts(),
            receiver: self.receiver.receiver_settings(),
        }
    }

    /// Check values that parse but cannot be used.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_baud == 0 {
            return Err(ConfigError::validation(
                "serial.default_baud",
                "must be positive",
            ));
        }
        if self.receiver.poll_interval_ms == 0 {
            return Err(ConfigError::validation(
                "receiver.poll_interval_ms",
                "must be positive",
            ));
        }
        if self.testing.baud == 0 {
            return Err(ConfigError::validation("testing.baud", "must be positive"));
        }
        if let Some((alias, _)) = self.serial.port_aliases.iter().find(|(_, port)| port.is_empty())
        {
            return Err(ConfigError::validation(
                format!("serial.port_aliases.{}", alias),
                "target port is empty",
            ));
        }
        Ok(())
    }
}

/// Serial line configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate applied when a device is opened
    pub default_baud: u32,
    pub byte_size: ByteSize,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Assert DTR after configuring
    pub dtr: bool,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let line = LineSettings::default();
        Self {
            default_baud: line.baud_rate,
            byte_size: line.byte_size,
            stop_bits: line.stop_bits,
            flow_control: line.flow_control,
            dtr: line.dtr,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            baud_rate: self.default_baud,
            byte_size: self.byte_size,
            stop_bits: self.stop_bits,
            flow_control: self.flow_control,
            dtr: self.dtr,
        }
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Timing policy section, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub read_interval_ms: u64,
    pub read_total_constant_ms: u64,
    pub read_total_multiplier_ms: u64,
    pub write_total_constant_ms: u64,
    pub write_total_multiplier_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        let defaults = CommTimeouts::default();
        Self {
            read_interval_ms: millis(defaults.read_interval),
            read_total_constant_ms: millis(defaults.read_total_constant),
            read_total_multiplier_ms: millis(defaults.read_total_multiplier),
            write_total_constant_ms: millis(defaults.write_total_constant),
            write_total_multiplier_ms: millis(defaults.write_total_multiplier),
        }
    }
}

impl TimeoutsConfig {
    pub fn comm_timeouts(&self) -> CommTimeouts {
        CommTimeouts::default()
            .with_read_interval(Duration::from_millis(self.read_interval_ms))
            .with_read_total(
                Duration::from_millis(self.read_total_constant_ms),
                Duration::from_millis(self.read_total_multiplier_ms),
            )
            .with_write_total(
                Duration::from_millis(self.write_total_constant_ms),
                Duration::from_millis(self.write_total_multiplier_ms),
            )
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Receive loop section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Upper bound on one wait for incoming data
    pub poll_interval_ms: u64,
    /// Timeout of each drain read
    pub read_timeout_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        let defaults = ReceiverSettings::default();
        Self {
            poll_interval_ms: millis(defaults.poll_interval),
            read_timeout_ms: millis(defaults.read_timeout),
        }
    }
}

impl ReceiverConfig {
    pub fn receiver_settings(&self) -> ReceiverSettings {
        ReceiverSettings::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
    }
}

/// Hardware testing configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    /// Port with TX and RX jumpered together
    pub port: Option<String>,
    /// Test baud rate
    pub baud: u32,
    /// Whether the test port echoes what it is sent
    pub loopback_enabled: bool,
    /// Test timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 9600,
            loopback_enabled: true,
            timeout_ms: 2000,
        }
    }
}

impl TestingConfig {
    /// Get the test timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
    /// Colored output for the text formats
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            ansi: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}
