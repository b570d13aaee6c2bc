//! Configuration module for serial-device.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_DEVICE_CONFIG` environment variable (explicit path)
//! 2. `./serial-device.toml` (current directory)
//! 3. `~/.config/serial-device/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\serial-device\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any configuration value can be overridden via environment variables.
//! The pattern is: `SERIAL_DEVICE_<SECTION>_<KEY>`
//!
//! Examples:
//! - `SERIAL_DEVICE_SERIAL_DEFAULT_BAUD=115200`
//! - `SERIAL_DEVICE_RECEIVER_POLL_INTERVAL_MS=100`
//! - `SERIAL_DEVICE_TESTING_PORT=COM15`
//!
//! Legacy environment variables are also supported:
//! - `TEST_PORT`, `TEST_BAUD`, `TEST_TIMEOUT`, `LOOPBACK_ENABLED`
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_device::config::ConfigLoader;
//! use serial_device::{port::NativeTransport, SerialDevice};
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! let port = config.serial.resolve_port("modem");
//!
//! let device = SerialDevice::open(&NativeTransport::new(), &port, &config.device_settings())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, LogFormat, LoggingConfig, ReceiverConfig, SerialConfig, TestingConfig,
    TimeoutsConfig,
};
