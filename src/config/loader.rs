//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_DEVICE";

/// Config file name in the current directory
const LOCAL_FILE_NAME: &str = "serial-device.toml";

/// Config file name inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory under the platform config directory
const APP_DIR: &str = "serial-device";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_DEVICE_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_DEVICE_CONFIG` environment variable (explicit path)
    /// 2. `./serial-device.toml` (current directory)
    /// 3. `$XDG_CONFIG_HOME/serial-device/config.toml` (or `~/.config`)
    /// 4. `%APPDATA%\serial-device\config.toml` (Windows)
    /// 5. Built-in defaults (no file required)
    ///
    /// Environment variables override file values, and the result is
    /// validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;

        debug!("Configuration loaded from {:?}", config_path);
        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    ///
    /// Environment overrides that fail to parse are ignored here.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        if let Err(e) = apply_env_overrides(&mut config) {
            debug!("Ignoring environment override: {}", e);
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to file.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("No config file path set".to_string()))?;

        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(LOCAL_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. XDG config directory (Linux/macOS) or APPDATA (Windows)
    get_default_config_path().filter(|path| path.exists())
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
        _ => ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read `<prefix>_<key>` and parse it, if set.
fn env_value<T: FromStr>(key: &str, message: &str) -> ConfigResult<Option<T>> {
    let var = format!("{}_{}", ENV_PREFIX, key);
    match std::env::var(&var) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env_parse(var, message)),
        Err(_) => Ok(None),
    }
}

/// Parse an enum value the way the config file spells it.
fn env_enum<T: serde::de::DeserializeOwned>(key: &str, message: &str) -> ConfigResult<Option<T>> {
    let var = format!("{}_{}", ENV_PREFIX, key);
    match std::env::var(&var) {
        Ok(val) => {
            let value = toml::Value::String(val.trim().to_lowercase());
            value
                .try_into()
                .map(Some)
                .map_err(|_| ConfigError::env_parse(var, message))
        }
        Err(_) => Ok(None),
    }
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SERIAL_DEVICE_<SECTION>_<KEY>`
/// For example:
/// - `SERIAL_DEVICE_SERIAL_DEFAULT_BAUD=115200`
/// - `SERIAL_DEVICE_TIMEOUTS_WRITE_TOTAL_CONSTANT_MS=200`
/// - `SERIAL_DEVICE_TESTING_PORT=COM15`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let Some(val) = env_value("SERIAL_DEFAULT_BAUD", "Invalid baud rate")? {
        config.serial.default_baud = val;
    }
    if let Some(bits) = env_value::<u8>("SERIAL_BYTE_SIZE", "Expected 7 or 8")? {
        config.serial.byte_size = bits.try_into().map_err(|_| {
            ConfigError::env_parse(format!("{}_SERIAL_BYTE_SIZE", ENV_PREFIX), "Expected 7 or 8")
        })?;
    }
    if let Some(val) = env_enum(
        "SERIAL_STOP_BITS",
        "Expected one, one_point_five or two",
    )? {
        config.serial.stop_bits = val;
    }
    if let Some(val) = env_enum(
        "SERIAL_FLOW_CONTROL",
        "Expected none, software or hardware",
    )? {
        config.serial.flow_control = val;
    }
    if let Some(val) = env_value("SERIAL_DTR", "Expected true or false")? {
        config.serial.dtr = val;
    }

    // Timeout overrides
    let timeouts = &mut config.timeouts;
    for (key, slot) in [
        ("TIMEOUTS_READ_INTERVAL_MS", &mut timeouts.read_interval_ms),
        ("TIMEOUTS_READ_TOTAL_CONSTANT_MS", &mut timeouts.read_total_constant_ms),
        ("TIMEOUTS_READ_TOTAL_MULTIPLIER_MS", &mut timeouts.read_total_multiplier_ms),
        ("TIMEOUTS_WRITE_TOTAL_CONSTANT_MS", &mut timeouts.write_total_constant_ms),
        ("TIMEOUTS_WRITE_TOTAL_MULTIPLIER_MS", &mut timeouts.write_total_multiplier_ms),
    ] {
        if let Some(val) = env_value(key, "Invalid timeout")? {
            *slot = val;
        }
    }

    // Receiver overrides
    if let Some(val) = env_value("RECEIVER_POLL_INTERVAL_MS", "Invalid interval")? {
        config.receiver.poll_interval_ms = val;
    }
    if let Some(val) = env_value("RECEIVER_READ_TIMEOUT_MS", "Invalid timeout")? {
        config.receiver.read_timeout_ms = val;
    }

    // Testing overrides (also support legacy TEST_PORT etc.)
    if let Ok(val) = std::env::var(format!("{}_TESTING_PORT", ENV_PREFIX))
        .or_else(|_| std::env::var("TEST_PORT"))
    {
        config.testing.port = Some(val);
    }
    if let Ok(val) = std::env::var(format!("{}_TESTING_BAUD", ENV_PREFIX))
        .or_else(|_| std::env::var("TEST_BAUD"))
    {
        config.testing.baud = val.parse().map_err(|_| {
            ConfigError::env_parse(
                format!("{}_TESTING_BAUD or TEST_BAUD", ENV_PREFIX),
                "Invalid baud rate",
            )
        })?;
    }
    if let Ok(val) = std::env::var(format!("{}_TESTING_TIMEOUT_MS", ENV_PREFIX))
        .or_else(|_| std::env::var("TEST_TIMEOUT"))
    {
        config.testing.timeout_ms = val.parse().map_err(|_| {
            ConfigError::env_parse(
                format!("{}_TESTING_TIMEOUT_MS or TEST_TIMEOUT", ENV_PREFIX),
                "Invalid timeout",
            )
        })?;
    }
    if let Ok(val) = std::env::var("LOOPBACK_ENABLED") {
        config.testing.loopback_enabled = val.to_lowercase() == "true" || val == "1";
    }

    // Logging overrides
    if let Ok(val) = std::env::var(format!("{}_LOGGING_LEVEL", ENV_PREFIX)) {
        config.logging.level = val;
    }
    if let Some(val) = env_enum::<LogFormat>("LOGGING_FORMAT", "Expected json, pretty or compact")? {
        config.logging.format = val;
    }

    Ok(())
}

/// Get the default config directory for creating new config files.
pub fn get_default_config_dir() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join(APP_DIR))
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}
