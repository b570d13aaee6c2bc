//! Tracing subscriber setup for binaries and tests.
//!
//! `RUST_LOG` wins over the configured level when set.
//!
//! ```no_run
//! use serial_device::config::LoggingConfig;
//!
//! serial_device::logging::init(&LoggingConfig::default());
//! tracing::info!("Monitor started");
//! ```

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the global subscriber described by `config`.
///
/// Returns `false` if a subscriber was already installed, in which case the
/// existing one is kept. Calling this more than once is harmless.
pub fn init(config: &LoggingConfig) -> bool {
    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_names(true)
            .with_ansi(config.ansi)
            .with_filter(filter(config))
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_thread_names(true)
            .with_ansi(config.ansi)
            .with_filter(filter(config))
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_thread_names(true)
            .with_filter(filter(config))
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init().is_ok()
}
