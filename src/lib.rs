//! Serial Device Library
//!
//! An owned handle onto a serial line with overlapped reads and writes, line
//! configuration, and a background receive loop that publishes incoming
//! bytes to subscribers.
//!
//! # Modules
//!
//! - `port`: Transport contract plus the native and loop-back transports
//! - `handle`: Exclusive ownership of one open port
//! - `line`: Line settings and their application to a handle
//! - `io`: Overlapped read/write engine
//! - `receiver`: Background receive loop
//! - `observer`: Subscriber fan-out for received data
//! - `device`: Handle, bus and loop bundled with the correct teardown order
//! - `config`: Configuration management with TOML support
//! - `logging`: Tracing subscriber setup
//! - `error`: Device error taxonomy

pub mod config;
pub mod device;
pub mod error;
pub mod handle;
pub mod io;
pub mod line;
pub mod logging;
pub mod observer;
pub mod port;
pub mod receiver;

// Re-export commonly used types for convenience
pub use device::{DeviceSettings, SerialDevice};
pub use error::{DeviceError, DeviceResult, Operation};
pub use handle::PortHandle;
pub use io::OperationState;
pub use line::LineSettings;
pub use observer::{ObserverBus, ReceiveEvent, SubscriptionId};
pub use port::{
    ByteSize, CommTimeouts, FlowControl, LineState, LoopbackTransport, NativeTransport, Parity,
    StopBits, Transport, TransportError,
};
pub use receiver::{CancellationToken, ReceiveLoop, ReceiverSettings, ReceiverState};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
