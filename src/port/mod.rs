//! Port abstraction layer for serial communication.
//!
//! A [`Transport`] opens [`Channel`]s: the overlapped, issue-then-poll
//! primitive the device layer builds on. [`NativeTransport`] talks to real
//! hardware through `serialport`; [`LoopbackTransport`] is an in-memory
//! stand-in with echo and fault injection for tests.

pub mod error;
pub mod loopback;
pub mod native;
pub mod notify;
pub mod traits;

pub use error::TransportError;
pub use loopback::LoopbackTransport;
pub use native::{list_ports, port_name, NativeTransport};
pub use notify::Notifier;
pub use traits::{
    ByteSize, Channel, CommTimeouts, FlowControl, IoStatus, LineState, Parity, StopBits,
    Transport,
};

#[cfg(test)]
pub use traits::MockChannel;
