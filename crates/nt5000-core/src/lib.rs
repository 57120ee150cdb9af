//! # NT5000 Core Library
//!
//! Host and device side of the NT5000 photovoltaic inverter's RS-232 protocol.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame codec for command and response frames
//! - Framed reader with resynchronization and timeouts
//! - Command dispatcher (data, clock, serial number, firmware, error log)
//! - Device emulator for running without hardware
//! - Background poller publishing the latest reading
//!
//! ## Example
//!
//! ```rust,ignore
//! use nt5000_core::protocol::{ConnectionConfig, Dispatcher};
//!
//! let config = ConnectionConfig {
//!     port_name: "/dev/ttyUSB0".to_string(),
//!     ..ConnectionConfig::default()
//! };
//! let mut inverter = Dispatcher::open(&config)?;
//!
//! let reading = inverter.read_data_point()?;
//! println!("AC power: {:.3} kW", reading.value.ac.power);
//! ```

pub mod config;
pub mod emulator;
pub mod poller;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, ConfigError};
    pub use crate::emulator::{Dispatch, Emulator, Phase};
    pub use crate::poller::{spawn_poller, LatestReading, PollerHandle, Snapshot};
    pub use crate::protocol::{
        ClockField, ClockSetScheme, ConnectionConfig, DataPoint, DeviceClock, Dispatcher,
        ErrorLogEntry, FrameReader, MemoryTransport, Opcode, ProtocolError, ProtocolVersion,
        Reading, Transport,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
