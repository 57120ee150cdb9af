//! Serial Protocol Communication
//!
//! Implements the NT5000 RS-232 protocol: fixed-length frames terminated by
//! an additive checksum, exchanged half-duplex between a host and the
//! inverter.
//!
//! Command frames (host to device) are 5 bytes `[dest, src, opcode, param, checksum]`,
//! response frames (device to host) are 13 bytes `[b0..b11, checksum]`.

pub mod codec;
pub mod commands;
mod dispatcher;
mod error;
pub mod frame;
mod reader;
pub mod serial;
pub mod transport;

pub use codec::{DataPoint, DeviceClock, ErrorLogEntry, Measurement, ProtocolVersion};
pub use commands::{ClockField, ClockSetScheme, Opcode};
pub use dispatcher::{ConnectionConfig, Counters, Dispatcher, Reading, Response, ERROR_LOG_SLOTS};
pub use error::ProtocolError;
pub use frame::{checksum_of, verify_checksum, CommandFrame, ResponseFrame};
pub use reader::{CloseHandle, FrameReader, Resync};
pub use serial::{list_ports, open_port, PortInfo, UsbAdapter};
pub use transport::{MemoryTransport, SerialTransport, TcpTransport, Transport};

/// Default baud rate of the inverter's RS-232 port (8-N-1)
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default timeout for a complete frame in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Length of a host-to-device command frame
pub const COMMAND_FRAME_LEN: usize = 5;

/// Length of a device-to-host response frame
pub const RESPONSE_FRAME_LEN: usize = 13;

/// Destination address every command frame starts with
pub const FRAME_START: u8 = 0x00;

/// Source address of the host
pub const HOST_ADDRESS: u8 = 0x01;

/// Filler byte the device uses to terminate or blank out response fields
pub const PAD_MARKER: u8 = 0x0d;

/// Parameter byte the host sends with plain read commands
pub const READ_PARAM: u8 = 0x01;
