//! Command dispatcher
//!
//! Host side of the protocol: one request frame out, one response frame back.
//! The link is half-duplex, so every operation takes `&mut self`.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::codec::{
    decode_clock, decode_data_point, decode_error_log, decode_identity_string, DataPoint,
    DeviceClock, ErrorLogEntry, ProtocolVersion,
};
use super::{
    open_port, verify_checksum, ClockField, ClockSetScheme, CloseHandle, CommandFrame, FrameReader,
    Opcode, ProtocolError, ResponseFrame, SerialTransport, Transport, DEFAULT_BAUD_RATE,
    DEFAULT_TIMEOUT_MS, READ_PARAM, RESPONSE_FRAME_LEN,
};

/// Characters of the serial number response
const SERIAL_NUMBER_LEN: usize = 12;

/// Characters of the protocol/firmware response
const PROTOCOL_VERSION_LEN: usize = 6;

/// Error log slots kept by the device
pub const ERROR_LOG_SLOTS: std::ops::RangeInclusive<u8> = 1..=5;

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Response timeout in milliseconds
    pub timeout_ms: u64,
    /// Clock-set numbering of the attached device generation
    pub clock_scheme: ClockSetScheme,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            clock_scheme: ClockSetScheme::default(),
        }
    }
}

/// A raw response and whether its checksum held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// The 13 bytes as received
    pub frame: ResponseFrame,
    /// Whether the trailing checksum matched
    pub checksum_ok: bool,
}

/// A decoded value; `suspect` is set when the frame failed its checksum
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading<T> {
    /// Decoded value
    pub value: T,
    /// The response failed its checksum; the value may be wrong
    pub suspect: bool,
}

impl<T> Reading<T> {
    /// Convert the value, keeping the suspect flag
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reading<U> {
        Reading {
            value: f(self.value),
            suspect: self.suspect,
        }
    }
}

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Bytes written
    pub tx_bytes: u64,
    /// Bytes of complete responses
    pub rx_bytes: u64,
    /// Command frames written
    pub tx_frames: u64,
    /// Response frames received
    pub rx_frames: u64,
    /// Responses whose checksum did not match
    pub checksum_errors: u64,
}

/// Owns the connection to one inverter
pub struct Dispatcher<T: Transport> {
    reader: FrameReader<T>,
    scheme: ClockSetScheme,
    counters: Counters,
}

impl Dispatcher<SerialTransport> {
    /// Open the configured serial port
    pub fn open(config: &ConnectionConfig) -> Result<Self, ProtocolError> {
        info!(
            "opening {} at {} baud (8-N-1)",
            config.port_name, config.baud_rate
        );
        let transport = open_port(&config.port_name, config.baud_rate)?;
        Ok(Self::new(
            transport,
            Duration::from_millis(config.timeout_ms),
            config.clock_scheme,
        ))
    }
}

impl<T: Transport> Dispatcher<T> {
    /// Dispatcher over an already open transport
    pub fn new(transport: T, timeout: Duration, scheme: ClockSetScheme) -> Self {
        Self {
            reader: FrameReader::new(transport, timeout),
            scheme,
            counters: Counters::default(),
        }
    }

    /// Clock-set numbering in use
    pub fn scheme(&self) -> ClockSetScheme {
        self.scheme
    }

    /// Traffic counters since the dispatcher was created
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Handle that closes this connection from another thread
    pub fn close_handle(&self) -> CloseHandle {
        self.reader.close_handle()
    }

    fn send_frame(&mut self, frame: CommandFrame) -> Result<(), ProtocolError> {
        let bytes = frame.to_bytes();
        self.reader.send(&bytes)?;
        self.counters.tx_bytes = self.counters.tx_bytes.saturating_add(bytes.len() as u64);
        self.counters.tx_frames = self.counters.tx_frames.saturating_add(1);
        Ok(())
    }

    /// Send a request and wait for its 13-byte response
    ///
    /// Pending input is discarded first, so a late answer to an earlier
    /// request cannot be taken for this one.
    ///
    /// A checksum mismatch is logged and reported through
    /// [`Response::checksum_ok`]; it is not an error. Nothing is retried.
    pub fn query(&mut self, opcode: Opcode, param: u8) -> Result<Response, ProtocolError> {
        debug!("query {:?} (param {:#04x})", opcode, param);
        self.reader.discard_input()?;
        self.send_frame(CommandFrame::new(opcode.byte(), param))?;

        let bytes = self.reader.receive(RESPONSE_FRAME_LEN)?;
        self.counters.rx_bytes = self.counters.rx_bytes.saturating_add(bytes.len() as u64);
        self.counters.rx_frames = self.counters.rx_frames.saturating_add(1);

        let checksum_ok = match verify_checksum(&bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!("{:?} response is suspect: {}", opcode, e);
                self.counters.checksum_errors = self.counters.checksum_errors.saturating_add(1);
                false
            }
        };

        let frame: ResponseFrame =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| ProtocolError::MalformedFrameLength {
                    expected: RESPONSE_FRAME_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Response { frame, checksum_ok })
    }

    fn read<V>(
        &mut self,
        opcode: Opcode,
        param: u8,
        decode: impl FnOnce(&ResponseFrame) -> Result<V, ProtocolError>,
    ) -> Result<Reading<V>, ProtocolError> {
        let response = self.query(opcode, param)?;
        Ok(Reading {
            value: decode(&response.frame)?,
            suspect: !response.checksum_ok,
        })
    }

    /// Live telemetry
    pub fn read_data_point(&mut self) -> Result<Reading<DataPoint>, ProtocolError> {
        self.read(Opcode::ReadData, READ_PARAM, |f| decode_data_point(f))
    }

    /// Current device clock
    pub fn read_clock(&mut self) -> Result<Reading<DeviceClock>, ProtocolError> {
        self.read(Opcode::ReadClock, READ_PARAM, |f| decode_clock(f))
    }

    /// Device serial number
    pub fn read_serial_number(&mut self) -> Result<Reading<String>, ProtocolError> {
        self.read(Opcode::ReadSerialNumber, READ_PARAM, |f| {
            Ok(decode_identity_string(f, SERIAL_NUMBER_LEN))
        })
    }

    /// Protocol and firmware revision
    pub fn read_protocol_version(&mut self) -> Result<Reading<ProtocolVersion>, ProtocolError> {
        self.read(Opcode::ReadProtocolVersion, READ_PARAM, |f| {
            Ok(ProtocolVersion::parse(&decode_identity_string(
                f,
                PROTOCOL_VERSION_LEN,
            )))
        })
    }

    /// Entries of one error log slot (1-5)
    pub fn read_error_log(
        &mut self,
        slot: u8,
    ) -> Result<Reading<Vec<ErrorLogEntry>>, ProtocolError> {
        if !ERROR_LOG_SLOTS.contains(&slot) {
            return Err(ProtocolError::InvalidParameter(format!(
                "error log slot {slot} outside 1-5"
            )));
        }
        self.read(Opcode::ReadErrorLog, slot, |f| decode_error_log(f))
    }

    /// Send a one-way command; the device does not answer
    pub fn send_command(&mut self, frame: CommandFrame) -> Result<(), ProtocolError> {
        self.send_frame(frame)
    }

    /// Set a single clock field using the configured scheme
    pub fn set_clock_field(&mut self, field: ClockField, value: u8) -> Result<(), ProtocolError> {
        let scheme = self.scheme;
        info!("setting {} to {}", field.name(), value);
        let frame = CommandFrame::new(scheme.opcode(field), scheme.encode_value(field, value))
            .with_source(scheme.source_address());
        self.send_command(frame)
    }

    /// Set year, month, day, hour and minute, one frame each
    pub fn set_clock<D: Datelike + Timelike>(&mut self, time: &D) -> Result<(), ProtocolError> {
        let clock = DeviceClock::from_datetime(time);
        let fields = [
            (ClockField::Year, clock.year_offset),
            (ClockField::Month, clock.month),
            (ClockField::Day, clock.day),
            (ClockField::Hour, clock.hour),
            (ClockField::Minute, clock.minute),
        ];
        for (field, value) in fields {
            self.set_clock_field(field, value)?;
        }
        Ok(())
    }
}
