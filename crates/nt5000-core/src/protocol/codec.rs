//! Response frame codec
//!
//! Converts 13-byte response frames to and from structured values. Telemetry
//! is carried as fixed-point bytes with a per-field linear scaling, so
//! encoding is lossy by one quantisation step per field.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use super::frame::{seal, ResponseFrame};
use super::{ProtocolError, PAD_MARKER, RESPONSE_FRAME_LEN};

/// Scale of the DC voltage byte in volts
pub const DC_VOLTAGE_SCALE: f64 = 2.8;
/// Offset of the DC voltage byte in volts
pub const DC_VOLTAGE_OFFSET: f64 = 100.0;
/// Scale of the DC current byte in amperes
pub const DC_CURRENT_SCALE: f64 = 0.08;
/// Offset of the AC voltage byte in volts (scale 1)
pub const AC_VOLTAGE_OFFSET: f64 = 100.0;
/// Scale of the AC current byte in amperes
pub const AC_CURRENT_SCALE: f64 = 0.12;
/// Offset of the temperature byte in °C (scale 1)
pub const TEMPERATURE_OFFSET: f64 = 40.0;
/// Scale of the heat flux byte in W/m²
pub const HEAT_FLUX_SCALE: f64 = 6.0;
/// Resolution of the daily energy counter in kWh
pub const ENERGY_TODAY_SCALE: f64 = 0.001;

/// Voltage, current and the power derived from them
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurement {
    /// Volts
    pub voltage: f64,
    /// Amperes
    pub current: f64,
    /// Kilowatts
    pub power: f64,
}

impl Measurement {
    /// Measurement with power derived as `voltage * current / 1000`
    pub fn new(voltage: f64, current: f64) -> Self {
        Self {
            voltage,
            current,
            power: voltage * current / 1000.0,
        }
    }
}

/// One telemetry snapshot of the inverter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// When the reading was decoded
    pub timestamp: DateTime<Local>,
    /// PV array side
    pub dc: Measurement,
    /// Grid side
    pub ac: Measurement,
    /// Device temperature in °C
    pub temperature: f64,
    /// Irradiance sensor in W/m²
    pub heat_flux: f64,
    /// Energy harvested today in kWh
    pub energy_today: f64,
    /// Energy harvested in total in kWh
    pub energy_total: f64,
}

impl DataPoint {
    /// All-zero reading, used in place of an undecodable frame
    pub fn zero(timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            dc: Measurement::default(),
            ac: Measurement::default(),
            temperature: 0.0,
            heat_flux: 0.0,
            energy_today: 0.0,
            energy_total: 0.0,
        }
    }
}

/// Date and time fields as kept by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceClock {
    /// Years since 2000
    pub year_offset: u8,
    /// Month 1-12
    pub month: u8,
    /// Day of month
    pub day: u8,
    /// Hour 0-23
    pub hour: u8,
    /// Minute 0-59
    pub minute: u8,
}

impl DeviceClock {
    /// Clock fields of a local date and time
    pub fn from_datetime<T: Datelike + Timelike>(time: &T) -> Self {
        Self {
            year_offset: (time.year() - 2000).clamp(0, i32::from(u8::MAX)) as u8,
            month: time.month() as u8,
            day: time.day() as u8,
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    /// Calendar date and time, if the fields form a valid one
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(
            2000 + i32::from(self.year_offset),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
    }
}

/// One entry of the device error log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    /// When the error was recorded
    pub timestamp: DeviceClock,
    /// Device specific error code
    pub code: u8,
}

/// Protocol and firmware revision reported by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Protocol revision, e.g. `111`
    pub protocol: String,
    /// Firmware revision, e.g. `23`
    pub firmware: String,
}

impl ProtocolVersion {
    /// Split an identity string such as `111-23` at the first dash
    pub fn parse(identity: &str) -> Self {
        match identity.split_once('-') {
            Some((protocol, firmware)) => Self {
                protocol: protocol.to_string(),
                firmware: firmware.to_string(),
            },
            None => Self {
                protocol: identity.to_string(),
                firmware: String::new(),
            },
        }
    }
}

fn response_bytes(frame: &[u8]) -> Result<&ResponseFrame, ProtocolError> {
    frame
        .try_into()
        .map_err(|_| ProtocolError::MalformedFrameLength {
            expected: RESPONSE_FRAME_LEN,
            actual: frame.len(),
        })
}

/// Decode a telemetry response
///
/// The checksum is not inspected; see [`super::verify_checksum`].
pub fn decode_data_point(frame: &[u8]) -> Result<DataPoint, ProtocolError> {
    let b = (*response_bytes(frame)?).map(f64::from);

    let dc = Measurement::new(b[0] * DC_VOLTAGE_SCALE + DC_VOLTAGE_OFFSET, b[1] * DC_CURRENT_SCALE);
    let ac = Measurement::new(b[2] + AC_VOLTAGE_OFFSET, b[3] * AC_CURRENT_SCALE);

    Ok(DataPoint {
        timestamp: Local::now(),
        dc,
        ac,
        temperature: b[4] - TEMPERATURE_OFFSET,
        heat_flux: b[5] * HEAT_FLUX_SCALE,
        energy_today: (b[6] * 256.0 + b[7]) * ENERGY_TODAY_SCALE,
        energy_total: b[8] * 256.0 + b[9],
    })
}

fn quantize(value: f64, offset: f64, scale: f64) -> u8 {
    ((value - offset) / scale).round().clamp(0.0, 255.0) as u8
}

fn quantize_wide(value: f64, scale: f64) -> [u8; 2] {
    let raw = (value / scale).round().clamp(0.0, f64::from(u16::MAX)) as u16;
    raw.to_be_bytes()
}

/// Encode a telemetry response, checksum included
pub fn encode_data_point(point: &DataPoint) -> ResponseFrame {
    let mut frame = [0u8; RESPONSE_FRAME_LEN];
    frame[0] = quantize(point.dc.voltage, DC_VOLTAGE_OFFSET, DC_VOLTAGE_SCALE);
    frame[1] = quantize(point.dc.current, 0.0, DC_CURRENT_SCALE);
    frame[2] = quantize(point.ac.voltage, AC_VOLTAGE_OFFSET, 1.0);
    frame[3] = quantize(point.ac.current, 0.0, AC_CURRENT_SCALE);
    frame[4] = quantize(point.temperature, -TEMPERATURE_OFFSET, 1.0);
    frame[5] = quantize(point.heat_flux, 0.0, HEAT_FLUX_SCALE);
    frame[6..8].copy_from_slice(&quantize_wide(point.energy_today, ENERGY_TODAY_SCALE));
    frame[8..10].copy_from_slice(&quantize_wide(point.energy_total, 1.0));
    seal(&mut frame);
    frame
}

/// Text of an identity response (serial number, protocol/firmware)
///
/// Takes the first `len` bytes and trims trailing NUL and pad markers.
pub fn decode_identity_string(frame: &[u8], len: usize) -> String {
    let field = &frame[..len.min(frame.len())];
    let end = field
        .iter()
        .rposition(|&b| b != 0x00 && b != PAD_MARKER)
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Encode an identity response, NUL padded
pub fn encode_identity_string(text: &str) -> ResponseFrame {
    let mut frame = [0u8; RESPONSE_FRAME_LEN];
    let bytes = text.as_bytes();
    let len = bytes.len().min(RESPONSE_FRAME_LEN - 1);
    frame[..len].copy_from_slice(&bytes[..len]);
    seal(&mut frame);
    frame
}

/// Decode a clock response (bytes 0-4)
pub fn decode_clock(frame: &[u8]) -> Result<DeviceClock, ProtocolError> {
    let b = response_bytes(frame)?;
    Ok(DeviceClock {
        year_offset: b[0],
        month: b[1],
        day: b[2],
        hour: b[3],
        minute: b[4],
    })
}

/// Encode a clock response; unused bytes carry the pad marker
pub fn encode_clock(clock: &DeviceClock) -> ResponseFrame {
    let mut frame = [PAD_MARKER; RESPONSE_FRAME_LEN];
    frame[0] = clock.year_offset;
    frame[1] = clock.month;
    frame[2] = clock.day;
    frame[3] = clock.hour;
    frame[4] = clock.minute;
    seal(&mut frame);
    frame
}

fn decode_error_record(record: &[u8]) -> Option<ErrorLogEntry> {
    match *record {
        [first, ..] if first == PAD_MARKER => None,
        [month, day, hour, minute, code, year_offset] => Some(ErrorLogEntry {
            timestamp: DeviceClock {
                year_offset,
                month,
                day,
                hour,
                minute,
            },
            code,
        }),
        _ => None,
    }
}

/// Decode an error log response into at most two entries
pub fn decode_error_log(frame: &[u8]) -> Result<Vec<ErrorLogEntry>, ProtocolError> {
    let b = response_bytes(frame)?;
    Ok([&b[0..6], &b[6..12]]
        .into_iter()
        .filter_map(decode_error_record)
        .collect())
}

/// Encode an error log response; missing entries are blanked with the pad marker
pub fn encode_error_log(entries: &[ErrorLogEntry]) -> ResponseFrame {
    let mut frame = [PAD_MARKER; RESPONSE_FRAME_LEN];
    for (slot, entry) in frame[..12].chunks_mut(6).zip(entries) {
        let t = entry.timestamp;
        slot.copy_from_slice(&[t.month, t.day, t.hour, t.minute, entry.code, t.year_offset]);
    }
    seal(&mut frame);
    frame
}
