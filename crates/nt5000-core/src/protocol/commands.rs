//! Protocol commands
//!
//! Opcodes understood by the NT5000 firmware.

use serde::{Deserialize, Serialize};

/// Request/response commands; each elicits one 13-byte response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Read one error log slot (1-5, passed as parameter)
    ReadErrorLog,
    /// Read live telemetry
    ReadData,
    /// Read the device clock
    ReadClock,
    /// Read the 12 character serial number
    ReadSerialNumber,
    /// Read the protocol and firmware version string
    ReadProtocolVersion,
}

impl Opcode {
    /// All request/response opcodes
    pub const ALL: [Opcode; 5] = [
        Opcode::ReadErrorLog,
        Opcode::ReadData,
        Opcode::ReadClock,
        Opcode::ReadSerialNumber,
        Opcode::ReadProtocolVersion,
    ];

    /// Wire value of the opcode
    pub fn byte(&self) -> u8 {
        match self {
            Opcode::ReadErrorLog => 0x01,
            Opcode::ReadData => 0x02,
            Opcode::ReadClock => 0x06,
            Opcode::ReadSerialNumber => 0x08,
            Opcode::ReadProtocolVersion => 0x09,
        }
    }

    /// Look up a request/response opcode by its wire value
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.byte() == byte)
    }
}

/// A settable field of the device clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockField {
    /// Years since 2000
    Year,
    /// Month 1-12
    Month,
    /// Day of month
    Day,
    /// Hour 0-23
    Hour,
    /// Minute 0-59
    Minute,
}

impl ClockField {
    /// Fields in the order the host sets them
    pub const ALL: [ClockField; 5] = [
        ClockField::Year,
        ClockField::Month,
        ClockField::Day,
        ClockField::Hour,
        ClockField::Minute,
    ];

    fn index(&self) -> u8 {
        match self {
            ClockField::Year => 0,
            ClockField::Month => 1,
            ClockField::Day => 2,
            ClockField::Hour => 3,
            ClockField::Minute => 4,
        }
    }

    /// Field name for log output
    pub fn name(&self) -> &'static str {
        match self {
            ClockField::Year => "year",
            ClockField::Month => "month",
            ClockField::Day => "day",
            ClockField::Hour => "hour",
            ClockField::Minute => "minute",
        }
    }
}

/// Clock-set numbering; the two schemes belong to different device
/// generations and are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSetScheme {
    /// Opcodes `0x32..=0x36`, source `0xff`, hour and minute sent one higher
    #[default]
    Legacy,
    /// Opcodes `0x50..=0x54`, source `0x01`, raw values
    Revised,
}

impl ClockSetScheme {
    fn base(&self) -> u8 {
        match self {
            ClockSetScheme::Legacy => 0x32,
            ClockSetScheme::Revised => 0x50,
        }
    }

    /// Source address the host uses for clock-set frames
    pub fn source_address(&self) -> u8 {
        match self {
            ClockSetScheme::Legacy => 0xff,
            ClockSetScheme::Revised => super::HOST_ADDRESS,
        }
    }

    /// Opcode setting the given field
    pub fn opcode(&self, field: ClockField) -> u8 {
        self.base() + field.index()
    }

    /// Which field an opcode sets, if it belongs to this scheme
    pub fn field(&self, opcode: u8) -> Option<ClockField> {
        let offset = opcode.checked_sub(self.base())?;
        ClockField::ALL.into_iter().find(|f| f.index() == offset)
    }

    /// Parameter byte carrying `value` for `field`
    pub fn encode_value(&self, field: ClockField, value: u8) -> u8 {
        match (self, field) {
            (ClockSetScheme::Legacy, ClockField::Hour | ClockField::Minute) => {
                value.wrapping_add(1)
            }
            _ => value,
        }
    }

    /// Field and value carried by a clock-set command of this scheme
    pub fn decode(&self, opcode: u8, param: u8) -> Option<(ClockField, u8)> {
        let field = self.field(opcode)?;
        let value = match (self, field) {
            (ClockSetScheme::Legacy, ClockField::Hour | ClockField::Minute) => {
                param.wrapping_sub(1)
            }
            _ => param,
        };
        Some((field, value))
    }
}

impl std::str::FromStr for ClockSetScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(ClockSetScheme::Legacy),
            "revised" => Ok(ClockSetScheme::Revised),
            other => Err(format!(
                "unknown clock scheme '{other}', expected 'legacy' or 'revised'"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_bytes() {
        assert_eq!(Opcode::ReadData.byte(), 0x02);
        assert_eq!(Opcode::ReadClock.byte(), 0x06);
        assert_eq!(Opcode::ReadSerialNumber.byte(), 0x08);
        assert_eq!(Opcode::ReadProtocolVersion.byte(), 0x09);
        assert_eq!(Opcode::ReadErrorLog.byte(), 0x01);
    }

    #[test]
    fn test_opcode_lookup() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op.byte()), Some(op));
        }
        assert_eq!(Opcode::from_byte(0xff), None);
        assert_eq!(Opcode::from_byte(0x32), None);
    }

    #[test]
    fn test_scheme_opcodes() {
        assert_eq!(ClockSetScheme::Legacy.opcode(ClockField::Year), 0x32);
        assert_eq!(ClockSetScheme::Legacy.opcode(ClockField::Minute), 0x36);
        assert_eq!(ClockSetScheme::Revised.opcode(ClockField::Year), 0x50);
        assert_eq!(ClockSetScheme::Revised.opcode(ClockField::Minute), 0x54);
    }

    #[test]
    fn test_schemes_are_exclusive() {
        assert_eq!(ClockSetScheme::Legacy.field(0x50), None);
        assert_eq!(ClockSetScheme::Revised.field(0x36), None);
        assert_eq!(ClockSetScheme::Revised.field(0x55), None);
        assert_eq!(ClockSetScheme::Legacy.field(0x02), None);
    }

    #[test]
    fn test_legacy_offsets_hour_and_minute() {
        let scheme = ClockSetScheme::Legacy;
        assert_eq!(scheme.encode_value(ClockField::Hour, 0), 1);
        assert_eq!(scheme.encode_value(ClockField::Minute, 59), 60);
        assert_eq!(scheme.encode_value(ClockField::Day, 7), 7);
        assert_eq!(scheme.decode(0x35, 1), Some((ClockField::Hour, 0)));
        assert_eq!(scheme.decode(0x32, 26), Some((ClockField::Year, 26)));
    }

    #[test]
    fn test_revised_values_are_raw() {
        let scheme = ClockSetScheme::Revised;
        assert_eq!(scheme.encode_value(ClockField::Hour, 0), 0);
        assert_eq!(scheme.decode(0x54, 30), Some((ClockField::Minute, 30)));
    }

    #[test]
    fn test_scheme_from_str() {
        assert_eq!("legacy".parse::<ClockSetScheme>(), Ok(ClockSetScheme::Legacy));
        assert_eq!("Revised".parse::<ClockSetScheme>(), Ok(ClockSetScheme::Revised));
        assert!("0x50".parse::<ClockSetScheme>().is_err());
    }
}
