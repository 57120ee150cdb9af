//! Frame encoding/decoding
//!
//! Every frame ends with a one-byte checksum: the sum of all preceding bytes
//! modulo 256.
//!
//! Command frame (host to device):
//! - 1 byte: destination address (always `0x00`)
//! - 1 byte: source address
//! - 1 byte: opcode
//! - 1 byte: parameter
//! - 1 byte: checksum

use super::{ProtocolError, COMMAND_FRAME_LEN, FRAME_START, HOST_ADDRESS, RESPONSE_FRAME_LEN};

/// A response frame as sent by the device
pub type ResponseFrame = [u8; RESPONSE_FRAME_LEN];

/// Sum of all bytes modulo 256
pub fn checksum_of(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Write the checksum of `frame[..len - 1]` into the last byte
pub fn seal(frame: &mut [u8]) {
    if let Some((last, body)) = frame.split_last_mut() {
        *last = checksum_of(body);
    }
}

/// Check the trailing checksum byte of a frame without modifying it
pub fn verify_checksum(frame: &[u8]) -> Result<(), ProtocolError> {
    let Some((&actual, body)) = frame.split_last() else {
        return Err(ProtocolError::MalformedFrameLength {
            expected: COMMAND_FRAME_LEN,
            actual: 0,
        });
    };
    if body.is_empty() {
        return Err(ProtocolError::MalformedFrameLength {
            expected: COMMAND_FRAME_LEN,
            actual: frame.len(),
        });
    }

    let expected = checksum_of(body);
    if expected != actual {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// A host-to-device command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Destination address
    pub dest: u8,
    /// Source address
    pub src: u8,
    /// Opcode byte
    pub opcode: u8,
    /// Opcode parameter
    pub param: u8,
}

impl CommandFrame {
    /// Command from the host to the device
    pub fn new(opcode: u8, param: u8) -> Self {
        Self {
            dest: FRAME_START,
            src: HOST_ADDRESS,
            opcode,
            param,
        }
    }

    /// Use a different source address
    pub fn with_source(mut self, src: u8) -> Self {
        self.src = src;
        self
    }

    /// Encode the command with its checksum
    pub fn to_bytes(&self) -> [u8; COMMAND_FRAME_LEN] {
        let mut bytes = [self.dest, self.src, self.opcode, self.param, 0];
        seal(&mut bytes);
        bytes
    }

    /// Decode a command frame; the checksum is not checked here
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        match *data {
            [dest, src, opcode, param, _] => Ok(Self {
                dest,
                src,
                opcode,
                param,
            }),
            _ => Err(ProtocolError::MalformedFrameLength {
                expected: COMMAND_FRAME_LEN,
                actual: data.len(),
            }),
        }
    }
}
