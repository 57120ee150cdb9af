//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The serial port could not be opened or configured
    #[error("Failed to open serial port {port}: {reason}")]
    PortOpen {
        /// Port name as given
        port: String,
        /// What the driver reported
        reason: String,
    },

    /// The transport accepted only part of a frame
    #[error("Short write: only {written} of {expected} bytes sent")]
    ShortWrite {
        /// Bytes accepted
        written: usize,
        /// Frame length
        expected: usize,
    },

    /// No complete frame before the deadline
    #[error("Receive timeout: only {received} of {expected} bytes received")]
    Timeout {
        /// Bytes of the partial frame
        received: usize,
        /// Frame length
        expected: usize,
    },

    /// Trailing checksum byte does not match the frame
    #[error("Invalid checksum: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Sum of the preceding bytes
        expected: u8,
        /// Checksum byte carried by the frame
        actual: u8,
    },

    /// A frame of the wrong length was handed to a decoder
    #[error("Malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrameLength {
        /// Required length
        expected: usize,
        /// Length given
        actual: usize,
    },

    /// A request argument is out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The link was closed through a [`super::CloseHandle`]
    #[error("Connection closed")]
    Closed,

    /// Transport failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the caller may simply poll again on its next interval
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Timeout { .. }
                | ProtocolError::ChecksumMismatch { .. }
                | ProtocolError::MalformedFrameLength { .. }
        )
    }
}
