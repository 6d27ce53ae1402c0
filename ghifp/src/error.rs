//! Error types for ghifp.

use std::io;
use thiserror::Error;

/// Result type for ghifp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errno-style values reported by [`Error::code`].
mod errno {
    pub const EPERM: i32 = 1;
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const ENOTSUP: i32 = 95;
    pub const ETIMEDOUT: i32 = 110;
}

/// A received or constructed frame failed structural validation.
///
/// These are recovered inside the receive path: the offending bytes are
/// discarded and reassembly starts over at the next header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// First byte is not the sync marker.
    #[error("bad sync byte {0:#04x}")]
    BadSync(u8),

    /// Header checksum does not match the first four bytes.
    #[error("header checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    HeaderChecksum {
        /// Checksum computed over the header bytes.
        expected: u8,
        /// Checksum carried in the frame.
        actual: u8,
    },

    /// Data checksum does not match the operand bytes.
    #[error("data checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    DataChecksum {
        /// Checksum computed over the operand.
        expected: u8,
        /// Checksum carried in the frame.
        actual: u8,
    },

    /// Fewer bytes than the header announces.
    #[error("truncated frame: need {needed} bytes, got {got}")]
    Truncated {
        /// Bytes the frame requires.
        needed: usize,
        /// Bytes available.
        got: usize,
    },

    /// Header announces an operand larger than the receive buffer can hold.
    #[error("operand length {0} exceeds the receive limit")]
    OperandTooLong(u16),
}

/// A well-formed response did not carry the expected answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Response opcode differs from the request.
    #[error("unexpected opcode {actual:#04x} in response to {expected:#04x}")]
    UnexpectedOpcode {
        /// Opcode of the request.
        expected: u8,
        /// Opcode found in the response.
        actual: u8,
    },

    /// Peripheral reported a non-zero status.
    #[error("peripheral rejected opcode {opcode:#04x} with status {status}")]
    Status {
        /// Opcode of the rejected request.
        opcode: u8,
        /// Status byte, interpreted as signed.
        status: i8,
    },

    /// Response has the wrong wire length.
    #[error("unexpected response length {actual}, expected {expected}")]
    UnexpectedLength {
        /// Expected wire length.
        expected: usize,
        /// Actual wire length.
        actual: usize,
    },
}

/// Error type for ghifp operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame failed validation.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Response did not match the request.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error (transport, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No response or confirmation within the deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operand does not fit the command catalog or a parameter is out of range.
    #[error("Invalid operand: {0}")]
    InvalidOperand(String),

    /// Operation invoked in the wrong driver state.
    #[error("Invalid state: {0}")]
    State(String),

    /// A response arrived while another one was still pending.
    #[error("Response slot already occupied")]
    QueueFull,

    /// Request not supported by the selected transport.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Firmware transfer aborted part way.
    #[error("Transfer aborted after {completed}/{total} packets at offset {offset}: {source}")]
    Segment {
        /// Packets acknowledged before the failure.
        completed: usize,
        /// Packets planned.
        total: usize,
        /// Byte offset reached in the image.
        offset: usize,
        /// Underlying failure.
        source: Box<Error>,
    },
}

impl Error {
    /// Negative errno-style code for this error.
    ///
    /// A peripheral status byte is reported as its negated signed value, so a
    /// status of `3` yields `-3`.
    pub fn code(&self) -> i32 {
        match self {
            Self::Protocol(ProtocolError::Status { status, .. }) => -i32::from(*status),
            Self::Frame(_) | Self::Protocol(_) | Self::Io(_) => -errno::EIO,
            #[cfg(feature = "native")]
            Self::Serial(_) => -errno::ENODEV,
            Self::Timeout(_) => -errno::ETIMEDOUT,
            Self::InvalidOperand(_) => -errno::EINVAL,
            Self::State(_) => -errno::EPERM,
            Self::QueueFull => -errno::EAGAIN,
            Self::Unsupported(_) => -errno::ENOTSUP,
            Self::Segment { source, .. } => source.code(),
        }
    }

    /// Whether this error is a timeout, directly or inside a transfer failure.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Segment { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Timeout("x".into()).code(), -110);
        assert_eq!(Error::InvalidOperand("x".into()).code(), -22);
        assert_eq!(Error::State("x".into()).code(), -1);
        assert_eq!(Error::QueueFull.code(), -11);
        assert_eq!(Error::Frame(FrameError::BadSync(0)).code(), -5);
    }

    #[test]
    fn test_status_code_is_negated() {
        let err = Error::Protocol(ProtocolError::Status {
            opcode: 0x01,
            status: 3,
        });
        assert_eq!(err.code(), -3);

        let err = Error::Protocol(ProtocolError::Status {
            opcode: 0x01,
            status: -2,
        });
        assert_eq!(err.code(), 2);
    }

    #[test]
    fn test_segment_error_reports_inner_code() {
        let err = Error::Segment {
            completed: 2,
            total: 5,
            offset: 4096,
            source: Box::new(Error::Timeout("no response".into())),
        };
        assert_eq!(err.code(), -110);
        assert!(err.is_timeout());
        assert!(err.to_string().contains("2/5"));
    }
}
