//! Command catalog: operand-length policy per opcode and builders for the
//! named operations.

use {
    super::frame::{self, Frame},
    crate::error::{Error, ProtocolError, Result},
    byteorder::{ByteOrder, LittleEndian},
};

/// Number of opcodes covered by the catalog (`0x00..=0x9F`).
pub const OPCODE_COUNT: usize = 0xA0;

/// Highest serial rate index the peripheral understands.
pub const SERIAL_RATE_INDEX_MAX: u8 = 0x13;

/// Highest flow-control flag value.
pub const FLOW_CONTROL_MAX: u8 = 1;

/// Highest bus speed index the peripheral understands.
pub const BUS_SPEED_INDEX_MAX: u8 = 2;

/// Highest clocked word-size index the peripheral understands.
pub const WORD_SIZE_INDEX_MAX: u8 = 2;

/// Wire length of a one-byte status response.
pub const STATUS_RESPONSE_LEN: usize = frame::wire_len(1);

/// Bytes in front of the image data of a firmware packet operand.
pub const FIRMWARE_PACKET_PREFIX: usize = 4;

/// Bytes in front of the data of a binary-input operand.
pub const BINARY_INPUT_PREFIX: usize = 3;

/// Operand length policy of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSpec {
    /// Operand must be exactly this long.
    Fixed(u16),
    /// Operand length is decided by the caller.
    Variable,
    /// Opcode is not defined for the host.
    Unsupported,
}

/// How [`build_with`] treats opcodes the catalog marks unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CatalogPolicy {
    /// Reject unsupported opcodes.
    #[default]
    Strict,
    /// Send unsupported opcodes with whatever operand the caller gives.
    Permissive,
}

/// Look up the operand policy for `opcode`.
pub const fn command_spec(opcode: u8) -> CommandSpec {
    use CommandSpec::{Fixed, Unsupported, Variable};

    match opcode {
        0x00 => Fixed(1),
        0x01 => Variable,
        0x02 => Fixed(0),
        0x03 => Fixed(2),
        0x04 | 0x05 => Fixed(1),
        0x06 => Fixed(0),
        0x07 => Variable,
        0x08 | 0x09 => Fixed(3),
        0x0B => Fixed(2),

        0x10 => Fixed(1),
        0x11 => Fixed(4),
        0x12 => Fixed(2),
        0x13 | 0x14 => Fixed(0),
        0x15 => Fixed(1),
        0x16 => Fixed(2),
        0x17 => Fixed(4),

        0x30 => Fixed(1),
        0x31 => Fixed(0),
        0x32 => Fixed(2),
        0x33 => Fixed(0),
        0x35 => Fixed(12),
        0x36 => Fixed(8),
        0x37 => Fixed(4),
        0x38 => Fixed(0),
        0x39 => Fixed(2),
        0x3A => Fixed(7),
        0x3B => Fixed(0),
        0x3C => Fixed(3),
        0x3D => Fixed(5),
        0x3E | 0x3F => Fixed(1),

        0x40 => Fixed(3),
        0x41 => Fixed(1),
        0x42 => Fixed(11),
        0x43 => Fixed(0),
        0x44 => Fixed(6),

        0x50 => Fixed(1),
        0x51 => Fixed(0),
        0x52 | 0x53 => Fixed(1),
        0x54 => Fixed(0),
        0x55 => Fixed(1),
        0x56 => Fixed(2),

        0x80 => Fixed(8),
        0x81 => Fixed(22),
        0x82 => Fixed(15),
        0x83 | 0x84 => Variable,
        0x85 => Fixed(45),
        0x86 => Fixed(33),
        0x87 => Fixed(1),
        0x88 => Variable,

        // 0x89..=0x99 have no defined layout; do not treat them as empty.
        _ => Unsupported,
    }
}

/// Build a frame, checking the operand against the catalog.
pub fn build(opcode: u8, operand: &[u8]) -> Result<Vec<u8>> {
    build_with(opcode, operand, CatalogPolicy::Strict)
}

/// Build a frame under an explicit policy for unsupported opcodes.
pub fn build_with(opcode: u8, operand: &[u8], policy: CatalogPolicy) -> Result<Vec<u8>> {
    match command_spec(opcode) {
        CommandSpec::Fixed(len) if operand.len() != usize::from(len) => {
            Err(Error::InvalidOperand(format!(
                "opcode {opcode:#04x} takes {len} operand bytes, got {}",
                operand.len()
            )))
        },
        CommandSpec::Unsupported if policy == CatalogPolicy::Strict => Err(
            Error::InvalidOperand(format!("opcode {opcode:#04x} is not supported")),
        ),
        _ => frame::encode(opcode, operand),
    }
}

/// Opcodes the driver issues or interprets itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Change system status.
    ChangeStatus = 0x00,
    /// Transmit one firmware packet.
    TransmitFirmware = 0x01,
    /// Execute the transferred firmware.
    ExecuteFirmware = 0x02,
    /// Configure the serial transport.
    ConfigureSerial = 0x03,
    /// Configure the bus-addressed transport.
    ConfigureBus = 0x04,
    /// Configure the clocked transport.
    ConfigureClocked = 0x05,
    /// Binary input packet.
    BinaryInput = 0x07,
    /// Frame check error notification (receive only).
    FrameCheckError = 0xFF,
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode as u8
    }
}

/// Operand of a change-status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusRequest {
    /// Restart into ROM.
    RomRestart = 0x00,
    /// Restart the application.
    Restart = 0x01,
    /// Wake from deep sleep.
    Wakeup = 0x02,
    /// Enter deep sleep.
    Suspend = 0x03,
    /// Peripheral reports a fatal fault.
    BrokenDown = 0xFF,
}

impl TryFrom<u8> for StatusRequest {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::RomRestart),
            0x01 => Ok(Self::Restart),
            0x02 => Ok(Self::Wakeup),
            0x03 => Ok(Self::Suspend),
            0xFF => Ok(Self::BrokenDown),
            other => Err(Error::InvalidOperand(format!(
                "unknown status request {other:#04x}"
            ))),
        }
    }
}

/// Change-status request frame.
pub fn change_status(request: StatusRequest) -> Result<Vec<u8>> {
    build(Opcode::ChangeStatus.into(), &[request as u8])
}

/// Execute-firmware request frame.
pub fn execute_firmware() -> Result<Vec<u8>> {
    build(Opcode::ExecuteFirmware.into(), &[])
}

/// Serial transport configuration frame.
pub fn configure_serial(rate_index: u8, flow_control: u8) -> Result<Vec<u8>> {
    build(Opcode::ConfigureSerial.into(), &[rate_index, flow_control])
}

/// Bus-addressed transport configuration frame.
pub fn configure_bus(speed_index: u8) -> Result<Vec<u8>> {
    build(Opcode::ConfigureBus.into(), &[speed_index])
}

/// Clocked transport configuration frame.
pub fn configure_clocked(word_size_index: u8) -> Result<Vec<u8>> {
    build(Opcode::ConfigureClocked.into(), &[word_size_index])
}

/// One firmware packet: total count, packet number, then image bytes.
pub fn firmware_packet(total: u16, number: u16, chunk: &[u8]) -> Result<Vec<u8>> {
    let mut operand = vec![0u8; FIRMWARE_PACKET_PREFIX];
    LittleEndian::write_u16(&mut operand[0..2], total);
    LittleEndian::write_u16(&mut operand[2..4], number);
    operand.extend_from_slice(chunk);
    build(Opcode::TransmitFirmware.into(), &operand)
}

/// One binary-input packet: input selector, total count, packet number, data.
pub fn binary_input_packet(input: u8, total: u8, number: u8, chunk: &[u8]) -> Result<Vec<u8>> {
    let mut operand = Vec::with_capacity(BINARY_INPUT_PREFIX + chunk.len());
    operand.extend_from_slice(&[input, total, number]);
    operand.extend_from_slice(chunk);
    build(Opcode::BinaryInput.into(), &operand)
}

/// Check a one-byte status response to `expected`.
///
/// The response must be exactly [`STATUS_RESPONSE_LEN`] bytes on the wire,
/// carry the request's opcode and report status zero.
pub fn check_status_response(response: &Frame, expected: Opcode) -> Result<()> {
    if response.wire_len() != STATUS_RESPONSE_LEN {
        return Err(ProtocolError::UnexpectedLength {
            expected: STATUS_RESPONSE_LEN,
            actual: response.wire_len(),
        }
        .into());
    }
    check_status(response, expected)
}

/// Check opcode and leading status byte of a response of any length.
pub fn check_status(response: &Frame, expected: Opcode) -> Result<()> {
    let expected = u8::from(expected);
    if response.opcode() != expected {
        return Err(ProtocolError::UnexpectedOpcode {
            expected,
            actual: response.opcode(),
        }
        .into());
    }

    match response.status() {
        Some(0) => Ok(()),
        Some(status) => Err(ProtocolError::Status {
            opcode: expected,
            status: i8::from_ne_bytes([status]),
        }
        .into()),
        None => Err(ProtocolError::UnexpectedLength {
            expected: STATUS_RESPONSE_LEN,
            actual: response.wire_len(),
        }
        .into()),
    }
}

/// Payload of a frame-check-error notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCheckError {
    /// Opcode of the frame the peripheral rejected.
    pub opcode: u8,
    /// Peripheral error code.
    pub code: u8,
}

impl FrameCheckError {
    /// Decode from a received notification frame.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        if frame.opcode() != u8::from(Opcode::FrameCheckError) {
            return None;
        }
        match *frame.operand() {
            [opcode, code] => Some(Self { opcode, code }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_opcodes_match_catalog() {
        assert_eq!(command_spec(0x00), CommandSpec::Fixed(1));
        assert_eq!(command_spec(0x01), CommandSpec::Variable);
        assert_eq!(command_spec(0x02), CommandSpec::Fixed(0));
        assert_eq!(command_spec(0x03), CommandSpec::Fixed(2));
        assert_eq!(command_spec(0x04), CommandSpec::Fixed(1));
        assert_eq!(command_spec(0x05), CommandSpec::Fixed(1));
        assert_eq!(command_spec(0x07), CommandSpec::Variable);
    }

    #[test]
    fn test_catalog_coverage() {
        let supported = (0..=u8::MAX)
            .filter(|op| command_spec(*op) != CommandSpec::Unsupported)
            .count();
        assert_eq!(supported, 55);
        assert!((0..=u8::MAX)
            .filter(|op| usize::from(*op) >= OPCODE_COUNT)
            .all(|op| command_spec(op) == CommandSpec::Unsupported));
        assert_eq!(command_spec(0x0A), CommandSpec::Unsupported);
        assert_eq!(command_spec(0x34), CommandSpec::Unsupported);
        assert_eq!(command_spec(0x89), CommandSpec::Unsupported);
        assert_eq!(command_spec(0x8A), CommandSpec::Unsupported);
        assert_eq!(command_spec(0x99), CommandSpec::Unsupported);
        assert_eq!(command_spec(0xFF), CommandSpec::Unsupported);
    }

    #[test]
    fn test_build_rejects_wrong_fixed_length() {
        assert!(matches!(build(0x03, &[0x06]), Err(Error::InvalidOperand(_))));
        assert!(build(0x03, &[0x06, 0x00]).is_ok());
    }

    #[test]
    fn test_build_variable_accepts_any_length() {
        assert!(build(0x01, &[]).is_ok());
        assert!(build(0x83, &[1, 2, 3, 4, 5]).is_ok());
    }

    #[test]
    fn test_unsupported_policy() {
        assert!(matches!(build(0x20, &[1]), Err(Error::InvalidOperand(_))));
        let bytes = build_with(0x20, &[1], CatalogPolicy::Permissive).unwrap();
        assert_eq!(bytes[3], 0x20);
        // Fixed lengths still apply under the permissive policy.
        assert!(build_with(0x00, &[], CatalogPolicy::Permissive).is_err());
    }

    #[test]
    fn test_change_status_wake() {
        let bytes = change_status(StatusRequest::Wakeup).unwrap();
        assert_eq!(bytes, vec![0x7F, 0x01, 0x00, 0x00, 0x80, 0x02, 0x02]);
    }

    #[test]
    fn test_status_request_from_raw() {
        assert_eq!(StatusRequest::try_from(3).unwrap(), StatusRequest::Suspend);
        assert_eq!(StatusRequest::try_from(0xFF).unwrap(), StatusRequest::BrokenDown);
        assert!(StatusRequest::try_from(4).is_err());
    }

    #[test]
    fn test_firmware_packet_layout() {
        let bytes = firmware_packet(3, 2, &[0xAA, 0xBB]).unwrap();
        let frame = Frame::parse(&bytes).unwrap();
        assert_eq!(frame.opcode(), 0x01);
        assert_eq!(frame.operand(), &[0x03, 0x00, 0x02, 0x00, 0xAA, 0xBB]);
    }

    #[test]
    fn test_binary_input_layout() {
        let bytes = binary_input_packet(1, 4, 2, &[0x10; 3]).unwrap();
        let frame = Frame::parse(&bytes).unwrap();
        assert_eq!(frame.opcode(), 0x07);
        assert_eq!(frame.operand(), &[1, 4, 2, 0x10, 0x10, 0x10]);
    }

    #[test]
    fn test_check_status_response_ok() {
        let response = Frame::new(0x01, vec![0x00]);
        assert!(check_status_response(&response, Opcode::TransmitFirmware).is_ok());
    }

    #[test]
    fn test_check_status_response_failures() {
        let wrong_opcode = Frame::new(0x02, vec![0x00]);
        assert!(matches!(
            check_status_response(&wrong_opcode, Opcode::TransmitFirmware),
            Err(Error::Protocol(ProtocolError::UnexpectedOpcode { .. }))
        ));

        let nonzero = Frame::new(0x01, vec![0xFE]);
        let err = check_status_response(&nonzero, Opcode::TransmitFirmware).unwrap_err();
        assert_eq!(err.code(), 2);

        let long = Frame::new(0x01, vec![0x00, 0x00]);
        assert!(matches!(
            check_status_response(&long, Opcode::TransmitFirmware),
            Err(Error::Protocol(ProtocolError::UnexpectedLength { .. }))
        ));
    }

    #[test]
    fn test_frame_check_error_decode() {
        let frame = Frame::new(0xFF, vec![0x01, 0x03]);
        assert_eq!(
            FrameCheckError::from_frame(&frame),
            Some(FrameCheckError {
                opcode: 0x01,
                code: 0x03
            })
        );
        assert_eq!(FrameCheckError::from_frame(&Frame::new(0xFF, vec![1])), None);
    }
}
