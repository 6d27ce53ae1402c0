//! GHIFP wire frame.
//!
//! ## Frame Format
//!
//! ```text
//! +------+---------+--------+---------+-------------+---------+
//! | SYNC | OPR LEN | OPCODE | HDR SUM |   OPERAND   | OPR SUM |
//! +------+---------+--------+---------+-------------+---------+
//! |  1   | 2 (LE)  |   1    |    1    | OPR LEN     | 0 or 1  |
//! +------+---------+--------+---------+-------------+---------+
//! | 0x7F |    N    |  opc   | sum 0-3 |   payload   | sum opr |
//! +------+---------+--------+---------+-------------+---------+
//! ```
//!
//! Both checksums are 8-bit wrapping sums. The operand checksum byte is only
//! present when `N > 0`.

use {
    crate::error::{Error, FrameError, Result},
    byteorder::{ByteOrder, LittleEndian},
};

/// Start-of-frame marker.
pub const SYNC: u8 = 0x7F;

/// Header length: sync, operand length, opcode, header checksum.
pub const HEADER_LEN: usize = 5;

/// Largest operand the peripheral accepts.
pub const MAX_OPERAND_LEN: usize = 4090;

/// 8-bit wrapping sum used for both header and operand checksums.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Bytes following the header for an operand of `operand_len` bytes.
pub const fn body_len(operand_len: usize) -> usize {
    if operand_len == 0 { 0 } else { operand_len + 1 }
}

/// Total wire length of a frame with an operand of `operand_len` bytes.
pub const fn wire_len(operand_len: usize) -> usize {
    HEADER_LEN + body_len(operand_len)
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Operation code.
    pub opcode: u8,
    /// Operand length in bytes.
    pub operand_len: u16,
}

impl Header {
    /// Bytes following the header (operand plus checksum).
    pub fn body_len(&self) -> usize {
        body_len(usize::from(self.operand_len))
    }

    /// Total wire length of the frame this header starts.
    pub fn wire_len(&self) -> usize {
        wire_len(usize::from(self.operand_len))
    }
}

/// Encode a frame carrying `operand` under `opcode`.
///
/// Operand length is not checked against [`MAX_OPERAND_LEN`] here; oversized
/// frames are a deliberate test tool. Only lengths that do not fit the 16-bit
/// length field are rejected.
pub fn encode(opcode: u8, operand: &[u8]) -> Result<Vec<u8>> {
    let operand_len = u16::try_from(operand.len()).map_err(|_| {
        Error::InvalidOperand(format!(
            "operand of {} bytes does not fit the length field",
            operand.len()
        ))
    })?;

    let mut buf = vec![0u8; HEADER_LEN];
    buf[0] = SYNC;
    LittleEndian::write_u16(&mut buf[1..3], operand_len);
    buf[3] = opcode;
    buf[4] = checksum(&buf[..4]);

    if !operand.is_empty() {
        buf.reserve(operand.len() + 1);
        buf.extend_from_slice(operand);
        buf.push(checksum(operand));
    }

    Ok(buf)
}

/// Decode and verify the first [`HEADER_LEN`] bytes of `bytes`.
pub fn decode_header(bytes: &[u8]) -> std::result::Result<Header, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: HEADER_LEN,
            got: bytes.len(),
        });
    }
    if bytes[0] != SYNC {
        return Err(FrameError::BadSync(bytes[0]));
    }

    let expected = checksum(&bytes[..4]);
    if bytes[4] != expected {
        return Err(FrameError::HeaderChecksum {
            expected,
            actual: bytes[4],
        });
    }

    Ok(Header {
        opcode: bytes[3],
        operand_len: LittleEndian::read_u16(&bytes[1..3]),
    })
}

/// Verify the operand checksum.
///
/// `body` starts at the first operand byte and must hold the operand followed
/// by its checksum. A zero-length operand has nothing to verify.
pub fn verify_operand(body: &[u8], operand_len: u16) -> std::result::Result<(), FrameError> {
    let len = usize::from(operand_len);
    if len == 0 {
        return Ok(());
    }
    if body.len() < len + 1 {
        return Err(FrameError::Truncated {
            needed: len + 1,
            got: body.len(),
        });
    }

    let expected = checksum(&body[..len]);
    if body[len] != expected {
        return Err(FrameError::DataChecksum {
            expected,
            actual: body[len],
        });
    }
    Ok(())
}

/// Verify a complete frame held in `bytes` and return its header.
///
/// Trailing bytes after the frame are ignored.
pub fn validate(bytes: &[u8]) -> std::result::Result<Header, FrameError> {
    let header = decode_header(bytes)?;
    verify_operand(&bytes[HEADER_LEN..], header.operand_len)?;
    Ok(header)
}

/// A validated frame with owned operand bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: u8,
    operand: Vec<u8>,
}

impl Frame {
    /// Create a frame from its parts.
    pub fn new(opcode: u8, operand: Vec<u8>) -> Self {
        Self { opcode, operand }
    }

    /// Parse and verify a frame from wire bytes.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, FrameError> {
        let header = validate(bytes)?;
        let end = HEADER_LEN + usize::from(header.operand_len);
        Ok(Self {
            opcode: header.opcode,
            operand: bytes[HEADER_LEN..end].to_vec(),
        })
    }

    /// Operation code.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Operand bytes.
    pub fn operand(&self) -> &[u8] {
        &self.operand
    }

    /// Consume the frame and return its operand.
    pub fn into_operand(self) -> Vec<u8> {
        self.operand
    }

    /// First operand byte, which responses use as a status code.
    pub fn status(&self) -> Option<u8> {
        self.operand
            .first()
            .copied()
    }

    /// Length of this frame on the wire.
    pub fn wire_len(&self) -> usize {
        wire_len(
            self.operand
                .len(),
        )
    }

    /// Encode back to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self.opcode, &self.operand)
    }
}
