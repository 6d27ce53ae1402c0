//! Deliberately malformed firmware transfers for exercising the peripheral's
//! error handling.
//!
//! The image content is always correct; only the total-count and
//! packet-number fields are tampered with.

use {
    super::{Packet, TransferReport, check_packet_size, packet_count, total_u16, transmit},
    crate::{
        error::{Error, Result},
        host::HostInterface,
    },
    log::info,
};

/// How the total packet count field is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TotalCountMode {
    /// The real count.
    #[default]
    Normal,
    /// Always zero.
    Zero,
    /// One more than the real count.
    Invalid,
    /// One more than the real count for the second half of the packets.
    ShiftPlus,
    /// One less than the real count for the second half of the packets.
    ShiftMinus,
}

impl TotalCountMode {
    fn apply(self, total: u32, index: u32) -> u32 {
        let latter_half = total <= index * 2;
        match self {
            Self::Normal => total,
            Self::Zero => 0,
            Self::Invalid => total + 1,
            Self::ShiftPlus if latter_half => total + 1,
            Self::ShiftMinus if latter_half => total.saturating_sub(1),
            Self::ShiftPlus | Self::ShiftMinus => total,
        }
    }
}

impl TryFrom<u8> for TotalCountMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Zero),
            2 => Ok(Self::Invalid),
            3 => Ok(Self::ShiftPlus),
            4 => Ok(Self::ShiftMinus),
            other => Err(Error::InvalidOperand(format!("no total count mode {other}"))),
        }
    }
}

/// How packet numbers are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SequenceMode {
    /// 1, 2, 3, ...
    #[default]
    Normal,
    /// 0, 1, 2, ...
    FromZero,
    /// 1, 1, 1, ...
    NoIncrement,
    /// 1, 3, 5, ...
    OverIncrement,
    /// 1, 2, 3, ... for two packets more than the total; the extra packets
    /// are empty.
    OverTotal,
}

impl SequenceMode {
    fn apply(self, index: u32) -> u32 {
        match self {
            Self::Normal | Self::OverTotal => index + 1,
            Self::FromZero => index,
            Self::NoIncrement => 1,
            Self::OverIncrement => index * 2 + 1,
        }
    }

    fn extra_packets(self) -> usize {
        if self == Self::OverTotal { 2 } else { 0 }
    }
}

impl TryFrom<u8> for SequenceMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::FromZero),
            2 => Ok(Self::NoIncrement),
            3 => Ok(Self::OverIncrement),
            4 => Ok(Self::OverTotal),
            other => Err(Error::InvalidOperand(format!("no sequence mode {other}"))),
        }
    }
}

/// Deterministic stand-in image of `len` bytes.
pub fn synthetic_image(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i % 251) as u8)
        .collect()
}

fn field(value: u32) -> Result<u16> {
    total_u16(value as usize)
}

/// Cut `image` into packets with tampered count and number fields.
pub fn plan(
    image: &[u8],
    packet_size: usize,
    total_mode: TotalCountMode,
    sequence_mode: SequenceMode,
) -> Result<Vec<Packet<'_>>> {
    check_packet_size(packet_size)?;
    let total = packet_count(image.len(), packet_size);
    total_u16(total)?;
    let real_total = total as u32;

    let mut chunks = image.chunks(packet_size);
    (0..total + sequence_mode.extra_packets())
        .map(|index| {
            let index = index as u32;
            Ok(Packet {
                total: field(total_mode.apply(real_total, index))?,
                number: field(sequence_mode.apply(index))?,
                data: chunks
                    .next()
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// Send a synthetic image of `virtual_len` bytes with the given tampering.
pub fn debug_send<F>(
    host: &mut dyn HostInterface,
    virtual_len: usize,
    packet_size: usize,
    total_mode: TotalCountMode,
    sequence_mode: SequenceMode,
    progress: F,
) -> Result<TransferReport>
where
    F: FnMut(usize, usize),
{
    info!(
        "Debug transfer: virtual size {virtual_len}, packet size {packet_size}, \
         total mode {total_mode:?}, sequence mode {sequence_mode:?}"
    );
    let image = synthetic_image(virtual_len);
    let packets = plan(&image, packet_size, total_mode, sequence_mode)?;
    transmit(host, &packets, progress)
}
