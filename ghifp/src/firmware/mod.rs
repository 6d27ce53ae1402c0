//! Firmware segmentation and transfer.
//!
//! An image is cut into packets of at most `packet_size` bytes. Each packet
//! carries the total packet count and its own 1-based number and must be
//! acknowledged with status zero before the next one is sent.

pub mod binary;
pub mod fuzz;

use {
    crate::{
        error::{Error, Result},
        host::HostInterface,
        protocol::{
            Opcode,
            catalog::{self, FIRMWARE_PACKET_PREFIX, check_status_response},
            frame::MAX_OPERAND_LEN,
        },
    },
    log::{debug, error, info},
};

/// Packet size used until changed.
pub const DEFAULT_PACKET_SIZE: usize = 2048;

/// Largest packet size whose frames stay within the operand limit.
pub const MAX_PACKET_SIZE: usize = MAX_OPERAND_LEN - FIRMWARE_PACKET_PREFIX;

/// Number of packets needed for `len` bytes.
pub fn packet_count(len: usize, packet_size: usize) -> usize {
    len.div_ceil(packet_size)
}

/// One planned firmware packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Total packet count written into the operand.
    pub total: u16,
    /// Packet number written into the operand.
    pub number: u16,
    /// Image bytes carried.
    pub data: &'a [u8],
}

impl Packet<'_> {
    /// Request frame for this packet.
    pub fn encode(&self) -> Result<Vec<u8>> {
        catalog::firmware_packet(self.total, self.number, self.data)
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Packets acknowledged.
    pub packets: usize,
    /// Image bytes delivered.
    pub bytes: usize,
}

pub(crate) fn check_packet_size(packet_size: usize) -> Result<()> {
    if packet_size == 0 {
        return Err(Error::InvalidOperand("packet size must be at least 1".into()));
    }
    Ok(())
}

pub(crate) fn total_u16(total: usize) -> Result<u16> {
    u16::try_from(total)
        .map_err(|_| Error::InvalidOperand(format!("{total} packets exceed the packet counter")))
}

/// Cut `image` into correctly numbered packets.
pub fn plan(image: &[u8], packet_size: usize) -> Result<Vec<Packet<'_>>> {
    check_packet_size(packet_size)?;
    let total = total_u16(packet_count(image.len(), packet_size))?;

    image
        .chunks(packet_size)
        .zip(1..=total)
        .map(|(data, number)| {
            Ok(Packet {
                total,
                number,
                data,
            })
        })
        .collect()
}

/// Send `packets` one transaction at a time.
///
/// `progress` receives `(bytes_sent, bytes_total)` after every acknowledged
/// packet. The first failure aborts with [`Error::Segment`].
pub fn transmit<F>(
    host: &mut dyn HostInterface,
    packets: &[Packet<'_>],
    mut progress: F,
) -> Result<TransferReport>
where
    F: FnMut(usize, usize),
{
    let total_bytes: usize = packets
        .iter()
        .map(|p| p.data.len())
        .sum();
    let mut offset = 0;

    for (index, packet) in packets
        .iter()
        .enumerate()
    {
        debug!(
            "Packet({}/{}) part size {}",
            index + 1,
            packets.len(),
            packet
                .data
                .len()
        );

        let result = packet
            .encode()
            .and_then(|cmd| host.transaction(&cmd))
            .and_then(|res| check_status_response(&res, Opcode::TransmitFirmware));
        if let Err(e) = result {
            error!("Packet {} failed: {e}", index + 1);
            return Err(Error::Segment {
                completed: index,
                total: packets.len(),
                offset,
                source: Box::new(e),
            });
        }

        offset += packet
            .data
            .len();
        progress(offset, total_bytes);
    }

    info!("Completed all {} packet transfers", packets.len());
    Ok(TransferReport {
        packets: packets.len(),
        bytes: offset,
    })
}

/// Segment `image` and send it.
pub fn send<F>(
    host: &mut dyn HostInterface,
    image: &[u8],
    packet_size: usize,
    progress: F,
) -> Result<TransferReport>
where
    F: FnMut(usize, usize),
{
    let packets = plan(image, packet_size)?;
    info!(
        "Transmitting {} bytes in {} packet(s) of up to {packet_size} bytes",
        image.len(),
        packets.len()
    );
    transmit(host, &packets, progress)
}
