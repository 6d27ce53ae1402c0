//! Binary input: a data file streamed to one of the peripheral's inputs.

use {
    super::{TransferReport, check_packet_size, packet_count},
    crate::{
        error::{Error, Result},
        host::HostInterface,
        protocol::{
            Opcode,
            catalog::{self, check_status},
        },
    },
    log::{debug, error, info},
};

/// Data bytes per binary-input packet until changed.
pub const DEFAULT_PACKET_SIZE: usize = 500;

/// Send `data` to input `input` in packets of at most `packet_size` bytes.
///
/// Count and number are single bytes, so at most 255 packets fit one
/// transfer.
pub fn send(
    host: &mut dyn HostInterface,
    input: u8,
    data: &[u8],
    packet_size: usize,
) -> Result<TransferReport> {
    check_packet_size(packet_size)?;
    let count = packet_count(data.len(), packet_size);
    let total = u8::try_from(count).map_err(|_| {
        Error::InvalidOperand(format!(
            "{count} binary input packets exceed the 8-bit packet counter"
        ))
    })?;
    info!("Binary input {input}: {} bytes in {total} packet(s)", data.len());

    let mut offset = 0;
    for (chunk, number) in data
        .chunks(packet_size)
        .zip(1..=total)
    {
        debug!("Packet({number}/{total}) part size {}", chunk.len());
        let result = catalog::binary_input_packet(input, total, number, chunk)
            .and_then(|cmd| host.transaction(&cmd))
            .and_then(|res| check_status(&res, Opcode::BinaryInput));
        if let Err(e) = result {
            error!("Binary input packet {number} failed: {e}");
            return Err(Error::Segment {
                completed: usize::from(number - 1),
                total: count,
                offset,
                source: Box::new(e),
            });
        }
        offset += chunk.len();
    }

    Ok(TransferReport {
        packets: count,
        bytes: offset,
    })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            host::{TransportKind, mock::ScriptedTransport},
            protocol::Frame,
        },
    };

    #[test]
    fn test_packet_layout() {
        let data: Vec<u8> = (0..1200u32).map(|i| i as u8).collect();
        let mut host = ScriptedTransport::acking(TransportKind::Serial);

        let report = send(&mut host, 2, &data, 500).unwrap();
        assert_eq!(report.packets, 3);

        let sent = host.sent();
        assert_eq!(sent.len(), 3);
        for (i, frame) in sent
            .iter()
            .enumerate()
        {
            assert_eq!(frame.opcode(), 0x07);
            assert_eq!(&frame.operand()[..3], &[2, 3, i as u8 + 1]);
        }
        assert_eq!(sent[2].operand().len(), 3 + 200);
    }

    #[test]
    fn test_long_status_response_accepted() {
        let mut host = ScriptedTransport::new(TransportKind::Serial, |_: &Frame| {
            Ok(Frame::new(0x07, vec![0x00, 0x10, 0x20]))
        });
        assert!(send(&mut host, 0, &[1, 2, 3], 500).is_ok());
    }

    #[test]
    fn test_too_many_packets() {
        let mut host = ScriptedTransport::acking(TransportKind::Serial);
        let data = vec![0u8; 256];
        assert!(matches!(
            send(&mut host, 0, &data, 1),
            Err(Error::InvalidOperand(_))
        ));
        assert!(host.sent().is_empty());
    }

    #[test]
    fn test_rejected_packet_stops_transfer() {
        let mut host = ScriptedTransport::new(TransportKind::Serial, |request: &Frame| {
            let status = if request.operand()[2] == 2 { 0x01 } else { 0x00 };
            Ok(Frame::new(0x07, vec![status]))
        });
        let err = send(&mut host, 0, &[0u8; 30], 10).unwrap_err();
        assert!(matches!(err, Error::Segment { completed: 1, offset: 10, .. }));
        assert_eq!(host.sent().len(), 2);
    }
}
