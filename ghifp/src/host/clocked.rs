//! Clocked shift-register (SPI style) transport.
//!
//! Every bus-request edge grants one 1024-byte block. The header is clocked in
//! as the start of the first block. With a 16-bit word size each transfer is
//! rounded up to whole words and the pad byte is dropped.

use {
    super::{
        ConfigRequest, HostInterface, Link, LinkContext, TransportKind, check_request,
        reassembly::{BlockLayout, BlockReader, BlockSource, run_block_receiver},
    },
    crate::{
        error::{Error, Result},
        port::{BusRequestLine, ClockedBus},
        protocol::{Frame, catalog::WORD_SIZE_INDEX_MAX},
        worker::Worker,
    },
    log::{debug, info},
    parking_lot::Mutex,
    std::{
        io,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    },
};

/// Clock frequency until reconfigured.
pub const DEFAULT_CLOCK_FREQUENCY: u32 = 2_600_000;

/// Word size until reconfigured.
pub const DEFAULT_WORD_SIZE: u8 = 8;

/// Bytes per bus-request edge, header included.
pub const BLOCK_LEN: usize = 1024;

const CLOCK_SPEEDS: [u32; 7] = [
    1_300_000, 2_600_000, 5_200_000, 6_500_000, 7_800_000, 9_750_000, 13_000_000,
];

/// Clock frequency for a clock speed index.
pub fn clock_speed(index: u8) -> Result<u32> {
    CLOCK_SPEEDS
        .get(usize::from(index))
        .copied()
        .ok_or_else(|| Error::InvalidOperand(format!("no clock speed with index {index}")))
}

/// Word size in bits for a word-size index. Index 2 (32-bit) is
/// protocol-only.
pub fn word_size(index: u8) -> Result<u8> {
    match index {
        0 => Ok(8),
        1 => Ok(16),
        i if i <= WORD_SIZE_INDEX_MAX => Err(Error::Unsupported(format!(
            "word size index {i} is not available on this host"
        ))),
        i => Err(Error::InvalidOperand(format!("no word size with index {i}"))),
    }
}

/// Bytes actually clocked for `len` payload bytes at `bits` per word.
pub fn transfer_len(bits: u8, len: usize) -> usize {
    if bits == 16 { len.next_multiple_of(2) } else { len }
}

struct Device<B> {
    bus: B,
    word_size: u8,
    frequency: u32,
    // Second half of the last 16-bit word read, not yet handed out.
    carry: Option<u8>,
}

impl<B: ClockedBus> Device<B> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let len = transfer_len(self.word_size, data.len());
        if len == data.len() {
            return self
                .bus
                .write(data);
        }
        let mut padded = data.to_vec();
        padded.resize(len, 0);
        self.bus
            .write(&padded)
    }

    /// Read `buf.len()` bytes. In 16-bit mode a surplus byte is kept for the
    /// next read within the same block.
    ///
    /// A carried byte is only consumed once the bus read succeeds, so a
    /// retried read starts from the same position.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut start = 0;
        if let (Some(byte), Some(first)) = (self.carry, buf.first_mut()) {
            *first = byte;
            start = 1;
        }
        let rest = &mut buf[start..];
        if rest.is_empty() {
            self.carry = None;
            return Ok(());
        }

        let len = transfer_len(self.word_size, rest.len());
        if len == rest.len() {
            self.bus
                .read(rest)?;
            self.carry = None;
            return Ok(());
        }
        let mut padded = vec![0u8; len];
        self.bus
            .read(&mut padded)?;
        rest.copy_from_slice(&padded[..rest.len()]);
        self.carry = padded
            .last()
            .copied();
        Ok(())
    }

    fn set_word_size(&mut self, bits: u8) -> io::Result<()> {
        self.bus
            .set_word_size(bits)?;
        self.word_size = bits;
        self.carry = None;
        Ok(())
    }
}

/// GHIFP over a clocked link.
///
/// The device sits behind one lock; every exchange holds it for exactly the
/// duration of the transfer.
pub struct ClockedTransport<B: ClockedBus> {
    device: Arc<Mutex<Device<B>>>,
    link: Link,
    diagnostic: Arc<AtomicBool>,
    _receiver: Worker,
}

impl<B: ClockedBus + 'static> ClockedTransport<B> {
    /// Configure `bus` with the default clock and word size and start
    /// receiving, paced by `line`.
    pub fn new(mut bus: B, line: BusRequestLine, ctx: &LinkContext) -> Result<Self> {
        bus.set_word_size(DEFAULT_WORD_SIZE)?;
        bus.set_frequency(DEFAULT_CLOCK_FREQUENCY)?;
        let device = Arc::new(Mutex::new(Device {
            bus,
            word_size: DEFAULT_WORD_SIZE,
            frequency: DEFAULT_CLOCK_FREQUENCY,
            carry: None,
        }));
        let diagnostic = Arc::new(AtomicBool::new(false));

        let source = ClockedSource {
            device: Arc::clone(&device),
            line,
        };
        let reader = BlockReader::new(
            BlockLayout {
                block_len: BLOCK_LEN,
                header_in_first_block: true,
            },
            ctx.retry(),
        );
        let dispatcher = ctx.dispatcher();
        let flag = Arc::clone(&diagnostic);
        let receiver = Worker::spawn("ghifp-clocked-rx", move |shutdown| {
            run_block_receiver(source, reader, dispatcher, flag, shutdown, "Clocked");
        })?;

        info!("Clocked transport at {DEFAULT_CLOCK_FREQUENCY} Hz, {DEFAULT_WORD_SIZE}-bit words");
        Ok(Self {
            device,
            link: ctx.link(),
            diagnostic,
            _receiver: receiver,
        })
    }

    /// Current word size in bits.
    pub fn word_size(&self) -> u8 {
        self.device
            .lock()
            .word_size
    }

    /// Current clock frequency.
    pub fn frequency(&self) -> u32 {
        self.device
            .lock()
            .frequency
    }

    fn set_word_size(&self, bits: u8) -> Result<()> {
        let mut device = self
            .device
            .lock();
        info!("Set word size {} -> {bits}", device.word_size);
        device.set_word_size(bits)?;
        Ok(())
    }

    fn set_frequency(&self, frequency: u32) -> Result<()> {
        let mut device = self
            .device
            .lock();
        device
            .bus
            .set_frequency(frequency)?;
        info!("Set clock {} -> {frequency}", device.frequency);
        device.frequency = frequency;
        Ok(())
    }
}

impl<B: ClockedBus + 'static> HostInterface for ClockedTransport<B> {
    fn kind(&self) -> TransportKind {
        TransportKind::Clocked
    }

    fn write(&mut self, frame: &[u8]) -> Result<usize> {
        check_request(frame)?;
        self.link
            .begin_request();
        let sent = self
            .device
            .lock()
            .write(frame);
        if let Err(e) = sent {
            self.link
                .abandon();
            return Err(e.into());
        }
        debug!("Sent {} bytes", frame.len());
        Ok(frame.len())
    }

    fn read(&mut self) -> Result<Frame> {
        self.link
            .await_response()
    }

    fn diagnostic_write(&mut self, raw: &[u8]) -> Result<usize> {
        self.device
            .lock()
            .write(raw)?;
        Ok(raw.len())
    }

    fn configure(&mut self, request: ConfigRequest) -> Result<()> {
        match request {
            ConfigRequest::WordSize(bits) => self.set_word_size(if bits >= 16 { 16 } else { 8 }),
            ConfigRequest::DiagnosticReceive(on) => {
                self.diagnostic
                    .store(on, Ordering::Relaxed);
                info!("Debug receive mode: {}", if on { "ON" } else { "OFF" });
                Ok(())
            },
            ConfigRequest::ClockSpeed(index) => self.set_frequency(clock_speed(index)?),
            ConfigRequest::LineParameters(index) => self.set_word_size(word_size(index)?),
            ConfigRequest::TargetAddress(_) => Err(Error::Unsupported(
                "the clocked transport has no target address".into(),
            )),
        }
    }

    fn abandon_response(&mut self) {
        self.link
            .abandon();
    }
}

struct ClockedSource<B> {
    device: Arc<Mutex<Device<B>>>,
    line: BusRequestLine,
}

impl<B: ClockedBus> BlockSource for ClockedSource<B> {
    fn wait_ready(&mut self, timeout: Duration) -> bool {
        if !self
            .line
            .wait_timeout(timeout)
        {
            return false;
        }
        // Blocks are whole words, so nothing carries across an edge.
        self.device
            .lock()
            .carry = None;
        true
    }

    fn read_block(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.device
            .lock()
            .read(buf)
    }
}
