//! Bus-addressed (I2C style) transport.
//!
//! The peripheral raises its bus-request line once per block it has ready:
//! once for the 5-byte header, then once per 512-byte slice of the body.

use {
    super::{
        ConfigRequest, HostInterface, Link, LinkContext, TransportKind, check_request,
        reassembly::{BlockLayout, BlockReader, BlockSource, run_block_receiver},
    },
    crate::{
        error::{Error, Result},
        port::{AddressedBus, BusRequestLine},
        protocol::Frame,
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

/// 7-bit target address of the peripheral.
pub const DEFAULT_TARGET_ADDRESS: u16 = 0x24;

/// Bus frequency until reconfigured.
pub const DEFAULT_BUS_FREQUENCY: u32 = 400_000;

/// Body bytes per bus-request edge.
pub const BLOCK_LEN: usize = 512;

/// Host frequency per bus speed index. Index 2 (3.4 MHz) is protocol-only.
const BUS_SPEEDS: [u32; 2] = [100_000, 400_000];

/// Bus frequency for a speed index.
pub fn bus_speed(index: u8) -> Result<u32> {
    match BUS_SPEEDS.get(usize::from(index)) {
        Some(speed) => Ok(*speed),
        None if index <= crate::protocol::catalog::BUS_SPEED_INDEX_MAX => Err(
            Error::Unsupported(format!("bus speed index {index} is not available on this host")),
        ),
        None => Err(Error::InvalidOperand(format!("no bus speed with index {index}"))),
    }
}

#[derive(Debug, Clone, Copy)]
struct Target {
    address: u16,
    frequency: u32,
}

/// GHIFP over a bus-addressed link.
pub struct AddressedTransport<B: AddressedBus> {
    bus: Arc<Mutex<B>>,
    target: Arc<Mutex<Target>>,
    link: Link,
    diagnostic: Arc<AtomicBool>,
    _receiver: Worker,
}

impl<B: AddressedBus + 'static> AddressedTransport<B> {
    /// Start receiving on `bus`, paced by `line`.
    pub fn new(bus: B, line: BusRequestLine, ctx: &LinkContext) -> Result<Self> {
        let bus = Arc::new(Mutex::new(bus));
        let target = Arc::new(Mutex::new(Target {
            address: DEFAULT_TARGET_ADDRESS,
            frequency: DEFAULT_BUS_FREQUENCY,
        }));
        let diagnostic = Arc::new(AtomicBool::new(false));

        let source = AddressedSource {
            bus: Arc::clone(&bus),
            target: Arc::clone(&target),
            line,
        };
        let reader = BlockReader::new(
            BlockLayout {
                block_len: BLOCK_LEN,
                header_in_first_block: false,
            },
            ctx.retry(),
        );
        let dispatcher = ctx.dispatcher();
        let flag = Arc::clone(&diagnostic);
        let receiver = Worker::spawn("ghifp-addressed-rx", move |shutdown| {
            run_block_receiver(source, reader, dispatcher, flag, shutdown, "Bus-addressed");
        })?;

        info!(
            "Bus-addressed transport at {DEFAULT_TARGET_ADDRESS:#04x}, {DEFAULT_BUS_FREQUENCY} Hz"
        );
        Ok(Self {
            bus,
            target,
            link: ctx.link(),
            diagnostic,
            _receiver: receiver,
        })
    }

    /// Current target address.
    pub fn target_address(&self) -> u16 {
        self.target
            .lock()
            .address
    }

    /// Current bus frequency.
    pub fn frequency(&self) -> u32 {
        self.target
            .lock()
            .frequency
    }

    fn send(&self, bytes: &[u8]) -> Result<()> {
        let target = *self
            .target
            .lock();
        self.bus
            .lock()
            .write(target.address, target.frequency, bytes)?;
        Ok(())
    }
}

impl<B: AddressedBus + 'static> HostInterface for AddressedTransport<B> {
    fn kind(&self) -> TransportKind {
        TransportKind::Addressed
    }

    fn write(&mut self, frame: &[u8]) -> Result<usize> {
        check_request(frame)?;
        self.link
            .begin_request();
        if let Err(e) = self.send(frame) {
            self.link
                .abandon();
            return Err(e);
        }
        debug!("Sent {} bytes", frame.len());
        Ok(frame.len())
    }

    fn read(&mut self) -> Result<Frame> {
        self.link
            .await_response()
    }

    fn diagnostic_write(&mut self, raw: &[u8]) -> Result<usize> {
        self.send(raw)?;
        Ok(raw.len())
    }

    fn configure(&mut self, request: ConfigRequest) -> Result<()> {
        match request {
            ConfigRequest::TargetAddress(address) => {
                info!("Set target address -> {address:#04x}");
                self.target
                    .lock()
                    .address = address;
                Ok(())
            },
            ConfigRequest::DiagnosticReceive(on) => {
                self.diagnostic
                    .store(on, Ordering::Relaxed);
                info!("Debug receive mode: {}", if on { "ON" } else { "OFF" });
                Ok(())
            },
            ConfigRequest::LineParameters(index) => {
                let frequency = bus_speed(index)?;
                let mut target = self
                    .target
                    .lock();
                info!("Change speed {} -> {frequency}", target.frequency);
                target.frequency = frequency;
                Ok(())
            },
            other => Err(Error::Unsupported(format!(
                "{other:?} has no meaning on the bus-addressed transport"
            ))),
        }
    }

    fn abandon_response(&mut self) {
        self.link
            .abandon();
    }
}

struct AddressedSource<B> {
    bus: Arc<Mutex<B>>,
    target: Arc<Mutex<Target>>,
    line: BusRequestLine,
}

impl<B: AddressedBus> BlockSource for AddressedSource<B> {
    fn wait_ready(&mut self, timeout: Duration) -> bool {
        self.line
            .wait_timeout(timeout)
    }

    fn read_block(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let target = *self
            .target
            .lock();
        self.bus
            .lock()
            .read(target.address, target.frequency, buf)
    }
}
