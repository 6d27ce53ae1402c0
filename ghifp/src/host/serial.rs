//! Byte-stream serial transport.

use {
    super::{
        ConfigRequest, HostInterface, Link, LinkContext, TransportKind, check_request,
        dispatch::Dispatcher,
        reassembly::{POLL_INTERVAL, STREAM_BUFFER_LEN, StreamReassembler, hex_dump},
    },
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::Frame,
        worker::{Shutdown, Worker},
    },
    log::{debug, error, info, warn},
    std::{
        io::ErrorKind,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
    },
};

/// Baud rate used until the peripheral is reconfigured.
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Host-side baud rate for each serial rate index.
///
/// Index 2 (14400 bps) exists in the protocol but not on the host.
const SERIAL_RATES: [Option<u32>; 11] = [
    Some(4800),
    Some(9600),
    None,
    Some(19200),
    Some(38400),
    Some(57600),
    Some(115200),
    Some(230400),
    Some(460800),
    Some(921600),
    Some(1_000_000),
];

/// Baud rate for a rate index.
pub fn serial_rate(index: u8) -> Result<u32> {
    match SERIAL_RATES.get(usize::from(index)) {
        Some(Some(rate)) => Ok(*rate),
        Some(None) => Err(Error::Unsupported(format!(
            "serial rate index {index} is not available on this host"
        ))),
        None => Err(Error::InvalidOperand(format!("no serial rate with index {index}"))),
    }
}

/// GHIFP over a serial port.
///
/// Owns a receive thread that reassembles frames from its own handle to the
/// port. Dropping the transport stops the thread.
pub struct SerialTransport<P: Port> {
    port: P,
    link: Link,
    diagnostic: Arc<AtomicBool>,
    _receiver: Worker,
}

impl<P: Port + 'static> SerialTransport<P> {
    /// Start receiving on `port`.
    pub fn new(port: P, ctx: &LinkContext) -> Result<Self> {
        let reader = port.receiver(POLL_INTERVAL)?;

        let diagnostic = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&diagnostic);
        let dispatcher = ctx.dispatcher();
        let receiver = Worker::spawn("ghifp-serial-rx", move |shutdown| {
            receive_loop(reader, &dispatcher, &flag, &shutdown);
        })?;

        info!("Serial transport on {} at {} baud", port.name(), port.baud_rate());
        Ok(Self {
            port,
            link: ctx.link(),
            diagnostic,
            _receiver: receiver,
        })
    }

    /// Current baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.port
            .baud_rate()
    }

    fn change_baud_rate(&mut self, index: u8) -> Result<()> {
        let rate = serial_rate(index)?;
        info!("Change baud rate {} -> {rate}", self.port.baud_rate());
        self.port
            .set_baud_rate(rate)
    }
}

impl<P: Port + 'static> HostInterface for SerialTransport<P> {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn write(&mut self, frame: &[u8]) -> Result<usize> {
        check_request(frame)?;
        self.link
            .begin_request();
        if let Err(e) = self
            .port
            .send(frame)
        {
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
        self.port
            .send(raw)?;
        Ok(raw.len())
    }

    fn configure(&mut self, request: ConfigRequest) -> Result<()> {
        match request {
            ConfigRequest::DiagnosticReceive(on) => {
                self.diagnostic
                    .store(on, Ordering::Relaxed);
                info!("Debug receive mode: {}", if on { "ON" } else { "OFF" });
                Ok(())
            },
            ConfigRequest::LineParameters(index) => self.change_baud_rate(index),
            other => Err(Error::Unsupported(format!(
                "{other:?} has no meaning on the serial transport"
            ))),
        }
    }

    fn abandon_response(&mut self) {
        self.link
            .abandon();
    }
}

fn receive_loop<P: Port>(
    mut port: P,
    dispatcher: &Dispatcher,
    diagnostic: &AtomicBool,
    shutdown: &Shutdown,
) {
    let mut reassembler = StreamReassembler::new();
    let mut buf = vec![0u8; STREAM_BUFFER_LEN];
    let mut dumping = false;

    while !shutdown.is_requested() {
        let n = match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue;
            },
            Err(e) => {
                error!("Serial read failed: {e}");
                thread::sleep(POLL_INTERVAL);
                continue;
            },
        };

        let dump = diagnostic.load(Ordering::Relaxed);
        if dump != dumping {
            reassembler.reset();
            dumping = dump;
        }
        if dumping {
            info!("Serial data dump: {}", hex_dump(&buf[..n]));
            continue;
        }

        for result in reassembler.feed(&buf[..n]) {
            match result {
                Ok(frame) => dispatcher.dispatch(frame),
                Err(e) => warn!("Invalid frame on serial link: {e}"),
            }
        }
    }
}
