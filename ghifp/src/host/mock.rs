//! In-memory links for tests.

use {
    super::{ConfigRequest, HostInterface, TransportKind, reassembly::BlockSource},
    crate::{
        error::{Error, Result},
        port::{AddressedBus, BusRequestLine, ClockedBus, Port},
        protocol::{Frame, Opcode, frame},
    },
    parking_lot::{Condvar, Mutex},
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        sync::Arc,
        time::Duration,
    },
};

/// Builds the peripheral's reply to one written request.
pub(crate) type Responder = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Status-zero acknowledgement for every valid request.
///
/// Change-status requests are answered with a change-status frame echoing the
/// requested state, the way the peripheral confirms a transition.
pub(crate) fn ack_all() -> Responder {
    Arc::new(|request: &[u8]| match frame::validate(request) {
        Ok(header) if header.opcode == u8::from(Opcode::ChangeStatus) => {
            frame::encode(header.opcode, &request[frame::HEADER_LEN..frame::HEADER_LEN + 1])
                .unwrap()
        },
        Ok(header) => frame::encode(header.opcode, &[0x00]).unwrap(),
        Err(_) => Vec::new(),
    })
}

/// Reply with `status` to every request.
pub(crate) fn reply_status(status: u8) -> Responder {
    Arc::new(move |request: &[u8]| match frame::validate(request) {
        Ok(header) => frame::encode(header.opcode, &[status]).unwrap(),
        Err(_) => Vec::new(),
    })
}

#[derive(Default)]
struct Line {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    baud_rate: u32,
}

/// Serial port whose far end is a closure.
#[derive(Clone)]
pub(crate) struct LoopbackPort {
    line: Arc<(Mutex<Line>, Condvar)>,
    responder: Option<Responder>,
    timeout: Duration,
}

impl LoopbackPort {
    pub(crate) fn new() -> Self {
        Self {
            line: Arc::default(),
            responder: None,
            timeout: Duration::from_millis(20),
        }
    }

    pub(crate) fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Bytes sent by the peripheral without a request.
    pub(crate) fn inject(&self, bytes: &[u8]) {
        let (line, ready) = &*self.line;
        line.lock()
            .inbound
            .extend(bytes);
        ready.notify_all();
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.line
            .0
            .lock()
            .written
            .clone()
    }
}

impl Read for LoopbackPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (line, ready) = &*self.line;
        let mut line = line.lock();
        if line.inbound.is_empty() {
            let _ = ready.wait_for(&mut line, self.timeout);
        }
        if line.inbound.is_empty() {
            return Err(io::ErrorKind::TimedOut.into());
        }
        let n = buf.len().min(line.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(line.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for LoopbackPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.line
            .0
            .lock()
            .written
            .extend_from_slice(buf);
        if let Some(responder) = &self.responder {
            let reply = responder(buf);
            self.inject(&reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for LoopbackPort {
    fn name(&self) -> &str {
        "loopback"
    }

    fn baud_rate(&self) -> u32 {
        self.line
            .0
            .lock()
            .baud_rate
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.line
            .0
            .lock()
            .baud_rate = baud_rate;
        Ok(())
    }

    fn receiver(&self, poll: Duration) -> Result<Self> {
        let mut handle = self.clone();
        handle.timeout = poll;
        Ok(handle)
    }
}

/// Frame bytes delivered block by block, one edge per block.
pub(crate) struct ScriptedBlocks {
    data: VecDeque<u8>,
    edges: usize,
    edges_used: usize,
    failures: usize,
    reads: Vec<usize>,
}

impl ScriptedBlocks {
    pub(crate) fn new(bytes: &[u8], edges: usize) -> Self {
        Self {
            data: bytes.iter().copied().collect(),
            edges,
            edges_used: 0,
            failures: 0,
            reads: Vec::new(),
        }
    }

    pub(crate) fn fail_next_reads(mut self, count: usize) -> Self {
        self.failures = count;
        self
    }

    pub(crate) fn edges_used(&self) -> usize {
        self.edges_used
    }

    pub(crate) fn reads(&self) -> Vec<usize> {
        self.reads.clone()
    }
}

impl BlockSource for ScriptedBlocks {
    fn wait_ready(&mut self, _timeout: Duration) -> bool {
        if self.edges == 0 {
            return false;
        }
        self.edges -= 1;
        self.edges_used += 1;
        true
    }

    fn read_block(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(io::Error::other("bus busy"));
        }
        if self.data.len() < buf.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let n = buf.len();
        for (slot, byte) in buf.iter_mut().zip(self.data.drain(..n)) {
            *slot = byte;
        }
        self.reads.push(n);
        Ok(())
    }
}

#[derive(Default)]
struct BusState {
    inbound: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    settings: Vec<(u16, u32)>,
    word_size: u8,
    frequency: u32,
    reads: usize,
    failing_read: Option<usize>,
    failed_reads: usize,
}

/// Block bus whose far end is a closure, raising bus-request edges for each
/// block of the reply.
#[derive(Clone)]
pub(crate) struct MockBus {
    state: Arc<Mutex<BusState>>,
    line: BusRequestLine,
    responder: Responder,
    edges_for: fn(usize) -> usize,
}

impl MockBus {
    /// Bus-addressed layout: header edge plus one per 512-byte body block.
    pub(crate) fn addressed(line: BusRequestLine, responder: Responder) -> Self {
        Self::new(line, responder, |len| {
            1 + (len - frame::HEADER_LEN).div_ceil(512)
        })
    }

    /// Clocked layout: one edge per 1024-byte block, header included.
    pub(crate) fn clocked(line: BusRequestLine, responder: Responder) -> Self {
        Self::new(line, responder, |len| len.div_ceil(1024))
    }

    fn new(line: BusRequestLine, responder: Responder, edges_for: fn(usize) -> usize) -> Self {
        Self {
            state: Arc::default(),
            line,
            responder,
            edges_for,
        }
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .writes
            .clone()
    }

    pub(crate) fn last_target(&self) -> Option<(u16, u32)> {
        self.state
            .lock()
            .settings
            .last()
            .copied()
    }

    pub(crate) fn word_size(&self) -> u8 {
        self.state
            .lock()
            .word_size
    }

    pub(crate) fn frequency(&self) -> u32 {
        self.state
            .lock()
            .frequency
    }

    /// Fail the read `skip` reads from now, once.
    pub(crate) fn fail_read_after(&self, skip: usize) {
        let mut state = self.state.lock();
        state.failing_read = Some(state.reads + skip);
    }

    pub(crate) fn failed_reads(&self) -> usize {
        self.state
            .lock()
            .failed_reads
    }

    fn accept(&self, data: &[u8]) {
        let reply = (self.responder)(data);
        let edges = if reply.is_empty() { 0 } else { (self.edges_for)(reply.len()) };
        {
            let mut state = self.state.lock();
            state.writes.push(data.to_vec());
            state.inbound.extend(reply);
        }
        for _ in 0..edges {
            self.line.signal();
        }
    }

    fn take(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        let index = state.reads;
        state.reads += 1;
        if state.failing_read == Some(index) {
            state.failing_read = None;
            state.failed_reads += 1;
            return Err(io::Error::other("bus busy"));
        }
        // A 16-bit peripheral pads its last word.
        if state.word_size == 16 && buf.len() == state.inbound.len() + 1 {
            state.inbound.push_back(0);
        }
        if state.inbound.len() < buf.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let n = buf.len();
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(())
    }
}

impl AddressedBus for MockBus {
    fn read(&mut self, address: u16, frequency: u32, buf: &mut [u8]) -> io::Result<()> {
        self.state
            .lock()
            .settings
            .push((address, frequency));
        self.take(buf)
    }

    fn write(&mut self, address: u16, frequency: u32, data: &[u8]) -> io::Result<()> {
        self.state
            .lock()
            .settings
            .push((address, frequency));
        self.accept(data);
        Ok(())
    }
}

impl ClockedBus for MockBus {
    fn set_word_size(&mut self, bits: u8) -> io::Result<()> {
        self.state
            .lock()
            .word_size = bits;
        Ok(())
    }

    fn set_frequency(&mut self, frequency: u32) -> io::Result<()> {
        self.state
            .lock()
            .frequency = frequency;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.accept(data);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.take(buf)
    }
}

/// Host interface answering each request from a closure, recording what
/// was sent.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    kind: TransportKind,
    reply: Arc<dyn Fn(&Frame) -> Result<Frame> + Send + Sync>,
    sent: Arc<Mutex<Vec<Frame>>>,
    diagnostic: Arc<Mutex<Vec<Vec<u8>>>>,
    configured: Arc<Mutex<Vec<ConfigRequest>>>,
    pending: Option<Frame>,
}

impl ScriptedTransport {
    pub(crate) fn new(
        kind: TransportKind,
        reply: impl Fn(&Frame) -> Result<Frame> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            reply: Arc::new(reply),
            sent: Arc::default(),
            diagnostic: Arc::default(),
            configured: Arc::default(),
            pending: None,
        }
    }

    /// Acknowledge every request with status zero.
    pub(crate) fn acking(kind: TransportKind) -> Self {
        Self::new(kind, |request| Ok(Frame::new(request.opcode(), vec![0x00])))
    }

    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .clone()
    }

    pub(crate) fn diagnostic(&self) -> Vec<Vec<u8>> {
        self.diagnostic
            .lock()
            .clone()
    }

    pub(crate) fn configured(&self) -> Vec<ConfigRequest> {
        self.configured
            .lock()
            .clone()
    }
}

impl HostInterface for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let frame = Frame::parse(bytes)?;
        self.sent
            .lock()
            .push(frame.clone());
        self.pending = Some(frame);
        Ok(bytes.len())
    }

    fn read(&mut self) -> Result<Frame> {
        let request = self
            .pending
            .take()
            .ok_or_else(|| Error::Timeout("nothing pending".into()))?;
        (self.reply)(&request)
    }

    fn diagnostic_write(&mut self, raw: &[u8]) -> Result<usize> {
        self.diagnostic
            .lock()
            .push(raw.to_vec());
        Ok(raw.len())
    }

    fn configure(&mut self, request: ConfigRequest) -> Result<()> {
        self.configured
            .lock()
            .push(request);
        Ok(())
    }

    fn abandon_response(&mut self) {
        self.pending = None;
    }
}
