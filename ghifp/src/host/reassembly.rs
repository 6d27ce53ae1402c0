//! Frame reassembly for byte-stream and block-oriented links.
//!
//! The serial link delivers an unstructured byte stream: frames may be split
//! across reads or several may arrive in one. [`StreamReassembler`] buffers
//! and slices them.
//!
//! The bus-addressed and clocked links deliver fixed-size blocks, one per
//! bus-request edge. [`BlockReader`] waits for each edge, reads the header,
//! then pulls the body block by block.

use {
    super::dispatch::Dispatcher,
    crate::{
        error::{FrameError, Result},
        protocol::{
            Frame,
            frame::{self, HEADER_LEN, Header, MAX_OPERAND_LEN},
        },
        worker::Shutdown,
    },
    log::{info, warn},
    std::{
        fmt::Write as _,
        io,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    },
};

/// Capacity of the byte-stream receive buffer.
pub const STREAM_BUFFER_LEN: usize = 4096 + 16;

/// Bytes read per bus-request edge in diagnostic-receive mode.
pub const DIAGNOSTIC_BLOCK_LEN: usize = 256;

/// How long a receive thread blocks before rechecking for shutdown.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reassembly progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    /// Waiting for a complete header.
    AwaitingHeader,
    /// Header decoded; waiting for operand and checksum.
    AwaitingData(Header),
}

/// Reassembles frames from an arbitrary chunking of the byte stream.
#[derive(Debug)]
pub struct StreamReassembler {
    buf: Vec<u8>,
    state: ReassemblyState,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(STREAM_BUFFER_LEN),
            state: ReassemblyState::AwaitingHeader,
        }
    }

    /// Current state.
    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    /// Bytes held but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf
            .len()
    }

    /// Drop everything buffered.
    pub fn reset(&mut self) {
        self.buf
            .clear();
        self.state = ReassemblyState::AwaitingHeader;
    }

    /// Feed received bytes and collect every frame they complete.
    ///
    /// A bad header or checksum discards everything buffered and is reported
    /// in place of a frame.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Vec<std::result::Result<Frame, FrameError>> {
        let mut out = Vec::new();
        while !bytes.is_empty() {
            let room = STREAM_BUFFER_LEN - self.buf.len();
            let (chunk, rest) = bytes.split_at(room.min(bytes.len()));
            self.buf
                .extend_from_slice(chunk);
            bytes = rest;
            self.drain_frames(&mut out);
        }
        out
    }

    fn drain_frames(&mut self, out: &mut Vec<std::result::Result<Frame, FrameError>>) {
        loop {
            match self.state {
                ReassemblyState::AwaitingHeader => {
                    if self.buf.len() < HEADER_LEN {
                        return;
                    }
                    match frame::decode_header(&self.buf) {
                        Ok(header) if usize::from(header.operand_len) > MAX_OPERAND_LEN => {
                            out.push(Err(FrameError::OperandTooLong(header.operand_len)));
                            self.reset();
                            return;
                        },
                        Ok(header) => self.state = ReassemblyState::AwaitingData(header),
                        Err(e) => {
                            out.push(Err(e));
                            self.reset();
                            return;
                        },
                    }
                },
                ReassemblyState::AwaitingData(header) => {
                    let len = header.wire_len();
                    if self.buf.len() < len {
                        return;
                    }
                    if let Err(e) = frame::verify_operand(&self.buf[HEADER_LEN..], header.operand_len) {
                        out.push(Err(e));
                        self.reset();
                        return;
                    }

                    let operand_end = HEADER_LEN + usize::from(header.operand_len);
                    let operand = self.buf[HEADER_LEN..operand_end].to_vec();
                    self.buf
                        .drain(..len);
                    self.state = ReassemblyState::AwaitingHeader;
                    out.push(Ok(Frame::new(header.opcode, operand)));
                },
            }
        }
    }
}

/// Bounded retry with exponential backoff for block transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the attempts are used up.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        let attempts = self.attempts.max(1);
        let mut delay = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!("{what} failed (attempt {attempt}/{attempts}): {e}");
                    thread::sleep(delay);
                    delay = (delay * 2).min(self.max_backoff);
                    attempt += 1;
                },
            }
        }
    }
}

/// A block-oriented link as seen by the receive thread.
pub(crate) trait BlockSource {
    /// Consume one bus-request edge, waiting up to `timeout`.
    fn wait_ready(&mut self, timeout: Duration) -> bool;

    /// Read exactly `buf.len()` bytes in one transfer.
    fn read_block(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// How a link splits a frame into flow-controlled blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    /// Bytes transferred per bus-request edge.
    pub block_len: usize,
    /// Whether the header is read as the start of the first block (clocked
    /// link) or on its own edge (bus-addressed link).
    pub header_in_first_block: bool,
}

/// Pulls whole frames out of a [`BlockSource`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockReader {
    layout: BlockLayout,
    retry: RetryPolicy,
}

impl BlockReader {
    pub(crate) fn new(layout: BlockLayout, retry: RetryPolicy) -> Self {
        Self { layout, retry }
    }

    /// Read the next frame. `Ok(None)` means shutdown was requested while
    /// waiting for an edge.
    pub(crate) fn next_frame<S: BlockSource>(
        &self,
        source: &mut S,
        shutdown: &Shutdown,
    ) -> Result<Option<Frame>> {
        if !wait_edge(source, shutdown) {
            return Ok(None);
        }

        let mut buf = vec![0u8; HEADER_LEN];
        self.retry
            .run("Header read", || source.read_block(&mut buf))?;
        let header = frame::decode_header(&buf)?;
        if usize::from(header.operand_len) > MAX_OPERAND_LEN {
            return Err(FrameError::OperandTooLong(header.operand_len).into());
        }

        buf.resize(header.wire_len(), 0);
        let mut filled = HEADER_LEN;
        let mut granted = if self.layout.header_in_first_block {
            self.layout
                .block_len
                .saturating_sub(HEADER_LEN)
        } else {
            0
        };

        while filled < buf.len() {
            if granted == 0 {
                if !wait_edge(source, shutdown) {
                    return Ok(None);
                }
                granted = self.layout.block_len;
            }
            let n = granted.min(buf.len() - filled);
            let block = &mut buf[filled..filled + n];
            self.retry
                .run("Data read", || source.read_block(&mut *block))?;
            filled += n;
            granted -= n;
        }

        frame::verify_operand(&buf[HEADER_LEN..], header.operand_len)?;
        buf.truncate(HEADER_LEN + usize::from(header.operand_len));
        let operand = buf.split_off(HEADER_LEN);
        Ok(Some(Frame::new(header.opcode, operand)))
    }
}

fn wait_edge<S: BlockSource>(source: &mut S, shutdown: &Shutdown) -> bool {
    while !shutdown.is_requested() {
        if source.wait_ready(POLL_INTERVAL) {
            return true;
        }
    }
    false
}

/// Receive loop shared by the block-oriented transports.
pub(crate) fn run_block_receiver<S: BlockSource>(
    mut source: S,
    reader: BlockReader,
    dispatcher: Dispatcher,
    diagnostic: Arc<AtomicBool>,
    shutdown: Shutdown,
    label: &str,
) {
    while !shutdown.is_requested() {
        if diagnostic.load(Ordering::Relaxed) {
            if !wait_edge(&mut source, &shutdown) {
                break;
            }
            let mut block = [0u8; DIAGNOSTIC_BLOCK_LEN];
            match source.read_block(&mut block) {
                Ok(()) => info!("{label} data dump: {}", hex_dump(&block)),
                Err(e) => warn!("{label} dump read failed: {e}"),
            }
            continue;
        }

        match reader.next_frame(&mut source, &shutdown) {
            Ok(Some(frame)) => dispatcher.dispatch(frame),
            Ok(None) => break,
            Err(e) => warn!("{label} receive: {e}"),
        }
    }
}

/// Space-separated uppercase hex.
pub(crate) fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes
        .iter()
        .enumerate()
    {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{host::mock::ScriptedBlocks, protocol::frame::encode},
    };

    fn wake_response() -> Vec<u8> {
        encode(0x00, &[0x02]).unwrap()
    }

    #[test]
    fn test_stream_split_across_reads() {
        let bytes = encode(0x01, &[0x00]).unwrap();
        let mut reassembler = StreamReassembler::new();

        assert!(reassembler.feed(&bytes[..3]).is_empty());
        assert_eq!(reassembler.state(), ReassemblyState::AwaitingHeader);
        assert!(reassembler.feed(&bytes[3..6]).is_empty());
        assert!(matches!(reassembler.state(), ReassemblyState::AwaitingData(_)));

        let frames = reassembler.feed(&bytes[6..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().opcode(), 0x01);
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn test_stream_back_to_back_frames_in_one_read() {
        let mut bytes = encode(0x01, &[0x00]).unwrap();
        bytes.extend(encode(0x02, &[]).unwrap());
        bytes.extend(encode(0xFF, &[0x01, 0x03]).unwrap());
        let tail = encode(0x03, &[0x00]).unwrap();
        bytes.extend_from_slice(&tail[..2]);

        let mut reassembler = StreamReassembler::new();
        let frames: Vec<_> = reassembler
            .feed(&bytes)
            .into_iter()
            .map(|f| f.unwrap().opcode())
            .collect();
        assert_eq!(frames, vec![0x01, 0x02, 0xFF]);
        assert_eq!(reassembler.buffered(), 2);

        let frames = reassembler.feed(&tail[2..]);
        assert_eq!(frames[0].as_ref().unwrap().opcode(), 0x03);
    }

    #[test]
    fn test_stream_bad_header_resets() {
        let mut reassembler = StreamReassembler::new();
        let results = reassembler.feed(&[0x00, 0x01, 0x00, 0x00, 0x01, 0x02]);
        assert_eq!(results, vec![Err(FrameError::BadSync(0x00))]);
        assert_eq!(reassembler.buffered(), 0);

        let frames = reassembler.feed(&wake_response());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_ok());
    }

    #[test]
    fn test_stream_bad_data_checksum_discards_frame() {
        let mut bytes = wake_response();
        bytes[6] ^= 0xFF;
        let mut reassembler = StreamReassembler::new();
        let results = reassembler.feed(&bytes);
        assert!(matches!(results[0], Err(FrameError::DataChecksum { .. })));
        assert_eq!(reassembler.state(), ReassemblyState::AwaitingHeader);
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn test_stream_rejects_oversized_header() {
        let mut header = vec![0x7F, 0xFF, 0x0F, 0x01];
        header.push(frame::checksum(&header));
        let mut reassembler = StreamReassembler::new();
        assert_eq!(
            reassembler.feed(&header),
            vec![Err(FrameError::OperandTooLong(0x0FFF))]
        );
    }

    #[test]
    fn test_stream_largest_frame_fits() {
        let operand = vec![0x11; MAX_OPERAND_LEN];
        let bytes = encode(0x01, &operand).unwrap();
        let mut reassembler = StreamReassembler::new();
        let frames = reassembler.feed(&bytes);
        assert_eq!(frames[0].as_ref().unwrap().operand().len(), MAX_OPERAND_LEN);
    }

    #[test]
    fn test_retry_policy_gives_up() {
        let policy = RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let mut calls = 0;
        let result: io::Result<()> = policy.run("test", || {
            calls += 1;
            Err(io::Error::other("nope"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_policy_recovers() {
        let mut calls = 0;
        let result = RetryPolicy::default().run("test", || {
            calls += 1;
            if calls < 3 { Err(io::Error::other("short read")) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_block_reader_separate_header_edge() {
        let operand = vec![0x5A; 1100];
        let bytes = encode(0x83, &operand).unwrap();
        let mut source = ScriptedBlocks::new(&bytes, 8);
        let reader = BlockReader::new(
            BlockLayout {
                block_len: 512,
                header_in_first_block: false,
            },
            RetryPolicy::default(),
        );

        let frame = reader
            .next_frame(&mut source, &Shutdown::default())
            .unwrap()
            .unwrap();
        assert_eq!(frame.operand(), operand.as_slice());
        // Header edge plus three body blocks (512, 512, 77).
        assert_eq!(source.edges_used(), 4);
        assert_eq!(source.reads(), vec![5, 512, 512, 77]);
    }

    #[test]
    fn test_block_reader_header_shares_first_block() {
        let operand = vec![0xA5; 1500];
        let bytes = encode(0x01, &operand).unwrap();
        let mut source = ScriptedBlocks::new(&bytes, 8);
        let reader = BlockReader::new(
            BlockLayout {
                block_len: 1024,
                header_in_first_block: true,
            },
            RetryPolicy::default(),
        );

        let frame = reader
            .next_frame(&mut source, &Shutdown::default())
            .unwrap()
            .unwrap();
        assert_eq!(frame.operand().len(), 1500);
        assert_eq!(source.edges_used(), 2);
        assert_eq!(source.reads(), vec![5, 1019, 482]);
    }

    #[test]
    fn test_block_reader_retries_failed_reads_without_losing_data() {
        let bytes = encode(0x01, &[0x00]).unwrap();
        let mut source = ScriptedBlocks::new(&bytes, 4).fail_next_reads(2);
        let reader = BlockReader::new(
            BlockLayout {
                block_len: 512,
                header_in_first_block: false,
            },
            RetryPolicy {
                attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
        );
        let frame = reader
            .next_frame(&mut source, &Shutdown::default())
            .unwrap()
            .unwrap();
        assert_eq!(frame.status(), Some(0));
    }

    #[test]
    fn test_block_reader_bad_header() {
        let mut bytes = wake_response();
        bytes[4] = 0;
        let mut source = ScriptedBlocks::new(&bytes, 4);
        let reader = BlockReader::new(
            BlockLayout {
                block_len: 512,
                header_in_first_block: false,
            },
            RetryPolicy::default(),
        );
        let err = reader
            .next_frame(&mut source, &Shutdown::default())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Frame(FrameError::HeaderChecksum { .. })
        ));
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x7F, 0x01, 0xAB]), "7F 01 AB");
        assert_eq!(hex_dump(&[]), "");
    }
}
