//! Host interface: the transports that carry GHIFP frames and the receive
//! machinery shared by all of them.
//!
//! Every transport implements [`HostInterface`]. Writes go straight to the
//! line; responses come back through a background receive thread that
//! reassembles frames and routes them either to the event channel or, when a
//! request is outstanding, to the [`ResponseExchange`].
//!
//! ```text
//!  caller ──write──▶ transport ──▶ peripheral
//!    ▲                                │
//!    │ pop                            ▼
//! ResponseExchange ◀──response── receive thread ──event──▶ event channel
//! ```

pub mod addressed;
pub mod clocked;
pub mod dispatch;
pub mod exchange;
pub mod reassembly;
pub mod serial;

#[cfg(test)]
pub(crate) mod mock;

use {
    crate::{
        error::{Error, Result},
        protocol::{Frame, frame},
    },
    crossbeam::channel::Sender,
    std::{
        fmt,
        sync::{
            Arc,
            atomic::{AtomicU8, Ordering},
        },
        time::Duration,
    },
};

pub use {
    addressed::AddressedTransport,
    clocked::ClockedTransport,
    dispatch::EventFilter,
    exchange::ResponseExchange,
    reassembly::RetryPolicy,
    serial::SerialTransport,
};

/// Which physical link a transport drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// Byte-stream serial link.
    Serial,
    /// Bus-addressed synchronous link.
    Addressed,
    /// Clocked shift-register link.
    Clocked,
}

impl TransportKind {
    /// All kinds in selection-index order.
    pub const ALL: [Self; 3] = [Self::Serial, Self::Addressed, Self::Clocked];

    /// Map a selection index (0 serial, 1 bus-addressed, 2 clocked).
    pub fn from_index(index: u8) -> Result<Self> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| Error::InvalidOperand(format!("no transport with index {index}")))
    }

    /// Selection index of this kind.
    pub fn index(self) -> usize {
        match self {
            Self::Serial => 0,
            Self::Addressed => 1,
            Self::Clocked => 2,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Serial => "serial",
            Self::Addressed => "bus-addressed",
            Self::Clocked => "clocked",
        })
    }
}

/// Runtime parameter change for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigRequest {
    /// Target address on the bus-addressed link.
    TargetAddress(u16),
    /// Word size in bits on the clocked link (legacy form: 16 and up means
    /// 16-bit, anything else 8-bit).
    WordSize(u8),
    /// Dump raw received bytes instead of reassembling frames.
    DiagnosticReceive(bool),
    /// Line parameter index, as carried by the matching configure command.
    LineParameters(u8),
    /// Clock speed index on the clocked link.
    ClockSpeed(u8),
}

/// Whether the host is waiting for a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostIfState {
    /// No request outstanding; stray frames are dropped.
    Idle = 0,
    /// A request was written and its response is expected.
    WaitingForResponse = 1,
}

/// Shared, atomically observed [`HostIfState`].
#[derive(Debug, Clone)]
pub struct HostState(Arc<AtomicU8>);

impl Default for HostState {
    fn default() -> Self {
        Self(Arc::new(AtomicU8::new(HostIfState::Idle as u8)))
    }
}

impl HostState {
    /// Current state.
    pub fn get(&self) -> HostIfState {
        if self
            .0
            .load(Ordering::Acquire)
            == HostIfState::WaitingForResponse as u8
        {
            HostIfState::WaitingForResponse
        } else {
            HostIfState::Idle
        }
    }

    /// Replace the state.
    pub fn set(&self, state: HostIfState) {
        self.0
            .store(state as u8, Ordering::Release);
    }
}

/// A link to the peripheral that carries GHIFP frames.
///
/// Requests and responses strictly alternate: `write` arms the response slot,
/// `read` consumes it. `&mut self` keeps one caller per transport.
pub trait HostInterface: Send {
    /// Which link this is.
    fn kind(&self) -> TransportKind;

    /// Write one complete, valid frame and expect a response to it.
    ///
    /// Returns the number of bytes written.
    fn write(&mut self, frame: &[u8]) -> Result<usize>;

    /// Wait for the response to the last `write`.
    ///
    /// The host state is back at [`HostIfState::Idle`] when this returns,
    /// whatever the outcome.
    fn read(&mut self) -> Result<Frame>;

    /// Write a request and wait for its response.
    fn transaction(&mut self, frame: &[u8]) -> Result<Frame> {
        self.write(frame)?;
        self.read()
    }

    /// Write arbitrary bytes without validation or response tracking.
    fn diagnostic_write(&mut self, raw: &[u8]) -> Result<usize>;

    /// Change a runtime parameter of the link.
    fn configure(&mut self, request: ConfigRequest) -> Result<()>;

    /// Stop waiting for the response to the last `write`.
    fn abandon_response(&mut self);
}

impl fmt::Debug for dyn HostInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostInterface({})", self.kind())
    }
}

/// Everything a transport shares with the rest of the driver.
#[derive(Debug, Clone)]
pub struct LinkContext {
    state: HostState,
    exchange: ResponseExchange,
    events: Sender<Frame>,
    filter: EventFilter,
    response_timeout: Duration,
    retry: RetryPolicy,
}

impl LinkContext {
    /// Bundle the shared pieces handed to each transport.
    pub fn new(
        state: HostState,
        exchange: ResponseExchange,
        events: Sender<Frame>,
        filter: EventFilter,
    ) -> Self {
        Self {
            state,
            exchange,
            events,
            filter,
            response_timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }

    /// How long `read` waits for a response.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Retry policy for block reads.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Shared host state.
    pub fn state(&self) -> &HostState {
        &self.state
    }

    /// Retry policy for block reads.
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub(crate) fn dispatcher(&self) -> dispatch::Dispatcher {
        dispatch::Dispatcher::new(
            self.state
                .clone(),
            self.exchange
                .clone(),
            self.events
                .clone(),
            self.filter,
        )
    }

    pub(crate) fn link(&self) -> Link {
        Link {
            state: self
                .state
                .clone(),
            exchange: self
                .exchange
                .clone(),
            timeout: self.response_timeout,
        }
    }
}

/// Request-side half of the response handshake.
#[derive(Debug)]
pub(crate) struct Link {
    state: HostState,
    exchange: ResponseExchange,
    timeout: Duration,
}

impl Link {
    /// Arm the response slot ahead of a request write.
    ///
    /// The state flips before the bytes leave so a fast response cannot be
    /// dropped as stray.
    pub(crate) fn begin_request(&self) {
        let stale = self
            .exchange
            .clear();
        if stale > 0 {
            log::debug!("Dropped {stale} stale response(s)");
        }
        self.state
            .set(HostIfState::WaitingForResponse);
    }

    pub(crate) fn await_response(&self) -> Result<Frame> {
        let result = self
            .exchange
            .pop(self.timeout);
        self.state
            .set(HostIfState::Idle);
        result
    }

    pub(crate) fn abandon(&self) {
        self.state
            .set(HostIfState::Idle);
        self.exchange
            .clear();
    }
}

/// Check that `bytes` is exactly one valid frame before it is written.
pub(crate) fn check_request(bytes: &[u8]) -> Result<frame::Header> {
    let header = frame::validate(bytes)?;
    if header.wire_len() != bytes.len() {
        return Err(Error::InvalidOperand(format!(
            "request is {} bytes but its header describes {}",
            bytes.len(),
            header.wire_len()
        )));
    }
    Ok(header)
}
