//! Platform capabilities the transports are built on.
//!
//! The driver never talks to hardware directly. Each transport consumes one
//! of these capabilities:
//!
//! ```text
//! +------------------+  +---------------------+  +-------------------+
//! | SerialTransport  |  | AddressedTransport  |  | ClockedTransport  |
//! +--------+---------+  +----------+----------+  +---------+---------+
//!          |                       |                       |
//!          v                       v                       v
//! +--------+---------+  +----------+----------+  +---------+---------+
//! |    Port trait    |  |   AddressedBus +    |  |   ClockedBus +    |
//! |   (serialport)   |  |   BusRequestLine    |  |   BusRequestLine  |
//! +------------------+  +---------------------+  +-------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use {ghifp::{port::Port, protocol::frame}, std::io::Read};
//!
//! fn example<P: Port>(port: &mut P) -> ghifp::Result<()> {
//!     port.send(&frame::encode(0x02, &[])?)?;
//!
//!     let mut buf = [0u8; 32];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:02X?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

pub mod bus;

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// How to open the serial line to a Gacrux peripheral.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Initial baud rate. The peripheral boots at 115200.
    pub baud_rate: u32,
    /// Write timeout of the sending handle.
    pub timeout: Duration,
    /// Flow control.
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_secs(1),
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Line settings for `port_name` at `baud_rate`, 8N1 without flow control.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the write timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the flow control mode.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
}

impl From<bool> for FlowControl {
    fn from(hardware: bool) -> Self {
        if hardware { Self::Hardware } else { Self::None }
    }
}

/// A serial port found on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID, for USB adapters.
    pub vid: Option<u16>,
    /// USB product ID, for USB adapters.
    pub pid: Option<u16>,
    /// USB product string, if the adapter reports one.
    pub product: Option<String>,
}

/// Byte-stream line used by the serial transport.
///
/// The transport writes requests through one handle and hands a second one,
/// made by [`Port::receiver`], to its receive thread. Both handles share the
/// line: a baud rate change through the writer applies to the receiver too.
pub trait Port: Read + Write + Send {
    /// Port name/path, for logging.
    fn name(&self) -> &str;

    /// Current baud rate.
    fn baud_rate(&self) -> u32;

    /// Switch the line to `baud_rate`.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Second handle for the receive thread. Its reads give up after `poll`
    /// so the thread can notice shutdown.
    fn receiver(&self, poll: Duration) -> Result<Self>
    where
        Self: Sized;

    /// Write all of `bytes` and flush.
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        self.flush()?;
        Ok(())
    }
}

/// Lists serial ports present on the host.
pub trait PortEnumerator {
    /// Every port the platform reports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

pub use bus::{AddressedBus, BusRequestLine, ClockedBus};
