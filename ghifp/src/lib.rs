//! # ghifp
//!
//! Host driver for the GHIFP protocol used to control and update Gacrux
//! peripherals.
//!
//! This crate provides:
//!
//! - The checksummed GHIFP frame codec and the opcode catalog
//! - Serial, bus-addressed and clocked transports with background frame
//!   reassembly
//! - Firmware segmentation, including malformed transfers for testing the
//!   peripheral
//! - Peripheral status tracking driven by unsolicited events
//!
//! ## Transports
//!
//! - **Serial** (`native` feature): any port the `serialport` crate can open
//! - **Bus-addressed** and **clocked**: bring a driver implementing
//!   [`port::AddressedBus`] or [`port::ClockedBus`] plus a
//!   [`port::BusRequestLine`] raised from its flow-control interrupt
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for configuration enums
//!
//! ## Example
//!
//! ```rust,no_run
//! use ghifp::{DriverConfig, Gacrux, StatusRequest};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let port = ghifp::SerialConfig::new("/dev/ttyUSB0", 115200);
//!         let mut gacrux = Gacrux::new(DriverConfig::default()).with_serial_port(port);
//!         gacrux.init()?;
//!
//!         gacrux.transmit_firmware("firmware.bin".as_ref(), |sent, total| {
//!             println!("{sent}/{total}");
//!         })?;
//!         gacrux.execute_firmware()?;
//!         gacrux.change_status(StatusRequest::Suspend)?;
//!
//!         gacrux.deinit()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod driver;
pub mod error;
pub mod events;
pub mod firmware;
pub mod host;
pub mod port;
pub mod protocol;
pub mod system;

pub(crate) mod worker;

pub use {
    driver::{ConfigPolicy, DriverConfig, Gacrux, TransportFactory, parse_hex},
    error::{Error, FrameError, ProtocolError, Result},
    events::Event,
    firmware::{
        TransferReport,
        fuzz::{SequenceMode, TotalCountMode},
    },
    host::{ConfigRequest, HostInterface, LinkContext, RetryPolicy, TransportKind},
    port::{BusRequestLine, FlowControl, Port, SerialConfig},
    protocol::{CatalogPolicy, CommandSpec, Frame, Opcode, StatusRequest},
    system::SystemStatus,
};

#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
