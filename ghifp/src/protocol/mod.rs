//! GHIFP protocol: wire frame and command catalog.

pub mod catalog;
pub mod frame;

pub use {
    catalog::{CatalogPolicy, CommandSpec, FrameCheckError, Opcode, StatusRequest, command_spec},
    frame::{Frame, HEADER_LEN, Header, MAX_OPERAND_LEN, SYNC},
};
