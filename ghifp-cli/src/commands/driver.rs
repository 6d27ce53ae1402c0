//! Driver subcommands, shared by one-shot and shell mode.

use {
    super::progress_bar,
    anyhow::{Context, Result},
    clap::Subcommand,
    console::style,
    ghifp::{
        ConfigRequest, Gacrux, SequenceMode, StatusRequest, TotalCountMode, TransferReport,
        TransportKind,
    },
    log::{info, warn},
    std::path::PathBuf,
};

/// Commands that act on the Gacrux driver.
#[derive(Debug, Subcommand)]
pub(crate) enum DriverCommand {
    /// Start a driver session (shell mode; one-shot commands start one themselves).
    Init,

    /// Stop the driver session.
    Deinit,

    /// Ask the peripheral to change system status.
    ChangeStatus {
        /// 0 restart into ROM, 1 restart, 2 wake up, 3 deep sleep.
        #[arg(value_parser = parse_u8)]
        status: u8,
    },

    /// Transfer a firmware image.
    TransmitFw {
        /// Path to the firmware file.
        firmware: PathBuf,
    },

    /// Start the transferred firmware.
    ExecuteFw,

    /// Change the serial line parameters (serial transport only).
    ConfigureSerial {
        /// Rate index (6 = 115200, 9 = 921600).
        #[arg(value_parser = parse_u8)]
        rate: u8,
        /// Flow control: 0 off, 1 RTS/CTS.
        #[arg(value_parser = parse_u8)]
        flow_control: u8,
    },

    /// Change the bus speed (bus-addressed transport only).
    ConfigureBus {
        /// Speed index: 0 = 100 kHz, 1 = 400 kHz.
        #[arg(value_parser = parse_u8)]
        speed: u8,
    },

    /// Change the word size (clocked transport only).
    ConfigureClocked {
        /// Word size index: 0 = 8-bit, 1 = 16-bit.
        #[arg(value_parser = parse_u8)]
        word_size: u8,
    },

    /// Send an arbitrary command and print its response.
    RawWrite {
        /// Opcode.
        #[arg(value_parser = parse_u8)]
        opcode: u8,
        /// Operand bytes.
        #[arg(value_parser = parse_u8)]
        operands: Vec<u8>,
    },

    /// Send raw bytes given as hex digits, bypassing framing.
    DiagnosticSend {
        /// Number of bytes the hex string encodes.
        length: usize,
        /// Hex digits; an odd trailing digit is padded with F.
        hex: String,
    },

    /// Send a file's raw bytes, bypassing framing.
    DiagnosticFileSend {
        /// File to send.
        path: PathBuf,
    },

    /// Dump received bytes instead of decoding frames.
    DiagnosticReceive {
        /// on/off (or 1/0).
        #[arg(value_parser = parse_switch, action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Choose the transport for subsequent commands.
    SelectTransport {
        /// 0 serial, 1 bus-addressed, 2 clocked.
        #[arg(value_parser = parse_u8)]
        index: u8,
    },

    /// Change the firmware packet size.
    SetPacketSize {
        /// Image bytes per packet.
        size: usize,
    },

    /// Change the bus-addressed target address.
    SetTargetAddress {
        /// Address in hex (e.g., 0x24).
        #[arg(value_parser = parse_hex_u16)]
        address: u16,
    },

    /// Change the clocked word size in bits (deprecated, use configure-clocked).
    SetWordSize {
        /// 16 or more selects 16-bit words, anything else 8-bit.
        #[arg(value_parser = parse_u8)]
        bits: u8,
    },

    /// Change the clocked bus clock.
    SetClockSpeed {
        /// Clock index 0..=6 (1.3 MHz to 13 MHz).
        #[arg(value_parser = parse_u8)]
        index: u8,
    },

    /// Transfer a synthetic image with tampered packet fields.
    DebugTransmitFw {
        /// Image size in bytes.
        virtual_size: usize,
        /// Image bytes per packet.
        packet_size: usize,
        /// Total-count mode: 0 normal, 1 zero, 2 invalid, 3 shift plus, 4 shift minus.
        #[arg(value_parser = parse_u8)]
        total_mode: u8,
        /// Sequence mode: 0 normal, 1 from zero, 2 no increment, 3 over increment, 4 over total.
        #[arg(value_parser = parse_u8)]
        sequence_mode: u8,
    },

    /// Stream a data file to one of the peripheral inputs.
    BinaryInput {
        /// Input selector.
        #[arg(value_parser = parse_u8)]
        input: u8,
        /// Data file.
        path: PathBuf,
    },

    /// Show the last reported peripheral status.
    Status,
}

impl DriverCommand {
    /// Whether one-shot mode must start a session before running this.
    pub(crate) fn needs_session(&self) -> bool {
        !matches!(
            self,
            Self::Init | Self::Deinit | Self::SetPacketSize { .. } | Self::Status
        )
    }
}

/// Run one driver command.
pub(crate) fn run(gacrux: &mut Gacrux, command: &DriverCommand, quiet: bool) -> Result<()> {
    match command {
        DriverCommand::Init => gacrux
            .init()
            .context("init failed")?,
        DriverCommand::Deinit => gacrux
            .deinit()
            .context("deinit failed")?,
        DriverCommand::ChangeStatus { status } => {
            let request = StatusRequest::try_from(*status)?;
            let status = gacrux
                .change_status(request)
                .context("change-status failed")?;
            if !quiet {
                eprintln!("{} System status: {status}", style("✓").green());
            }
        },
        DriverCommand::TransmitFw { firmware } => {
            let pb = progress_bar(quiet);
            pb.set_message(
                firmware
                    .display()
                    .to_string(),
            );
            let report = gacrux
                .transmit_firmware(firmware, |sent, total| {
                    pb.set_length(total as u64);
                    pb.set_position(sent as u64);
                })
                .with_context(|| format!("failed to transmit {}", firmware.display()));
            pb.finish_and_clear();
            print_report(&report?, quiet);
        },
        DriverCommand::ExecuteFw => gacrux
            .execute_firmware()
            .context("execute-fw failed")?,
        DriverCommand::ConfigureSerial { rate, flow_control } => gacrux
            .configure_serial(*rate, *flow_control)
            .context("configure-serial failed")?,
        DriverCommand::ConfigureBus { speed } => gacrux
            .configure_bus(*speed)
            .context("configure-bus failed")?,
        DriverCommand::ConfigureClocked { word_size } => gacrux
            .configure_clocked(*word_size)
            .context("configure-clocked failed")?,
        DriverCommand::RawWrite { opcode, operands } => {
            let response = gacrux
                .raw_write(*opcode, operands)
                .with_context(|| format!("raw-write of opcode {opcode:#04x} failed"))?;
            println!(
                "response opcode={:#04x} operand=[{}]",
                response.opcode(),
                hex_bytes(response.operand())
            );
        },
        DriverCommand::DiagnosticSend { length, hex } => {
            let sent = gacrux
                .diagnostic_send(*length, hex)
                .context("diagnostic-send failed")?;
            info!("Sent {sent} raw bytes");
        },
        DriverCommand::DiagnosticFileSend { path } => {
            let sent = gacrux
                .diagnostic_file_send(path)
                .with_context(|| format!("failed to send {}", path.display()))?;
            info!("Sent {sent} raw bytes from {}", path.display());
        },
        DriverCommand::DiagnosticReceive { enabled } => gacrux
            .diagnostic_receive(*enabled)
            .context("diagnostic-receive failed")?,
        DriverCommand::SelectTransport { index } => {
            let kind = TransportKind::from_index(*index)?;
            gacrux
                .select_transport(kind)
                .context("select-transport failed")?;
        },
        DriverCommand::SetPacketSize { size } => gacrux.set_packet_size(*size)?,
        DriverCommand::SetTargetAddress { address } => gacrux
            .set_config(ConfigRequest::TargetAddress(*address))
            .context("set-target-address failed")?,
        DriverCommand::SetWordSize { bits } => {
            warn!("set-word-size is deprecated, use configure-clocked");
            gacrux
                .set_config(ConfigRequest::WordSize(*bits))
                .context("set-word-size failed")?;
        },
        DriverCommand::SetClockSpeed { index } => gacrux
            .set_config(ConfigRequest::ClockSpeed(*index))
            .context("set-clock-speed failed")?,
        DriverCommand::DebugTransmitFw {
            virtual_size,
            packet_size,
            total_mode,
            sequence_mode,
        } => {
            let total_mode = TotalCountMode::try_from(*total_mode)?;
            let sequence_mode = SequenceMode::try_from(*sequence_mode)?;
            let pb = progress_bar(quiet);
            pb.set_message(format!("{total_mode:?}/{sequence_mode:?}"));
            let report = gacrux
                .debug_transmit_firmware(
                    *virtual_size,
                    *packet_size,
                    total_mode,
                    sequence_mode,
                    |sent, total| {
                        pb.set_length(total as u64);
                        pb.set_position(sent as u64);
                    },
                )
                .context("debug-transmit-fw failed");
            pb.finish_and_clear();
            print_report(&report?, quiet);
        },
        DriverCommand::BinaryInput { input, path } => {
            let report = gacrux
                .binary_input(*input, path)
                .with_context(|| format!("binary input from {} failed", path.display()))?;
            print_report(&report, quiet);
        },
        DriverCommand::Status => println!("{}", gacrux.system_status()),
    }
    Ok(())
}

fn print_report(report: &TransferReport, quiet: bool) {
    if !quiet {
        eprintln!(
            "{} Sent {} bytes in {} packet(s)",
            style("✓").green(),
            report.bytes,
            report.packets
        );
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a byte given in decimal or with a `0x` prefix.
fn parse_u8(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = match s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid byte value '{s}': {e}"))
}

/// Parse a hexadecimal value (the `0x` prefix is optional).
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let s = s
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u16::from_str_radix(s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s
        .trim()
        .to_ascii_lowercase()
        .as_str()
    {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        other => Err(format!("Expected on or off, got '{other}'")),
    }
}
