//! ghifp CLI - Command-line front end for the Gacrux host driver.
//!
//! ## Features
//!
//! - Firmware transfer with progress reporting
//! - Line configuration, raw commands and diagnostics
//! - Malformed firmware transfers for peripheral testing
//! - Interactive shell keeping one driver session alive
//! - Environment variable and config file support

use {
    anyhow::{Context, Result},
    clap::{Parser, Subcommand},
    env_logger::Env,
    ghifp::{Gacrux, SerialConfig},
    log::{debug, warn},
    std::{env, path::PathBuf, process::ExitCode},
};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;

use {commands::driver::DriverCommand, config::Config};

/// Baud rate used when neither the command line nor a config file sets one.
const DEFAULT_BAUD: u32 = 115200;

/// ghifp - Host driver for the Gacrux peripheral.
///
/// Every driver command ends with a `ghifp command ret=<code>` line on
/// stdout: 0 on success, a negative errno-style code otherwise.
///
/// Environment variables:
///   GHIFP_PORT  - Default serial port
///   GHIFP_BAUD  - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "ghifp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "GHIFP_PORT")]
    port: Option<String>,

    /// Baud rate of the serial line.
    #[arg(short, long, global = true, env = "GHIFP_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Driver(DriverCommand),

    /// Read driver commands from stdin, keeping one session alive.
    Shell,

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
}

/// Driver with the serial transport registered when a port is known.
fn build_driver(cli: &Cli, config: &Config) -> Gacrux {
    let gacrux = Gacrux::new(config.driver_config());

    let Some(port) = cli
        .port
        .clone()
        .or_else(|| {
            config
                .connection
                .serial
                .clone()
        })
    else {
        warn!("No serial port given, use --port or GHIFP_PORT");
        return gacrux;
    };

    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);
    debug!("Serial port {port} at {baud} baud");

    let mut serial = SerialConfig::new(port, baud).with_flow_control(config.flow_control());
    if let Some(timeout) = config.read_timeout() {
        serial = serial.with_timeout(timeout);
    }
    gacrux.with_serial_port(serial)
}

/// Run a single command in a session of its own.
fn one_shot(gacrux: &mut Gacrux, command: &DriverCommand, quiet: bool) -> Result<()> {
    if command.needs_session() {
        gacrux
            .init()
            .context("failed to start the driver")?;
    }
    commands::driver::run(gacrux, command, quiet)
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "ghifp v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let result = match &cli.command {
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Shell => {
            let mut gacrux = build_driver(&cli, &config);
            commands::shell::cmd_shell(&mut gacrux, cli.quiet)
        },
        Commands::Driver(command) => {
            let mut gacrux = build_driver(&cli, &config);
            let result = one_shot(&mut gacrux, command, cli.quiet);
            if commands::report(&result) == 0 {
                return ExitCode::SUCCESS;
            }
            return ExitCode::FAILURE;
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        },
    }
}
