//! Command implementations.
//!
//! Each group of subcommands is implemented in its own module.

pub(crate) mod driver;
pub(crate) mod ports;
pub(crate) mod shell;

use {
    anyhow::Result,
    indicatif::{ProgressBar, ProgressStyle},
    log::error,
};

/// Return code when a failure carries no driver error.
const UNKNOWN_FAILURE: i32 = -1;

/// Return code printed for malformed command lines.
pub(crate) const USAGE_FAILURE: i32 = -22;

/// Map a command result to the code printed after it.
pub(crate) fn return_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e
            .chain()
            .find_map(|cause| cause.downcast_ref::<ghifp::Error>())
            .map_or(UNKNOWN_FAILURE, ghifp::Error::code),
    }
}

/// Print the result line for a finished command.
pub(crate) fn print_return_code(code: i32) {
    println!("ghifp command ret={code}");
}

/// Log a failure, print the result line and return the code.
pub(crate) fn report(result: &Result<()>) -> i32 {
    if let Err(e) = result {
        error!("{e:#}");
    }
    let code = return_code(result);
    print_return_code(code);
    code
}

/// Byte-based transfer progress bar on stderr.
pub(crate) fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !crate::use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}
