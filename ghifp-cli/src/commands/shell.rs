//! Interactive shell keeping one driver session across commands.

use {
    super::{USAGE_FAILURE, driver::DriverCommand, print_return_code, report},
    anyhow::Result,
    clap::{Parser, Subcommand, error::ErrorKind},
    ghifp::Gacrux,
    log::debug,
    std::io::{self, BufRead, IsTerminal, Write},
};

/// One line typed into the shell.
#[derive(Debug, Parser)]
#[command(name = "ghifp", no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Debug, Subcommand)]
enum ShellCommand {
    #[command(flatten)]
    Driver(DriverCommand),

    /// Leave the shell, stopping the session.
    #[command(alias = "quit")]
    Exit,
}

enum Step {
    Continue,
    Exit,
}

fn execute(gacrux: &mut Gacrux, line: &str, quiet: bool) -> Step {
    let words: Vec<&str> = line
        .split_whitespace()
        .collect();
    if words.is_empty() || words[0].starts_with('#') {
        return Step::Continue;
    }

    match ShellLine::try_parse_from(words) {
        Ok(ShellLine {
            command: ShellCommand::Exit,
        }) => Step::Exit,
        Ok(ShellLine {
            command: ShellCommand::Driver(command),
        }) => {
            report(&super::driver::run(gacrux, &command, quiet));
            Step::Continue
        },
        Err(e) => {
            // Help output goes to stdout, usage errors to stderr.
            let _ = e.print();
            if !matches!(
                e.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) {
                print_return_code(USAGE_FAILURE);
            }
            Step::Continue
        },
    }
}

/// Read commands from stdin until `exit` or end of input.
pub(crate) fn cmd_shell(gacrux: &mut Gacrux, quiet: bool) -> Result<()> {
    let stdin = io::stdin();
    let interactive = stdin.is_terminal();
    let mut lines = stdin.lock();
    let mut line = String::new();

    loop {
        if interactive {
            eprint!("ghifp> ");
            io::stderr().flush()?;
        }

        line.clear();
        if lines.read_line(&mut line)? == 0 {
            break;
        }
        if let Step::Exit = execute(gacrux, &line, quiet) {
            break;
        }
        io::stdout().flush()?;
    }

    if gacrux.is_initialized() {
        debug!("Stopping the session on shell exit");
        gacrux.deinit()?;
    }
    Ok(())
}
