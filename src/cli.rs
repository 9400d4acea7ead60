//! Command-line entrypoint.
//!
//! Flags are collected from the module tree before parsing, so the command
//! is built at runtime rather than derived.

use std::ffi::OsString;
use std::process::ExitCode;

use clap::{ArgMatches, Command};
use tracing::{error, info};

use crate::app;
use crate::container::{Container, ContainerError};
use crate::logger::{LogConfig, Logger};

pub const INSPECT: &str = "inspect";
pub const DOT_GRAPH: &str = "dot-graph";

fn command() -> Command {
    Command::new(app::APP_ID)
        .about("In-memory task management HTTP service")
        .version(env!("CARGO_PKG_VERSION"))
}

/// Errors raised before the logger exists go to stderr.
fn early_failure(err: &ContainerError) -> u8 {
    eprintln!("error: {err}");
    err.exit_code()
}

/// Parse `args`, then run the service or one of the introspection commands.
pub fn run<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    ExitCode::from(execute(args))
}

fn execute<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut container = match Container::compose(app::module()) {
        Ok(container) => container,
        Err(err) => return early_failure(&err),
    };
    let cmd = match container.register_flags(command()) {
        Ok(cmd) => cmd.subcommands(container.command()),
        Err(err) => return early_failure(&err),
    };

    let matches = match cmd.try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) => {
            let _ = err.print();
            return err.exit_code().clamp(0, 255) as u8;
        }
    };

    // Global flags given after a subcommand only show up in its matches.
    let (subcommand, flags): (Option<&str>, &ArgMatches) = match matches.subcommand() {
        Some((name, sub)) => (Some(name), sub),
        None => (None, &matches),
    };
    if let Err(err) = container.apply_flags(flags) {
        return early_failure(&err);
    }

    let log_config = container.config::<LogConfig>().cloned().unwrap_or_default();
    let logger = Logger::init(&log_config);

    match subcommand {
        Some(INSPECT) => match container.inspect(&logger) {
            Ok(text) => {
                print!("{text}");
                0
            }
            Err(err) => failure(&err),
        },
        Some(DOT_GRAPH) => {
            println!("{}", container.dot_graph());
            0
        }
        Some(other) => {
            eprintln!("error: unknown command {other}");
            2
        }
        None => serve(container, logger),
    }
}

fn serve(mut container: Container, logger: Logger) -> u8 {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to build the async runtime");
            return 1;
        }
    };

    match runtime.block_on(container.run(logger)) {
        Ok(()) => {
            info!("shutdown complete");
            0
        }
        Err(err) => failure(&err),
    }
}

fn failure(err: &ContainerError) -> u8 {
    error!(error = %err, kind = ?err.kind(), "application failed");
    err.exit_code()
}
