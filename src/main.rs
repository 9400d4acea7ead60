//! task-manager - HTTP server entry point.

use std::process::ExitCode;

fn main() -> ExitCode {
    task_manager::cli::run(std::env::args_os())
}
