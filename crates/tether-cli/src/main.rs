mod bootstrap_helpers;
mod cli_args;
mod commands;
mod runtime;

use std::process::ExitCode;

use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::runtime::run_cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
