//! Entry point for the `wayfold` command-line interface.
#![forbid(unsafe_code)]

use std::process::ExitCode;

use wayfold_cli::CliError;

#[expect(
    clippy::print_stderr,
    reason = "the binary reports fatal errors on stderr"
)]
fn main() -> ExitCode {
    match wayfold_cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            eprintln!("wayfold: {err}");
            ExitCode::FAILURE
        }
    }
}
