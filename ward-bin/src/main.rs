use clap::Parser;
use std::process::ExitCode;
use ward_cli::Cli;

/// sysexits EX_TEMPFAIL: the same command may succeed later.
const EXIT_TEMPFAIL: u8 = 75;

#[tokio::main]
async fn main() -> ExitCode {
    match Cli::parse().run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {e}");
            if e.is_retryable() {
                ExitCode::from(EXIT_TEMPFAIL)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
