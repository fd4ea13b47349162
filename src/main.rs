//! resident - hot reload runner for Flutter applications
//!
//! This is the binary entry point. All logic lives in the library.

use std::process::ExitCode;

use clap::Parser;
use flutter_resident::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match flutter_resident::run(cli).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
