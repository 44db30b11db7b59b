//! BitBox client CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use bitbox::client::cli::{run, Cli};

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	match run(cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("bitbox: {}", e);
			ExitCode::FAILURE
		}
	}
}

// vim: ts=4
