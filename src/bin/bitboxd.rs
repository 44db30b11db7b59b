//! BitBox daemon entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use bitbox::logging;
use bitbox::server::Server;

#[derive(Parser, Debug)]
#[command(name = "bitboxd", about = "BitBox peer-to-peer file synchronization daemon")]
struct Args {
	/// Path to the TOML configuration file
	#[arg(short = 'c', long = "config", default_value = "bitbox.toml")]
	config: PathBuf,

	/// Directory to watch and synchronize
	#[arg(short = 'd', long = "dir", default_value = ".")]
	dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
	logging::init_tracing();
	let args = Args::parse();

	let server = match Server::new(args.config, args.dir).await {
		Ok(server) => server,
		Err(e) => {
			eprintln!("bitboxd: failed to start: {}", e);
			return ExitCode::FAILURE;
		}
	};

	match server.run().await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("bitboxd: {}", e);
			ExitCode::FAILURE
		}
	}
}

// vim: ts=4
