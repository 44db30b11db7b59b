//! Client-side CLI (§6 "CLI (client)")

use std::path::PathBuf;
use std::str::FromStr;

use base64::Engine;
use clap::{Parser, ValueEnum};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::crypto;
use crate::logging::*;
use crate::types::HostPort;

/// The private key is read from a fixed file in the working directory (§6).
const PRIVATE_KEY_FILE: &str = "bitbox_id_rsa";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ClientCommand {
	ListPeers,
	ConnectPeer,
	DisconnectPeer,
}

#[derive(Parser, Debug)]
#[command(name = "bitbox", about = "BitBox client control channel CLI")]
pub struct Cli {
	/// Command to issue
	#[arg(short = 'c', long = "command")]
	pub command: ClientCommand,

	/// host:port of the node's client channel
	#[arg(short = 's', long = "server")]
	pub server: String,

	/// host:port of the peer to connect or disconnect
	#[arg(short = 'p', long = "peer")]
	pub peer: Option<String>,

	/// Identity presented in AUTH_REQUEST
	#[arg(short = 'i', long = "identity")]
	pub identity: String,
}

pub async fn run(cli: Cli) -> Result<(), String> {
	let server = HostPort::from_str(&cli.server)?;
	let peer = cli.peer.as_deref().map(HostPort::from_str).transpose()?;
	if matches!(cli.command, ClientCommand::ConnectPeer | ClientCommand::DisconnectPeer) && peer.is_none() {
		return Err("-p host:port is required for connect_peer and disconnect_peer".to_string());
	}

	let private_key = load_private_key().map_err(|e| e.to_string())?;

	let stream = TcpStream::connect(format!("{}:{}", server.host, server.port))
		.await
		.map_err(|e| format!("connecting to {}: {}", server, e))?;
	let (read_half, mut write_half) = stream.into_split();
	let mut reader = BufReader::new(read_half);

	let auth_request = json!({ "command": "AUTH_REQUEST", "identity": cli.identity });
	write_half
		.write_all(format!("{}\n", auth_request).as_bytes())
		.await
		.map_err(|e| e.to_string())?;

	let mut line = String::new();
	reader.read_line(&mut line).await.map_err(|e| e.to_string())?;
	let auth_response: serde_json::Value = serde_json::from_str(line.trim()).map_err(|e| e.to_string())?;
	if auth_response["status"].as_bool() != Some(true) {
		return Err(auth_response["message"].as_str().unwrap_or("authentication failed").to_string());
	}

	let wrapped = base64::engine::general_purpose::STANDARD
		.decode(auth_response["AES128"].as_str().unwrap_or_default())
		.map_err(|e| e.to_string())?;
	let aes_key = crypto::rsa_unwrap_key(&private_key, &wrapped).map_err(|e| e.to_string())?;

	let command_json = match cli.command {
		ClientCommand::ListPeers => json!({ "command": "LIST_PEERS_REQUEST" }),
		ClientCommand::ConnectPeer => {
			let peer = peer.unwrap();
			json!({ "command": "CONNECT_PEER_REQUEST", "host": peer.host, "port": peer.port })
		}
		ClientCommand::DisconnectPeer => {
			let peer = peer.unwrap();
			json!({ "command": "DISCONNECT_PEER_REQUEST", "host": peer.host, "port": peer.port })
		}
	};
	let ciphertext = crypto::aes_encrypt(&aes_key, &command_json.to_string()).map_err(|e| e.to_string())?;
	let envelope = json!({ "payload": base64::engine::general_purpose::STANDARD.encode(ciphertext) });
	write_half.write_all(format!("{}\n", envelope).as_bytes()).await.map_err(|e| e.to_string())?;

	let mut response_line = String::new();
	reader.read_line(&mut response_line).await.map_err(|e| e.to_string())?;
	info!("{}", response_line.trim());
	println!("{}", response_line.trim());
	Ok(())
}

fn load_private_key() -> Result<RsaPrivateKey, String> {
	let path = PathBuf::from(PRIVATE_KEY_FILE);
	let pem = std::fs::read_to_string(&path).map_err(|e| format!("reading {:?}: {}", path, e))?;
	RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| format!("parsing {:?}: {}", path, e))
}

// vim: ts=4
