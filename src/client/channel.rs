//! Authenticated client control channel, server side (§3 ClientSession, §4.H)

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::client::openssh::parse_ssh_rsa_public_key;
use crate::config::ConfigWatch;
use crate::crypto::{self, AES_KEY_LEN};
use crate::logging::*;
use crate::peer::registry::PeerRegistry;
use crate::types::HostPort;

/// `{ UNAUTH, AUTH }` (§4.H)
struct ClientSession {
	aes_key: Option<[u8; AES_KEY_LEN]>,
	authenticated: bool,
}

#[derive(Deserialize)]
struct AuthRequest {
	identity: String,
}

#[derive(Deserialize)]
struct EncryptedEnvelope {
	payload: String,
}

#[derive(Deserialize)]
#[serde(tag = "command")]
enum ClientCommand {
	#[serde(rename = "LIST_PEERS_REQUEST")]
	ListPeers,
	#[serde(rename = "CONNECT_PEER_REQUEST")]
	ConnectPeer { host: String, port: u16 },
	#[serde(rename = "DISCONNECT_PEER_REQUEST")]
	DisconnectPeer { host: String, port: u16 },
}

/// A dial request raised by `CONNECT_PEER_REQUEST`; the server root
/// owns the actual outbound connection attempt (§9 cyclic-reference note).
pub struct DialRequest {
	pub target: HostPort,
}

pub async fn handle_connection(
	stream: TcpStream,
	registry: Arc<PeerRegistry>,
	config: ConfigWatch,
	dial_tx: tokio::sync::mpsc::UnboundedSender<DialRequest>,
) {
	let (read_half, mut write_half) = stream.into_split();
	let mut reader = BufReader::new(read_half);
	let mut session = ClientSession { aes_key: None, authenticated: false };

	loop {
		let mut line = String::new();
		let n = match reader.read_line(&mut line).await {
			Ok(n) => n,
			Err(e) => {
				debug!("client channel read error: {}", e);
				return;
			}
		};
		if n == 0 {
			return;
		}
		let line = line.trim_end_matches(['\n', '\r']);
		if line.is_empty() {
			continue;
		}

		if !session.authenticated {
			let response = handle_auth(line, &mut session, &config);
			if write_half.write_all(format!("{}\n", response).as_bytes()).await.is_err() {
				return;
			}
			if !session.authenticated {
				return;
			}
			continue;
		}

		let response = handle_encrypted_command(line, &session, &registry, &dial_tx).await;
		if write_half.write_all(format!("{}\n", response).as_bytes()).await.is_err() {
			return;
		}
	}
}

fn handle_auth(line: &str, session: &mut ClientSession, config: &ConfigWatch) -> serde_json::Value {
	let request: AuthRequest = match serde_json::from_str(line) {
		Ok(r) => r,
		Err(_) => return json!({ "status": false, "message": "malformed AUTH_REQUEST" }),
	};

	let authorized = config.borrow().authorized_keys.clone();
	let Some(key_line) = authorized.iter().find(|k| k.contains(&request.identity)).cloned() else {
		return json!({ "status": false, "message": "public key not found" });
	};

	let public_key = match parse_ssh_rsa_public_key(&key_line) {
		Ok(k) => k,
		Err(e) => return json!({ "status": false, "message": e.to_string() }),
	};
	let aes_key = crypto::generate_aes_key();
	let wrapped = match crypto::rsa_wrap_key(&public_key, &aes_key) {
		Ok(w) => w,
		Err(e) => return json!({ "status": false, "message": e.to_string() }),
	};

	session.aes_key = Some(aes_key);
	session.authenticated = true;
	use base64::Engine;
	json!({
		"status": true,
		"AES128": base64::engine::general_purpose::STANDARD.encode(wrapped),
		"message": "public key found",
	})
}

async fn handle_encrypted_command(
	line: &str,
	session: &ClientSession,
	registry: &Arc<PeerRegistry>,
	dial_tx: &tokio::sync::mpsc::UnboundedSender<DialRequest>,
) -> serde_json::Value {
	let Some(aes_key) = session.aes_key else {
		return json!({ "status": false, "message": "session is not authenticated" });
	};

	let envelope: EncryptedEnvelope = match serde_json::from_str(line) {
		Ok(e) => e,
		Err(_) => return json!({ "status": false, "message": "malformed envelope" }),
	};
	use base64::Engine;
	let Ok(ciphertext) = base64::engine::general_purpose::STANDARD.decode(&envelope.payload) else {
		return json!({ "status": false, "message": "payload is not valid base64" });
	};
	let plaintext = match crypto::aes_decrypt(&aes_key, &ciphertext) {
		Ok(p) => p,
		Err(e) => return json!({ "status": false, "message": e.to_string() }),
	};
	let command: ClientCommand = match serde_json::from_str(&plaintext) {
		Ok(c) => c,
		Err(_) => return json!({ "status": false, "message": "unrecognized command" }),
	};

	match command {
		ClientCommand::ListPeers => {
			let peers = registry.active_peer_list();
			json!({ "status": true, "peers": peers })
		}
		ClientCommand::ConnectPeer { host, port } => {
			let _ = dial_tx.send(DialRequest { target: HostPort::new(host, port) });
			json!({ "status": true, "message": "dial scheduled" })
		}
		ClientCommand::DisconnectPeer { host, port } => {
			let target = HostPort::new(host, port);
			match registry.get(&target) {
				Some(peer) => {
					peer.close();
					registry.remove(&target);
					json!({ "status": true, "message": "disconnected" })
				}
				None => json!({ "status": false, "message": format!("peer not found: {}", target) }),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Config;
	use rand::rngs::OsRng;
	use rsa::traits::PublicKeyParts;
	use rsa::RsaPrivateKey;
	use tokio::sync::watch;

	fn encode_ssh_rsa(public_key: &rsa::RsaPublicKey) -> String {
		use base64::Engine;
		let mut blob = Vec::new();
		for field in [b"ssh-rsa".as_slice(), &public_key.e().to_bytes_be(), &public_key.n().to_bytes_be()] {
			blob.extend_from_slice(&(field.len() as u32).to_be_bytes());
			blob.extend_from_slice(field);
		}
		format!("ssh-rsa {} alice@example.com", base64::engine::general_purpose::STANDARD.encode(blob))
	}

	#[test]
	fn unknown_identity_is_rejected() {
		let (_tx, rx) = watch::channel(Config::default());
		let mut session = ClientSession { aes_key: None, authenticated: false };
		let response = handle_auth(r#"{"command":"AUTH_REQUEST","identity":"nobody"}"#, &mut session, &rx);
		assert_eq!(response["status"], false);
		assert!(!session.authenticated);
	}

	#[test]
	fn known_identity_authenticates_and_returns_a_wrapped_key() {
		let private_key = RsaPrivateKey::new(&mut OsRng, 512).unwrap();
		let public_key = rsa::RsaPublicKey::from(&private_key);
		let key_line = encode_ssh_rsa(&public_key);

		let mut config = Config::default();
		config.authorized_keys = vec![key_line];
		let (_tx, rx) = watch::channel(config);

		let mut session = ClientSession { aes_key: None, authenticated: false };
		let response =
			handle_auth(r#"{"command":"AUTH_REQUEST","identity":"alice@example.com"}"#, &mut session, &rx);
		assert_eq!(response["status"], true);
		assert!(session.authenticated);
		assert!(session.aes_key.is_some());
	}
}

// vim: ts=4
