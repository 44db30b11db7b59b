#![allow(dead_code)]

//! Configuration for a BitBox node
//!
//! This module consolidates every recognized key (§6) into a single
//! `Config` struct, loaded from a TOML file and hot-reloaded at runtime.
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (`Config::default()`)
//! 2. Config file (path given on the command line)
//!
//! Transport `mode` is excluded from hot-reload: §6 fixes it as not
//! re-bound at runtime, so a change to that key is logged and ignored
//! until the process restarts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::ConfigError;
use crate::logging::*;
use crate::types::HostPort;

// ============================================================================
// TRANSPORT MODE
// ============================================================================

/// Which transport adapter carries peer traffic (§4.G)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
	Tcp,
	Udp,
}

impl std::str::FromStr for TransportMode {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"tcp" => Ok(TransportMode::Tcp),
			"udp" => Ok(TransportMode::Udp),
			other => Err(ConfigError::InvalidValue {
				key: "mode".to_string(),
				message: format!("expected 'tcp' or 'udp', got '{}'", other),
			}),
		}
	}
}

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

/// Unified configuration for a BitBox node (§6)
///
/// This is the single source of truth for node configuration. Bounded
/// parameters (`peers`, `maximumIncomingConnections`, the UDP timing
/// knobs, `authorized_keys`) refresh on every reload; `port`,
/// `clientPort`, and `mode` only take effect at bind time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// IDENTITY
	// ========================================================================
	/// Name this node advertises to peers
	pub advertised_name: String,

	// ========================================================================
	// PEER TRANSPORT
	// ========================================================================
	/// Port the peer transport listens on
	pub port: u16,

	/// Peers to dial at startup, comma-separated `host:port`
	#[serde(with = "host_port_list")]
	pub peers: Vec<HostPort>,

	/// Stream or datagram transport; fixed for the process lifetime
	pub mode: TransportMode,

	/// Bytes requested per `FILE_BYTES_REQUEST`
	pub block_size: u64,

	/// Seconds between change-detector scans and the keep-alive period
	pub sync_interval: u64,

	/// Cap on `ACTIVE` incoming peers (§3 PeerRegistry)
	pub maximum_incoming_connections: usize,

	/// Datagram transport base retry timeout, milliseconds
	pub udp_timeout: u64,

	/// Datagram transport retry attempts before the peer is closed
	pub udp_retries: u32,

	// ========================================================================
	// CLIENT CHANNEL
	// ========================================================================
	/// Port the authenticated client channel listens on
	pub client_port: u16,

	/// Authorized OpenSSH public keys, comma-separated
	#[serde(with = "comma_separated")]
	pub authorized_keys: Vec<String>,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			// Identity
			advertised_name: "bitbox".to_string(),

			// Peer transport
			port: 7777,
			peers: vec![],
			mode: TransportMode::Tcp,
			block_size: 65536,
			sync_interval: 30,
			maximum_incoming_connections: 16,
			udp_timeout: 2000,
			udp_retries: 5,

			// Client channel
			client_port: 7778,
			authorized_keys: vec![],
		}
	}
}

impl Config {
	/// Load configuration from a TOML file, falling back to defaults for
	/// any key the file omits.
	pub async fn load(path: &Path) -> Result<Config, ConfigError> {
		let text = tokio::fs::read_to_string(path).await.map_err(|e| ConfigError::ParseFailed {
			message: format!("reading {:?}: {}", path, e),
		})?;
		Self::parse(&text)
	}

	fn parse(text: &str) -> Result<Config, ConfigError> {
		toml::from_str(text).map_err(|e| ConfigError::ParseFailed { message: e.to_string() })
	}

	pub fn handshake_timeout(&self) -> Duration {
		Duration::from_secs(self.sync_interval)
	}

	pub fn peer_idle_timeout(&self) -> Duration {
		Duration::from_secs(self.sync_interval * 2)
	}

	/// `(udpTimeout, udpRetries)` for §4.G's retransmit-on-timeout loop.
	pub fn udp_retry_budget(&self) -> (Duration, u32) {
		(Duration::from_millis(self.udp_timeout), self.udp_retries)
	}
}

// ============================================================================
// HOT RELOAD
// ============================================================================

/// Receiving half of the configuration broadcast; every subsystem that
/// reads a bounded parameter holds one of these instead of the `Config`
/// directly (§9 "hot-reload is modeled as a broadcast subscription").
pub type ConfigWatch = watch::Receiver<Config>;

/// Polls `path`'s mtime every `pollInterval` and republishes `Config`
/// over `sender` when the file has changed. Runs until the channel's
/// last receiver is dropped.
pub async fn watch_file(path: PathBuf, sender: watch::Sender<Config>, poll_interval: Duration) {
	let mut last_modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

	loop {
		tokio::time::sleep(poll_interval).await;
		if sender.is_closed() {
			return;
		}

		let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
			Ok(m) => m,
			Err(e) => {
				warn!("config watch: could not stat {:?}: {}", path, e);
				continue;
			}
		};
		if Some(modified) == last_modified {
			continue;
		}
		last_modified = Some(modified);

		match Config::load(&path).await {
			Ok(next) => {
				let previous = sender.borrow().clone();
				if next.mode != previous.mode {
					warn!(
						"config reload: 'mode' changed ({:?} -> {:?}) but the transport is not \
						 re-bound at runtime; ignoring for this process",
						previous.mode, next.mode
					);
					let mut next = next;
					next.mode = previous.mode;
					let _ = sender.send(next);
				} else {
					info!("configuration reloaded from {:?}", path);
					let _ = sender.send(next);
				}
			}
			Err(e) => warn!("config reload: failed to parse {:?}: {}", path, e),
		}
	}
}

mod host_port_list {
	use super::HostPort;
	use serde::{Deserialize, Deserializer, Serializer};
	use std::str::FromStr;

	pub fn serialize<S: Serializer>(value: &[HostPort], serializer: S) -> Result<S::Ok, S::Error> {
		let joined =
			value.iter().map(|hp| hp.to_string()).collect::<Vec<_>>().join(",");
		serializer.serialize_str(&joined)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<HostPort>, D::Error> {
		let raw = String::deserialize(deserializer)?;
		raw.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(|s| HostPort::from_str(s).map_err(serde::de::Error::custom))
			.collect()
	}
}

mod comma_separated {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &[String], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&value.join(","))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
		let raw = String::deserialize(deserializer)?;
		Ok(raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sane() {
		let cfg = Config::default();
		assert_eq!(cfg.mode, TransportMode::Tcp);
		assert!(cfg.peers.is_empty());
	}

	#[test]
	fn parses_minimal_file() {
		let text = r#"
			advertisedName = "node-a"
			port = 9000
			peers = "10.0.0.2:9000,10.0.0.3:9000"
			mode = "tcp"
			blockSize = 4096
			syncInterval = 10
			maximumIncomingConnections = 4
			udpTimeout = 1000
			udpRetries = 3
			clientPort = 9001
			authorized_keys = "ssh-rsa AAAA...,ssh-ed25519 AAAA..."
		"#;
		let cfg = Config::parse(text).unwrap();
		assert_eq!(cfg.advertised_name, "node-a");
		assert_eq!(cfg.peers.len(), 2);
		assert_eq!(cfg.peers[0], HostPort::new("10.0.0.2", 9000));
		assert_eq!(cfg.authorized_keys.len(), 2);
	}

	#[test]
	fn rejects_malformed_toml() {
		assert!(Config::parse("not = [valid").is_err());
	}
}

// vim: ts=4
