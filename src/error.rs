//! Error types for BitBox operations
//!
//! One enum per subsystem, matching the reason vocabulary fixed by §4.A/§7
//! of the specification, with `From` glue into the crate-wide `BitBoxError`.

use std::error::Error;
use std::fmt;
use std::io;

use crate::validation::ValidationError;

/// Errors raised by the file-tree model (§4.A)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsError {
	/// A path is already occupied by a directory while a file op was attempted (or vice versa)
	PathNameAlreadyInUse { path: String },
	/// A file already exists (re-entrant create/modify on a settling loader)
	FileAlreadyExists { path: String },
	/// A file does not exist where one was expected
	FileDoesNotExist { path: String },
	/// The parent directory of a path does not exist
	ParentDoesNotExist { path: String },
	/// A pathname escapes the watched root or is absolute
	UnsafePathname { path: String },
	/// A newer local file blocks a delete
	NewerFileExists { path: String },
	/// Directory delete requested on a non-empty directory
	DirectoryNotEmpty { path: String },
	/// Underlying I/O failure
	Io(String),
}

impl fmt::Display for FsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FsError::PathNameAlreadyInUse { path } => {
				write!(f, "path-name-already-in-use: {}", path)
			}
			FsError::FileAlreadyExists { path } => write!(f, "file-already-exists: {}", path),
			FsError::FileDoesNotExist { path } => write!(f, "file-does-not-exist: {}", path),
			FsError::ParentDoesNotExist { path } => write!(f, "parent-does-not-exist: {}", path),
			FsError::UnsafePathname { path } => write!(f, "unsafe-pathname: {}", path),
			FsError::NewerFileExists { path } => write!(f, "newer file exists: {}", path),
			FsError::DirectoryNotEmpty { path } => write!(f, "directory not empty: {}", path),
			FsError::Io(message) => write!(f, "I/O error: {}", message),
		}
	}
}

impl Error for FsError {}

impl From<io::Error> for FsError {
	fn from(e: io::Error) -> Self {
		FsError::Io(e.to_string())
	}
}

impl From<ValidationError> for FsError {
	fn from(e: ValidationError) -> Self {
		match e {
			ValidationError::PathError(message) => FsError::UnsafePathname { path: message },
			ValidationError::Other(message) => FsError::Io(message),
		}
	}
}

/// Errors raised by the message codec and peer protocol state machine (§4.C/§4.D)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
	/// `command` field missing or not a recognized `MessageType`
	UnknownCommand { command: String },
	/// A required field for this command was missing
	MissingField { command: String, field: String },
	/// A field had the wrong JSON type
	WrongFieldType { command: String, field: String },
	/// The line was not valid JSON at all
	MalformedJson { message: String },
	/// base64 payload failed to decode
	BadBase64 { field: String },
}

impl fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProtocolError::UnknownCommand { command } => {
				write!(f, "unknown command: {}", command)
			}
			ProtocolError::MissingField { command, field } => {
				write!(f, "{} missing required field '{}'", command, field)
			}
			ProtocolError::WrongFieldType { command, field } => {
				write!(f, "{} field '{}' has the wrong type", command, field)
			}
			ProtocolError::MalformedJson { message } => write!(f, "malformed JSON: {}", message),
			ProtocolError::BadBase64 { field } => write!(f, "field '{}' is not valid base64", field),
		}
	}
}

impl Error for ProtocolError {}

/// Errors raised by peer connection and registry management (§4.D/§4.E)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
	/// The transport dropped the connection
	Disconnected { remote: String },
	/// Handshake did not complete within `handshakeTimeout`
	HandshakeTimedOut { remote: String },
	/// No inbound traffic within `syncInterval * 2`
	Unreachable { remote: String },
	/// Incoming connection refused because the registry is at capacity
	RegistryFull { remote: String },
	/// Fallback peer list was exhausted without a successful dial
	FallbackExhausted,
	/// An outbound dial failed
	DialFailed { remote: String, message: String },
}

impl fmt::Display for PeerError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PeerError::Disconnected { remote } => write!(f, "peer {} disconnected", remote),
			PeerError::HandshakeTimedOut { remote } => {
				write!(f, "handshake with {} timed out", remote)
			}
			PeerError::Unreachable { remote } => write!(f, "peer {} is unreachable", remote),
			PeerError::RegistryFull { remote } => {
				write!(f, "registry full, refused incoming peer {}", remote)
			}
			PeerError::FallbackExhausted => write!(f, "fallback peer list exhausted"),
			PeerError::DialFailed { remote, message } => {
				write!(f, "failed to dial {}: {}", remote, message)
			}
		}
	}
}

impl Error for PeerError {}

/// Errors raised by the client control channel (§4.H)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
	/// Identity not present in `authorized_keys`
	UnknownIdentity { identity: String },
	/// Command received before a successful `AUTH_REQUEST`
	NotAuthenticated,
	/// AES decryption or JSON parsing of the decrypted payload failed
	DecryptFailed,
	/// Requested peer was not found in the registry
	PeerNotFound { host_port: String },
}

impl fmt::Display for ClientError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ClientError::UnknownIdentity { identity } => {
				write!(f, "public key not found: {}", identity)
			}
			ClientError::NotAuthenticated => write!(f, "session is not authenticated"),
			ClientError::DecryptFailed => write!(f, "failed to decrypt session payload"),
			ClientError::PeerNotFound { host_port } => write!(f, "peer not found: {}", host_port),
		}
	}
}

impl Error for ClientError {}

/// Errors raised by the external crypto contract (§4.H/§6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
	/// RSA wrap/unwrap failed (key mismatch or malformed block)
	KeyWrapFailed { message: String },
	/// AES block cipher operation failed (wrong block size, bad key length)
	BlockCipherFailed { message: String },
}

impl fmt::Display for CryptoError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CryptoError::KeyWrapFailed { message } => write!(f, "key wrap failed: {}", message),
			CryptoError::BlockCipherFailed { message } => {
				write!(f, "block cipher failed: {}", message)
			}
		}
	}
}

impl Error for CryptoError {}

/// Errors raised while loading or hot-reloading configuration (§6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
	/// A required key was missing at startup
	MissingKey { key: String },
	/// A value could not be parsed into its expected type
	InvalidValue { key: String, message: String },
	/// The file could not be read or parsed as TOML
	ParseFailed { message: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::MissingKey { key } => write!(f, "missing required key: {}", key),
			ConfigError::InvalidValue { key, message } => {
				write!(f, "invalid value for {}: {}", key, message)
			}
			ConfigError::ParseFailed { message } => {
				write!(f, "failed to parse configuration: {}", message)
			}
		}
	}
}

impl Error for ConfigError {}

/// Unified error type for BitBox operations
///
/// Configuration and bind failures are the only variants that should ever
/// propagate to `main` and terminate the process (§7 propagation policy);
/// every other variant is confined to its peer, transfer, or session.
#[derive(Debug)]
pub enum BitBoxError {
	Fs(FsError),
	Protocol(ProtocolError),
	Peer(PeerError),
	Client(ClientError),
	Crypto(CryptoError),
	Config(ConfigError),
	Io(io::Error),
	Other { message: String },
}

impl fmt::Display for BitBoxError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BitBoxError::Fs(e) => write!(f, "{}", e),
			BitBoxError::Protocol(e) => write!(f, "{}", e),
			BitBoxError::Peer(e) => write!(f, "{}", e),
			BitBoxError::Client(e) => write!(f, "{}", e),
			BitBoxError::Crypto(e) => write!(f, "{}", e),
			BitBoxError::Config(e) => write!(f, "{}", e),
			BitBoxError::Io(e) => write!(f, "I/O error: {}", e),
			BitBoxError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for BitBoxError {}

impl From<io::Error> for BitBoxError {
	fn from(e: io::Error) -> Self {
		BitBoxError::Io(e)
	}
}

impl From<FsError> for BitBoxError {
	fn from(e: FsError) -> Self {
		BitBoxError::Fs(e)
	}
}

impl From<ProtocolError> for BitBoxError {
	fn from(e: ProtocolError) -> Self {
		BitBoxError::Protocol(e)
	}
}

impl From<PeerError> for BitBoxError {
	fn from(e: PeerError) -> Self {
		BitBoxError::Peer(e)
	}
}

impl From<ClientError> for BitBoxError {
	fn from(e: ClientError) -> Self {
		BitBoxError::Client(e)
	}
}

impl From<CryptoError> for BitBoxError {
	fn from(e: CryptoError) -> Self {
		BitBoxError::Crypto(e)
	}
}

impl From<ConfigError> for BitBoxError {
	fn from(e: ConfigError) -> Self {
		BitBoxError::Config(e)
	}
}

impl From<ValidationError> for BitBoxError {
	fn from(e: ValidationError) -> Self {
		BitBoxError::Fs(e.into())
	}
}

// vim: ts=4
