//! Shared data types for the BitBox wire protocol and file-tree model (§3)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content hash, size, and modification time identifying a file version (§3 FileDescriptor)
///
/// Two descriptors are equivalent iff their `md5` is equal; `lastModified`
/// is used only as a tiebreak for "newer" decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
	/// 32-hex lowercase MD5 content digest
	pub md5: String,
	/// Modification time, whole seconds since the epoch
	#[serde(rename = "lastModified")]
	pub last_modified: i64,
	/// File size in bytes
	#[serde(rename = "fileSize")]
	pub file_size: u64,
}

impl FileDescriptor {
	/// §4.F tie-break: when `md5` differs and `lastModified` is equal, the
	/// descriptor with the lexicographically greater `md5` wins.
	pub fn is_newer_than(&self, other: &FileDescriptor) -> bool {
		if self.md5 == other.md5 {
			return false;
		}
		match self.last_modified.cmp(&other.last_modified) {
			std::cmp::Ordering::Greater => true,
			std::cmp::Ordering::Less => false,
			std::cmp::Ordering::Equal => self.md5 > other.md5,
		}
	}
}

impl fmt::Display for FileDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}({}b, mtime={})", self.md5, self.file_size, self.last_modified)
	}
}

/// A `host:port` pair identifying a remote node (§3 Peer.remoteHostPort)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostPort {
	pub host: String,
	pub port: u16,
}

impl HostPort {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		HostPort { host: host.into(), port }
	}
}

impl fmt::Display for HostPort {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

impl std::str::FromStr for HostPort {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (host, port) =
			s.rsplit_once(':').ok_or_else(|| format!("expected host:port, got '{}'", s))?;
		let port: u16 = port.parse().map_err(|_| format!("invalid port in '{}'", s))?;
		Ok(HostPort { host: host.to_string(), port })
	}
}

// vim: ts=4
