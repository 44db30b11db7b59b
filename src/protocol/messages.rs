//! Wire message catalogue (§4.C)
//!
//! Each command carries its own required fields; a missing or
//! mistyped field produces a `ProtocolError` that the peer connection
//! turns into `INVALID_PROTOCOL` (§7).

use serde_json::{json, Value};
use std::convert::TryFrom;

use crate::error::ProtocolError;
use crate::types::{FileDescriptor, HostPort};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	HandshakeRequest { host_port: HostPort },
	HandshakeResponse { host_port: HostPort },
	ConnectionRefused { message: String, peers: Vec<HostPort> },
	InvalidProtocol { message: String },
	/// Not part of the original catalogue in the distilled spec's §4.C
	/// table, but required by §4.D's keep-alive rule whenever a full
	/// `syncInterval` elapses with no other outbound traffic.
	KeepAlive,

	FileCreateRequest { path_name: String, descriptor: FileDescriptor },
	FileCreateResponse { path_name: String, descriptor: FileDescriptor, status: bool, message: String },
	FileModifyRequest { path_name: String, descriptor: FileDescriptor },
	FileModifyResponse { path_name: String, descriptor: FileDescriptor, status: bool, message: String },
	FileDeleteRequest { path_name: String, descriptor: FileDescriptor },
	FileDeleteResponse { path_name: String, descriptor: FileDescriptor, status: bool, message: String },

	FileBytesRequest { path_name: String, descriptor: FileDescriptor, position: u64, length: u32 },
	FileBytesResponse {
		path_name: String,
		descriptor: FileDescriptor,
		position: u64,
		content: String,
		status: bool,
		message: String,
	},

	DirectoryCreateRequest { path_name: String },
	DirectoryCreateResponse { path_name: String, status: bool, message: String },
	DirectoryDeleteRequest { path_name: String },
	DirectoryDeleteResponse { path_name: String, status: bool, message: String },
}

impl Message {
	pub fn command(&self) -> &'static str {
		match self {
			Message::HandshakeRequest { .. } => "HANDSHAKE_REQUEST",
			Message::HandshakeResponse { .. } => "HANDSHAKE_RESPONSE",
			Message::ConnectionRefused { .. } => "CONNECTION_REFUSED",
			Message::InvalidProtocol { .. } => "INVALID_PROTOCOL",
			Message::KeepAlive => "KEEPALIVE",
			Message::FileCreateRequest { .. } => "FILE_CREATE_REQUEST",
			Message::FileCreateResponse { .. } => "FILE_CREATE_RESPONSE",
			Message::FileModifyRequest { .. } => "FILE_MODIFY_REQUEST",
			Message::FileModifyResponse { .. } => "FILE_MODIFY_RESPONSE",
			Message::FileDeleteRequest { .. } => "FILE_DELETE_REQUEST",
			Message::FileDeleteResponse { .. } => "FILE_DELETE_RESPONSE",
			Message::FileBytesRequest { .. } => "FILE_BYTES_REQUEST",
			Message::FileBytesResponse { .. } => "FILE_BYTES_RESPONSE",
			Message::DirectoryCreateRequest { .. } => "DIRECTORY_CREATE_REQUEST",
			Message::DirectoryCreateResponse { .. } => "DIRECTORY_CREATE_RESPONSE",
			Message::DirectoryDeleteRequest { .. } => "DIRECTORY_DELETE_REQUEST",
			Message::DirectoryDeleteResponse { .. } => "DIRECTORY_DELETE_RESPONSE",
		}
	}

	/// True for messages that solicit a reply from the peer, i.e. every
	/// `*_REQUEST` plus `HANDSHAKE_REQUEST`. The datagram transport only
	/// applies §4.G's retransmit-on-timeout behavior to these; a
	/// response or `KEEPALIVE` is sent once and never retried itself.
	pub fn expects_reply(&self) -> bool {
		matches!(
			self,
			Message::HandshakeRequest { .. }
				| Message::FileCreateRequest { .. }
				| Message::FileModifyRequest { .. }
				| Message::FileDeleteRequest { .. }
				| Message::FileBytesRequest { .. }
				| Message::DirectoryCreateRequest { .. }
				| Message::DirectoryDeleteRequest { .. }
		)
	}

	pub fn to_value(&self) -> Value {
		let command = self.command();
		match self {
			Message::HandshakeRequest { host_port } | Message::HandshakeResponse { host_port } => {
				json!({ "command": command, "hostPort": host_port })
			}
			Message::ConnectionRefused { message, peers } => {
				json!({ "command": command, "message": message, "peers": peers })
			}
			Message::InvalidProtocol { message } => json!({ "command": command, "message": message }),
			Message::KeepAlive => json!({ "command": command }),
			Message::FileCreateRequest { path_name, descriptor }
			| Message::FileModifyRequest { path_name, descriptor }
			| Message::FileDeleteRequest { path_name, descriptor } => {
				json!({ "command": command, "pathName": path_name, "fileDescriptor": descriptor })
			}
			Message::FileCreateResponse { path_name, descriptor, status, message }
			| Message::FileModifyResponse { path_name, descriptor, status, message }
			| Message::FileDeleteResponse { path_name, descriptor, status, message } => json!({
				"command": command,
				"pathName": path_name,
				"fileDescriptor": descriptor,
				"status": status,
				"message": message,
			}),
			Message::FileBytesRequest { path_name, descriptor, position, length } => json!({
				"command": command,
				"pathName": path_name,
				"fileDescriptor": descriptor,
				"position": position,
				"length": length,
			}),
			Message::FileBytesResponse { path_name, descriptor, position, content, status, message } => {
				json!({
					"command": command,
					"pathName": path_name,
					"fileDescriptor": descriptor,
					"position": position,
					"content": content,
					"status": status,
					"message": message,
				})
			}
			Message::DirectoryCreateRequest { path_name } | Message::DirectoryDeleteRequest { path_name } => {
				json!({ "command": command, "pathName": path_name })
			}
			Message::DirectoryCreateResponse { path_name, status, message }
			| Message::DirectoryDeleteResponse { path_name, status, message } => json!({
				"command": command,
				"pathName": path_name,
				"status": status,
				"message": message,
			}),
		}
	}

	pub fn from_value(value: &Value) -> Result<Message, ProtocolError> {
		let command = value
			.get("command")
			.and_then(Value::as_str)
			.ok_or_else(|| ProtocolError::UnknownCommand { command: "<missing>".to_string() })?
			.to_string();

		match command.as_str() {
			"HANDSHAKE_REQUEST" => {
				Ok(Message::HandshakeRequest { host_port: host_port(&command, value, "hostPort")? })
			}
			"HANDSHAKE_RESPONSE" => {
				Ok(Message::HandshakeResponse { host_port: host_port(&command, value, "hostPort")? })
			}
			"CONNECTION_REFUSED" => Ok(Message::ConnectionRefused {
				message: string_field(&command, value, "message")?,
				peers: host_port_list(&command, value, "peers")?,
			}),
			"INVALID_PROTOCOL" => {
				Ok(Message::InvalidProtocol { message: string_field(&command, value, "message")? })
			}
			"KEEPALIVE" => Ok(Message::KeepAlive),
			"FILE_CREATE_REQUEST" => Ok(Message::FileCreateRequest {
				path_name: string_field(&command, value, "pathName")?,
				descriptor: descriptor_field(&command, value)?,
			}),
			"FILE_MODIFY_REQUEST" => Ok(Message::FileModifyRequest {
				path_name: string_field(&command, value, "pathName")?,
				descriptor: descriptor_field(&command, value)?,
			}),
			"FILE_DELETE_REQUEST" => Ok(Message::FileDeleteRequest {
				path_name: string_field(&command, value, "pathName")?,
				descriptor: descriptor_field(&command, value)?,
			}),
			"FILE_CREATE_RESPONSE" => Ok(Message::FileCreateResponse {
				path_name: string_field(&command, value, "pathName")?,
				descriptor: descriptor_field(&command, value)?,
				status: bool_field(&command, value, "status")?,
				message: string_field(&command, value, "message")?,
			}),
			"FILE_MODIFY_RESPONSE" => Ok(Message::FileModifyResponse {
				path_name: string_field(&command, value, "pathName")?,
				descriptor: descriptor_field(&command, value)?,
				status: bool_field(&command, value, "status")?,
				message: string_field(&command, value, "message")?,
			}),
			"FILE_DELETE_RESPONSE" => Ok(Message::FileDeleteResponse {
				path_name: string_field(&command, value, "pathName")?,
				descriptor: descriptor_field(&command, value)?,
				status: bool_field(&command, value, "status")?,
				message: string_field(&command, value, "message")?,
			}),
			"FILE_BYTES_REQUEST" => Ok(Message::FileBytesRequest {
				path_name: string_field(&command, value, "pathName")?,
				descriptor: descriptor_field(&command, value)?,
				position: u64_field(&command, value, "position")?,
				length: u32_field(&command, value, "length")?,
			}),
			"FILE_BYTES_RESPONSE" => Ok(Message::FileBytesResponse {
				path_name: string_field(&command, value, "pathName")?,
				descriptor: descriptor_field(&command, value)?,
				position: u64_field(&command, value, "position")?,
				content: string_field(&command, value, "content")?,
				status: bool_field(&command, value, "status")?,
				message: string_field(&command, value, "message")?,
			}),
			"DIRECTORY_CREATE_REQUEST" => {
				Ok(Message::DirectoryCreateRequest { path_name: string_field(&command, value, "pathName")? })
			}
			"DIRECTORY_DELETE_REQUEST" => {
				Ok(Message::DirectoryDeleteRequest { path_name: string_field(&command, value, "pathName")? })
			}
			"DIRECTORY_CREATE_RESPONSE" => Ok(Message::DirectoryCreateResponse {
				path_name: string_field(&command, value, "pathName")?,
				status: bool_field(&command, value, "status")?,
				message: string_field(&command, value, "message")?,
			}),
			"DIRECTORY_DELETE_RESPONSE" => Ok(Message::DirectoryDeleteResponse {
				path_name: string_field(&command, value, "pathName")?,
				status: bool_field(&command, value, "status")?,
				message: string_field(&command, value, "message")?,
			}),
			other => Err(ProtocolError::UnknownCommand { command: other.to_string() }),
		}
	}
}

fn string_field(command: &str, value: &Value, field: &str) -> Result<String, ProtocolError> {
	value
		.get(field)
		.ok_or_else(|| ProtocolError::MissingField { command: command.to_string(), field: field.to_string() })?
		.as_str()
		.map(str::to_string)
		.ok_or_else(|| ProtocolError::WrongFieldType { command: command.to_string(), field: field.to_string() })
}

fn bool_field(command: &str, value: &Value, field: &str) -> Result<bool, ProtocolError> {
	value
		.get(field)
		.ok_or_else(|| ProtocolError::MissingField { command: command.to_string(), field: field.to_string() })?
		.as_bool()
		.ok_or_else(|| ProtocolError::WrongFieldType { command: command.to_string(), field: field.to_string() })
}

fn u64_field(command: &str, value: &Value, field: &str) -> Result<u64, ProtocolError> {
	value
		.get(field)
		.ok_or_else(|| ProtocolError::MissingField { command: command.to_string(), field: field.to_string() })?
		.as_u64()
		.ok_or_else(|| ProtocolError::WrongFieldType { command: command.to_string(), field: field.to_string() })
}

fn u32_field(command: &str, value: &Value, field: &str) -> Result<u32, ProtocolError> {
	let n = u64_field(command, value, field)?;
	u32::try_from(n)
		.map_err(|_| ProtocolError::WrongFieldType { command: command.to_string(), field: field.to_string() })
}

fn descriptor_field(command: &str, value: &Value) -> Result<FileDescriptor, ProtocolError> {
	let raw = value.get("fileDescriptor").ok_or_else(|| ProtocolError::MissingField {
		command: command.to_string(),
		field: "fileDescriptor".to_string(),
	})?;
	serde_json::from_value(raw.clone()).map_err(|_| ProtocolError::WrongFieldType {
		command: command.to_string(),
		field: "fileDescriptor".to_string(),
	})
}

fn host_port(command: &str, value: &Value, field: &str) -> Result<HostPort, ProtocolError> {
	let raw = value
		.get(field)
		.ok_or_else(|| ProtocolError::MissingField { command: command.to_string(), field: field.to_string() })?;
	serde_json::from_value(raw.clone())
		.map_err(|_| ProtocolError::WrongFieldType { command: command.to_string(), field: field.to_string() })
}

fn host_port_list(command: &str, value: &Value, field: &str) -> Result<Vec<HostPort>, ProtocolError> {
	let raw = value
		.get(field)
		.ok_or_else(|| ProtocolError::MissingField { command: command.to_string(), field: field.to_string() })?;
	serde_json::from_value(raw.clone())
		.map_err(|_| ProtocolError::WrongFieldType { command: command.to_string(), field: field.to_string() })
}

#[cfg(test)]
mod tests {
	use super::*;

	fn descriptor() -> FileDescriptor {
		FileDescriptor { md5: "abc123".to_string(), last_modified: 1000, file_size: 5 }
	}

	#[test]
	fn encode_decode_is_identity_for_file_create_request() {
		let original = Message::FileCreateRequest { path_name: "a/b.txt".to_string(), descriptor: descriptor() };
		let roundtripped = Message::from_value(&original.to_value()).unwrap();
		assert_eq!(original, roundtripped);
	}

	#[test]
	fn encode_decode_is_identity_for_handshake() {
		let original = Message::HandshakeRequest { host_port: HostPort::new("10.0.0.1", 7777) };
		let roundtripped = Message::from_value(&original.to_value()).unwrap();
		assert_eq!(original, roundtripped);
	}

	#[test]
	fn missing_field_is_reported_precisely() {
		let value = json!({ "command": "FILE_CREATE_REQUEST", "pathName": "a" });
		let err = Message::from_value(&value).unwrap_err();
		assert!(matches!(
			err,
			ProtocolError::MissingField { ref command, ref field }
				if command == "FILE_CREATE_REQUEST" && field == "fileDescriptor"
		));
	}

	#[test]
	fn wrong_type_is_reported_precisely() {
		let value = json!({
			"command": "FILE_BYTES_REQUEST",
			"pathName": "a",
			"fileDescriptor": descriptor(),
			"position": "not-a-number",
			"length": 5,
		});
		let err = Message::from_value(&value).unwrap_err();
		assert!(matches!(err, ProtocolError::WrongFieldType { ref field, .. } if field == "position"));
	}

	#[test]
	fn unknown_command_is_reported() {
		let value = json!({ "command": "BOGUS" });
		let err = Message::from_value(&value).unwrap_err();
		assert!(matches!(err, ProtocolError::UnknownCommand { command } if command == "BOGUS"));
	}

	#[test]
	fn only_requests_expect_a_reply() {
		assert!(Message::FileBytesRequest { path_name: "a".to_string(), descriptor: descriptor(), position: 0, length: 1 }
			.expects_reply());
		assert!(!Message::KeepAlive.expects_reply());
		assert!(!Message::FileCreateResponse {
			path_name: "a".to_string(),
			descriptor: descriptor(),
			status: true,
			message: "ok".to_string(),
		}
		.expects_reply());
	}
}

// vim: ts=4
