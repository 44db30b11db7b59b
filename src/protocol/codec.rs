//! Line-delimited JSON framing (§4.C, §6 "Wire format (peer)")
//!
//! One message per newline, no additional length prefix. Shared by
//! both the stream and datagram transports' inner payload.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::error::ProtocolError;

use super::messages::Message;

/// Reads one line and decodes it into a `Message`.
///
/// Returns `Ok(None)` on clean EOF, `Ok(Some(..))` on a decoded
/// message, `Err` if the line was present but malformed or failed
/// validation.
pub async fn read_message<R: AsyncBufReadExt + Unpin>(
	reader: &mut R,
) -> Result<Option<Message>, ProtocolError> {
	let mut line = String::new();
	let n = reader
		.read_line(&mut line)
		.await
		.map_err(|e| ProtocolError::MalformedJson { message: e.to_string() })?;
	if n == 0 {
		return Ok(None);
	}
	let trimmed = line.trim_end_matches(['\n', '\r']);
	if trimmed.is_empty() {
		return Ok(None);
	}
	let value: serde_json::Value = serde_json::from_str(trimmed)
		.map_err(|e| ProtocolError::MalformedJson { message: e.to_string() })?;
	Message::from_value(&value).map(Some)
}

/// Serializes `message` and writes it followed by a newline.
pub async fn write_message<W: AsyncWriteExt + Unpin>(
	writer: &mut W,
	message: &Message,
) -> std::io::Result<()> {
	let mut line = serde_json::to_string(&message.to_value()).expect("Value always serializes");
	line.push('\n');
	writer.write_all(line.as_bytes()).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::HostPort;

	#[tokio::test]
	async fn round_trips_a_message_through_a_buffer() {
		let message = Message::HandshakeRequest { host_port: HostPort::new("127.0.0.1", 7777) };
		let mut buf = Vec::new();
		write_message(&mut buf, &message).await.unwrap();
		assert!(buf.ends_with(b"\n"));

		let mut reader = tokio::io::BufReader::new(&buf[..]);
		let decoded = read_message(&mut reader).await.unwrap();
		assert_eq!(decoded, Some(message));
	}

	#[tokio::test]
	async fn empty_stream_yields_none() {
		let mut reader = tokio::io::BufReader::new(&b""[..]);
		assert_eq!(read_message(&mut reader).await.unwrap(), None);
	}

	#[tokio::test]
	async fn malformed_json_is_reported() {
		let mut reader = tokio::io::BufReader::new(&b"not json at all\n"[..]);
		let err = read_message(&mut reader).await.unwrap_err();
		assert!(matches!(err, ProtocolError::MalformedJson { .. }));
	}
}

// vim: ts=4
