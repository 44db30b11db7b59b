//! Unreliable datagram transport (§4.G)
//!
//! Each message is wrapped in a `{ seq, payload }` envelope and sent
//! with a single, non-blocking [`Transport::send`]. Retransmission on
//! timeout (§4.G: `udpTimeout × 2^attempt`, up to `udpRetries`
//! attempts) is the peer connection loop's job, not the transport's —
//! `is_reliable` tells it when that's needed.

use async_trait::async_trait;
use serde_json::json;
use tokio::net::UdpSocket;

use crate::error::ProtocolError;
use crate::protocol::Message;

use super::Transport;

pub struct DatagramTransport {
	socket: UdpSocket,
	next_seq: u64,
}

impl DatagramTransport {
	/// `socket` must already be `connect()`-ed to the peer's address.
	pub fn new(socket: UdpSocket) -> DatagramTransport {
		DatagramTransport { socket, next_seq: 0 }
	}

	fn encode(&mut self, message: &Message) -> Vec<u8> {
		let seq = self.next_seq;
		self.next_seq += 1;
		serde_json::to_vec(&json!({ "seq": seq, "payload": message.to_value() }))
			.expect("Value always serializes")
	}

	fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
		let envelope: serde_json::Value = serde_json::from_slice(bytes)
			.map_err(|e| ProtocolError::MalformedJson { message: e.to_string() })?;
		let payload = envelope
			.get("payload")
			.ok_or_else(|| ProtocolError::MalformedJson { message: "datagram missing 'payload'".to_string() })?;
		Message::from_value(payload)
	}
}

#[async_trait]
impl Transport for DatagramTransport {
	async fn send(&mut self, message: &Message) -> std::io::Result<()> {
		let envelope = self.encode(message);
		self.socket.send(&envelope).await?;
		Ok(())
	}

	async fn receive(&mut self) -> Result<Option<Message>, ProtocolError> {
		let mut buf = vec![0u8; 65536];
		let n = match self.socket.recv(&mut buf).await {
			Ok(n) => n,
			Err(_) => return Ok(None),
		};
		Self::decode(&buf[..n]).map(Some)
	}

	fn is_reliable(&self) -> bool {
		false
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::HostPort;

	async fn connected_pair() -> (UdpSocket, UdpSocket) {
		let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		a.connect(b.local_addr().unwrap()).await.unwrap();
		b.connect(a.local_addr().unwrap()).await.unwrap();
		(a, b)
	}

	#[tokio::test]
	async fn send_then_receive_round_trips_a_message() {
		let (a, b) = connected_pair().await;
		let mut ta = DatagramTransport::new(a);
		let mut tb = DatagramTransport::new(b);

		let request = Message::HandshakeRequest { host_port: HostPort::new("127.0.0.1", 1) };
		ta.send(&request).await.unwrap();
		let got = tb.receive().await.unwrap().unwrap();
		assert_eq!(got, request);
	}

	#[tokio::test]
	async fn is_reliable_is_false() {
		let (a, _b) = connected_pair().await;
		let ta = DatagramTransport::new(a);
		assert!(!ta.is_reliable());
	}
}

// vim: ts=4
