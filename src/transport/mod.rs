//! Transport adapters (§4.G)
//!
//! The reliable stream transport and the unreliable datagram transport
//! expose an identical `send`/`receive` contract so that the peer
//! connection state machine (§4.D) is transport-agnostic.

pub mod datagram;
pub mod stream;

pub use datagram::DatagramTransport;
pub use stream::StreamTransport;

use async_trait::async_trait;

use crate::error::ProtocolError;
use crate::protocol::Message;

#[async_trait]
pub trait Transport: Send {
	/// Sends `message` without waiting for any acknowledgement.
	async fn send(&mut self, message: &Message) -> std::io::Result<()>;

	/// Blocks for the next inbound message; `Ok(None)` means the peer
	/// closed the transport cleanly.
	async fn receive(&mut self) -> Result<Option<Message>, ProtocolError>;

	/// False for the datagram transport, whose deliveries can be lost
	/// or reordered; the peer connection only applies §4.G's
	/// retransmit-on-timeout behavior when this is false.
	fn is_reliable(&self) -> bool {
		true
	}
}

// vim: ts=4
