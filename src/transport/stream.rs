//! Reliable stream transport: newline-terminated JSON, no length prefix.

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::ProtocolError;
use crate::protocol::{self, Message};

use super::Transport;

pub struct StreamTransport {
	reader: BufReader<OwnedReadHalf>,
	writer: OwnedWriteHalf,
}

impl StreamTransport {
	pub fn new(stream: TcpStream) -> StreamTransport {
		let (read_half, writer) = stream.into_split();
		StreamTransport { reader: BufReader::new(read_half), writer }
	}
}

#[async_trait]
impl Transport for StreamTransport {
	async fn send(&mut self, message: &Message) -> std::io::Result<()> {
		protocol::write_message(&mut self.writer, message).await
	}

	async fn receive(&mut self) -> Result<Option<Message>, ProtocolError> {
		protocol::read_message(&mut self.reader).await
	}
}

// vim: ts=4
