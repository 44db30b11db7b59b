//! Thread-safe ordered queue with blocking `take` (§5, §9)
//!
//! Order-preserving FIFO; `push_keepalive` deduplicates so that at most
//! one keep-alive noop is ever pending at a time. `take` blocks until
//! an item is pushed or the queue is closed, at which point it returns
//! `None` and every further call does too.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::protocol::Message;

struct Inner {
	items: VecDeque<Message>,
	keepalive_pending: bool,
	closed: bool,
}

pub struct OutboundQueue {
	inner: Mutex<Inner>,
	notify: Notify,
}

impl OutboundQueue {
	pub fn new() -> OutboundQueue {
		OutboundQueue {
			inner: Mutex::new(Inner { items: VecDeque::new(), keepalive_pending: false, closed: false }),
			notify: Notify::new(),
		}
	}

	/// Enqueues `message`, preserving insertion order.
	pub fn push(&self, message: Message) {
		let mut inner = self.inner.lock().unwrap();
		if inner.closed {
			return;
		}
		inner.items.push_back(message);
		drop(inner);
		self.notify.notify_one();
	}

	/// Enqueues a `KeepAlive`, but only if one is not already pending.
	pub fn push_keepalive(&self) {
		let mut inner = self.inner.lock().unwrap();
		if inner.closed || inner.keepalive_pending {
			return;
		}
		inner.keepalive_pending = true;
		inner.items.push_back(Message::KeepAlive);
		drop(inner);
		self.notify.notify_one();
	}

	/// Blocks until an item is available or the queue is closed.
	pub async fn take(&self) -> Option<Message> {
		loop {
			{
				let mut inner = self.inner.lock().unwrap();
				if let Some(message) = inner.items.pop_front() {
					if matches!(message, Message::KeepAlive) {
						inner.keepalive_pending = false;
					}
					return Some(message);
				}
				if inner.closed {
					return None;
				}
			}
			self.notify.notified().await;
		}
	}

	/// Marks the queue closed; every blocked and future `take()` returns `None`.
	pub fn close(&self) {
		let mut inner = self.inner.lock().unwrap();
		inner.closed = true;
		drop(inner);
		self.notify.notify_waiters();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::HostPort;

	#[tokio::test]
	async fn take_returns_items_in_order() {
		let queue = OutboundQueue::new();
		queue.push(Message::HandshakeRequest { host_port: HostPort::new("a", 1) });
		queue.push(Message::HandshakeRequest { host_port: HostPort::new("b", 2) });
		let first = queue.take().await.unwrap();
		assert_eq!(first, Message::HandshakeRequest { host_port: HostPort::new("a", 1) });
	}

	#[tokio::test]
	async fn keepalive_is_deduplicated() {
		let queue = OutboundQueue::new();
		queue.push_keepalive();
		queue.push_keepalive();
		let first = queue.take().await.unwrap();
		assert_eq!(first, Message::KeepAlive);
		queue.push(Message::HandshakeRequest { host_port: HostPort::new("a", 1) });
		let second = queue.take().await.unwrap();
		assert_eq!(second, Message::HandshakeRequest { host_port: HostPort::new("a", 1) });
	}

	#[tokio::test]
	async fn take_unblocks_on_close() {
		let queue = OutboundQueue::new();
		queue.close();
		assert_eq!(queue.take().await, None);
	}
}

// vim: ts=4
