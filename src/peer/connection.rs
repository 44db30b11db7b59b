//! Peer connection state machine (§3 Peer, §4.D)
//!
//! One fiber per peer, multiplexing the outbound queue and the
//! transport's inbound stream with `select!` so that a single task
//! owns every state transition (§5: "exactly one writer and one
//! reader may hold the transport simultaneously" — trivially true
//! when both live in the same task).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

use crate::config::ConfigWatch;
use crate::logging::*;
use crate::peer::outbound_queue::OutboundQueue;
use crate::peer::registry::PeerRegistry;
use crate::protocol::Message;
use crate::transport::Transport;
use crate::types::HostPort;

/// `{ WAITING, ACTIVE, CLOSED }` (§3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
	Waiting = 0,
	Active = 1,
	Closed = 2,
}

impl From<u8> for PeerState {
	fn from(v: u8) -> Self {
		match v {
			0 => PeerState::Waiting,
			1 => PeerState::Active,
			_ => PeerState::Closed,
		}
	}
}

/// Receives every `ACTIVE`-state message not consumed by the
/// handshake/keep-alive logic itself; implemented by the sync engine.
#[async_trait]
pub trait InboundHandler: Send + Sync {
	async fn handle(&self, remote: &HostPort, message: Message, outbound: &OutboundQueue);
}

/// Shared handle to a live peer connection (§3 Peer).
pub struct PeerConnection {
	pub remote: HostPort,
	pub was_outgoing: bool,
	state: AtomicU8,
	pub outbound: Arc<OutboundQueue>,
	last_inbound_at: Mutex<Instant>,
	last_outbound_at: Mutex<Instant>,
}

impl PeerConnection {
	pub fn state(&self) -> PeerState {
		self.state.load(Ordering::Acquire).into()
	}

	fn set_state(&self, state: PeerState) {
		self.state.store(state as u8, Ordering::Release);
	}

	pub fn close(&self) {
		self.set_state(PeerState::Closed);
		self.outbound.close();
	}
}

/// Spawns the fiber driving one peer connection.
///
/// `fallback_tx` fires with the peer list from a `CONNECTION_REFUSED`
/// if one arrives while dialing out, for §4.E's fallback search.
pub fn spawn(
	transport: Box<dyn Transport>,
	remote: HostPort,
	advertised: HostPort,
	was_outgoing: bool,
	registry: Arc<PeerRegistry>,
	handler: Arc<dyn InboundHandler>,
	config: ConfigWatch,
) -> (Arc<PeerConnection>, oneshot::Receiver<Vec<HostPort>>) {
	let now = Instant::now();
	let peer = Arc::new(PeerConnection {
		remote: remote.clone(),
		was_outgoing,
		state: AtomicU8::new(PeerState::Waiting as u8),
		outbound: Arc::new(OutboundQueue::new()),
		last_inbound_at: Mutex::new(now),
		last_outbound_at: Mutex::new(now),
	});
	let (fallback_tx, fallback_rx) = oneshot::channel();

	if was_outgoing {
		peer.outbound.push(Message::HandshakeRequest { host_port: advertised.clone() });
	}

	let task_peer = peer.clone();
	tokio::spawn(run(task_peer, transport, advertised, registry, handler, config, fallback_tx));

	(peer, fallback_rx)
}

async fn run(
	peer: Arc<PeerConnection>,
	mut transport: Box<dyn Transport>,
	advertised: HostPort,
	registry: Arc<PeerRegistry>,
	handler: Arc<dyn InboundHandler>,
	mut config: ConfigWatch,
	fallback_tx: oneshot::Sender<Vec<HostPort>>,
) {
	let mut fallback_tx = Some(fallback_tx);
	let mut sync_interval = config.borrow().sync_interval;
	let mut ticker = tokio::time::interval(std::time::Duration::from_secs(sync_interval.max(1)));
	let handshake_deadline = tokio::time::sleep(config.borrow().handshake_timeout());
	tokio::pin!(handshake_deadline);

	loop {
		tokio::select! {
			outgoing = peer.outbound.take() => {
				match outgoing {
					Some(message) => {
						if !transport.is_reliable() && message.expects_reply() {
							match send_with_retry(&mut transport, &message, &config).await {
								RetryOutcome::Replied(reply) => {
									*peer.last_outbound_at.lock().await = Instant::now();
									*peer.last_inbound_at.lock().await = Instant::now();
									if !dispatch(&peer, reply, &advertised, &registry, &handler, &mut fallback_tx, &mut transport).await {
										break;
									}
								}
								RetryOutcome::GaveUp => {
									info!("peer {}: no reply to {:?} after {} retries, closing",
										peer.remote, message.command(), config.borrow().udp_retries);
									break;
								}
								RetryOutcome::Io(e) => {
									debug!("peer {}: write failed: {}", peer.remote, e);
									break;
								}
							}
						} else if let Err(e) = transport.send(&message).await {
							debug!("peer {}: write failed: {}", peer.remote, e);
							break;
						} else {
							*peer.last_outbound_at.lock().await = Instant::now();
						}
					}
					None => break,
				}
			}
			incoming = transport.receive() => {
				match incoming {
					Ok(Some(message)) => {
						*peer.last_inbound_at.lock().await = Instant::now();
						if !dispatch(&peer, message, &advertised, &registry, &handler, &mut fallback_tx, &mut transport).await {
							break;
						}
					}
					Ok(None) => {
						debug!("peer {}: transport closed", peer.remote);
						break;
					}
					Err(e) => {
						warn!("peer {}: protocol error: {}", peer.remote, e);
						let _ = transport.send(&Message::InvalidProtocol { message: e.to_string() }).await;
						break;
					}
				}
			}
			_ = ticker.tick() => {
				let idle_out = peer.last_outbound_at.lock().await.elapsed();
				if idle_out >= std::time::Duration::from_secs(sync_interval) {
					peer.outbound.push_keepalive();
				}
				let idle_in = peer.last_inbound_at.lock().await.elapsed();
				if peer.state() == PeerState::Active && idle_in >= std::time::Duration::from_secs(sync_interval * 2) {
					info!("peer {}: idle for {:?}, closing as unreachable", peer.remote, idle_in);
					break;
				}
			}
			() = &mut handshake_deadline, if peer.state() == PeerState::Waiting => {
				info!("peer {}: handshake timed out", peer.remote);
				break;
			}
			_ = config.changed() => {
				sync_interval = config.borrow().sync_interval.max(1);
				ticker = tokio::time::interval(std::time::Duration::from_secs(sync_interval));
			}
		}
	}

	peer.close();
	registry.remove(&peer.remote);
}

enum RetryOutcome {
	Replied(Message),
	GaveUp,
	Io(std::io::Error),
}

/// Sends `message` over an unreliable transport, retransmitting with
/// exponential backoff (§4.G: `udpTimeout × 2^attempt`) until a reply
/// arrives or `udpRetries` attempts are exhausted.
async fn send_with_retry(transport: &mut Box<dyn Transport>, message: &Message, config: &ConfigWatch) -> RetryOutcome {
	let (mut timeout, retries) = config.borrow().udp_retry_budget();
	for attempt in 0..=retries {
		if let Err(e) = transport.send(message).await {
			return RetryOutcome::Io(e);
		}
		match tokio::time::timeout(timeout, transport.receive()).await {
			Ok(Ok(Some(reply))) => return RetryOutcome::Replied(reply),
			Ok(Ok(None)) => return RetryOutcome::GaveUp,
			Ok(Err(e)) => warn!("datagram reply on attempt {}: {}", attempt, e),
			Err(_) => debug!("no reply on attempt {}, retrying", attempt),
		}
		timeout *= 2;
	}
	RetryOutcome::GaveUp
}

/// Applies one inbound message to peer state; returns `false` if the
/// connection should close.
async fn dispatch(
	peer: &Arc<PeerConnection>,
	message: Message,
	advertised: &HostPort,
	registry: &Arc<PeerRegistry>,
	handler: &Arc<dyn InboundHandler>,
	fallback_tx: &mut Option<oneshot::Sender<Vec<HostPort>>>,
	transport: &mut Box<dyn Transport>,
) -> bool {
	match peer.state() {
		PeerState::Closed => false,
		PeerState::Waiting => match message {
			Message::HandshakeRequest { .. } if !peer.was_outgoing => {
				if registry.has_room_for_incoming() {
					peer.outbound.push(Message::HandshakeResponse { host_port: advertised.clone() });
					peer.state.store(PeerState::Active as u8, Ordering::Release);
					registry.mark_active(&peer.remote);
					true
				} else {
					// The outbound queue is only drained by the same select!
					// loop that is about to exit, so the refusal must go out
					// on the transport directly or it would never be sent.
					let peers = registry.active_peer_list();
					let refusal = Message::ConnectionRefused { message: "registry full".to_string(), peers };
					if let Err(e) = transport.send(&refusal).await {
						debug!("peer {}: failed to send CONNECTION_REFUSED: {}", peer.remote, e);
					}
					false
				}
			}
			Message::HandshakeResponse { .. } if peer.was_outgoing => {
				peer.state.store(PeerState::Active as u8, Ordering::Release);
				registry.mark_active(&peer.remote);
				true
			}
			Message::ConnectionRefused { peers, .. } if peer.was_outgoing => {
				if let Some(tx) = fallback_tx.take() {
					let _ = tx.send(peers);
				}
				false
			}
			other => {
				warn!("peer {}: unexpected message {:?} while WAITING", peer.remote, other.command());
				false
			}
		},
		PeerState::Active => match message {
			Message::KeepAlive => true,
			Message::InvalidProtocol { message } => {
				warn!("peer {} reported INVALID_PROTOCOL: {}", peer.remote, message);
				false
			}
			other => {
				handler.handle(&peer.remote, other, &peer.outbound).await;
				true
			}
		},
	}
}

// vim: ts=4
