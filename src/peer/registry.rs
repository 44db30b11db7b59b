//! Peer registry (§3 PeerRegistry, §4.E)
//!
//! Guarded by a single critical section (§5); all membership
//! operations acquire the same lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::logging::*;
use crate::peer::connection::{PeerConnection, PeerState};
use crate::types::HostPort;

struct Inner {
	peers: HashMap<HostPort, Arc<PeerConnection>>,
	/// Peers that have already been tried as a fallback target this
	/// session, so `tryFallback` does not loop on a dead peer (§4.E).
	failed_fallbacks: std::collections::HashSet<HostPort>,
}

pub struct PeerRegistry {
	inner: Mutex<Inner>,
	maximum_incoming_connections: Mutex<usize>,
}

impl PeerRegistry {
	pub fn new(maximum_incoming_connections: usize) -> PeerRegistry {
		PeerRegistry {
			inner: Mutex::new(Inner { peers: HashMap::new(), failed_fallbacks: Default::default() }),
			maximum_incoming_connections: Mutex::new(maximum_incoming_connections),
		}
	}

	pub fn set_maximum_incoming_connections(&self, n: usize) {
		*self.maximum_incoming_connections.lock().unwrap() = n;
	}

	fn active_incoming_count(inner: &Inner) -> usize {
		inner.peers.values().filter(|p| !p.was_outgoing && p.state() == PeerState::Active).count()
	}

	/// True if accepting one more incoming handshake would not exceed
	/// `maximumIncomingConnections`.
	pub fn has_room_for_incoming(&self) -> bool {
		let inner = self.inner.lock().unwrap();
		let cap = *self.maximum_incoming_connections.lock().unwrap();
		Self::active_incoming_count(&inner) < cap
	}

	pub fn add_incoming(&self, peer: Arc<PeerConnection>) {
		let mut inner = self.inner.lock().unwrap();
		inner.peers.insert(peer.remote.clone(), peer);
	}

	pub fn add_outgoing(&self, peer: Arc<PeerConnection>) {
		let mut inner = self.inner.lock().unwrap();
		inner.peers.insert(peer.remote.clone(), peer);
	}

	pub fn mark_active(&self, remote: &HostPort) {
		debug!("peer {} is now ACTIVE", remote);
	}

	pub fn remove(&self, remote: &HostPort) {
		let mut inner = self.inner.lock().unwrap();
		inner.peers.remove(remote);
	}

	pub fn contains(&self, remote: &HostPort) -> bool {
		self.inner.lock().unwrap().peers.contains_key(remote)
	}

	pub fn get(&self, remote: &HostPort) -> Option<Arc<PeerConnection>> {
		self.inner.lock().unwrap().peers.get(remote).cloned()
	}

	/// `getActive` (§4.E): every peer currently in the `ACTIVE` state.
	pub fn get_active(&self) -> Vec<Arc<PeerConnection>> {
		self.inner
			.lock()
			.unwrap()
			.peers
			.values()
			.filter(|p| p.state() == PeerState::Active)
			.cloned()
			.collect()
	}

	pub fn active_peer_list(&self) -> Vec<HostPort> {
		self.get_active().into_iter().map(|p| p.remote.clone()).collect()
	}

	/// Picks the next candidate from a `CONNECTION_REFUSED` peer list
	/// that is not already present and has not failed before this
	/// session; the caller dials it and reports the outcome with
	/// [`PeerRegistry::record_fallback_result`].
	pub fn next_fallback_candidate(&self, peer_list: &[HostPort]) -> Option<HostPort> {
		let inner = self.inner.lock().unwrap();
		peer_list
			.iter()
			.find(|p| !inner.peers.contains_key(p) && !inner.failed_fallbacks.contains(p))
			.cloned()
	}

	pub fn record_fallback_result(&self, candidate: HostPort, succeeded: bool) {
		if !succeeded {
			self.inner.lock().unwrap().failed_fallbacks.insert(candidate);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fallback_skips_present_and_failed_peers() {
		let registry = PeerRegistry::new(4);
		let a = HostPort::new("a", 1);
		let b = HostPort::new("b", 2);
		let c = HostPort::new("c", 3);
		registry.record_fallback_result(a.clone(), false);
		let candidate = registry.next_fallback_candidate(&[a, b.clone(), c]);
		assert_eq!(candidate, Some(b));
	}

	#[test]
	fn room_check_respects_cap() {
		let registry = PeerRegistry::new(0);
		assert!(!registry.has_room_for_incoming());
		registry.set_maximum_incoming_connections(1);
		assert!(registry.has_room_for_incoming());
	}
}

// vim: ts=4
