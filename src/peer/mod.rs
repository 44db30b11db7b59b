//! Peer connection lifecycle (§3 Peer/PeerRegistry, §4.D/§4.E)

pub mod connection;
pub mod outbound_queue;
pub mod registry;

pub use connection::{InboundHandler, PeerConnection, PeerState};
pub use outbound_queue::OutboundQueue;
pub use registry::PeerRegistry;

// vim: ts=4
