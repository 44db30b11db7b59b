//! # BitBox - Peer-to-Peer File Synchronization
//!
//! BitBox watches a directory, detects changes, and propagates them to
//! a mesh of peers over a line-delimited JSON protocol, pulling file
//! content in fixed-size byte ranges. An authenticated client channel
//! lets an operator list and manage a node's peer connections.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bitbox::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new("bitbox.toml".into(), "./shared".into()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod client;
pub mod config;
pub mod crypto;
pub mod detector;
pub mod error;
pub mod fs_tree;
pub mod logging;
pub mod peer;
pub mod protocol;
pub mod server;
pub mod sync_engine;
pub mod transport;
pub mod types;
pub mod validation;

// Re-export commonly used types and functions
pub use config::Config;
pub use error::BitBoxError;
pub use fs_tree::FileTree;
pub use peer::PeerRegistry;
pub use server::Server;
pub use sync_engine::SyncEngine;
pub use types::{FileDescriptor, HostPort};

// vim: ts=4
