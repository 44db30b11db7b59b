//! Authenticated client control channel (§3 ClientSession, §4.H, §6)

pub mod channel;
pub mod cli;
pub mod openssh;

pub use channel::{handle_connection, DialRequest};

// vim: ts=4
