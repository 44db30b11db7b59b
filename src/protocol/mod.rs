//! Message codec: wire types (§4.C) plus line-delimited JSON framing.

pub mod codec;
pub mod messages;

pub use codec::{read_message, write_message};
pub use messages::Message;

// vim: ts=4
