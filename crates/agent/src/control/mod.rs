//! Agent session state & framing: the duplex control channel with the
//! local server.

pub mod channel;
pub mod handlers;
pub mod pending;
