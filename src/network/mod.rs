//! Duplex session transport

pub mod connection;
pub mod multiplexer;
pub mod state;

pub use connection::{connect, ConnectionWriter, WsStream};
pub use multiplexer::ProtocolMultiplexer;
pub use state::ConversationState;
