//! Peer wire protocol (BEP-3)
//!
//! This module implements the base BitTorrent peer wire protocol: the
//! handshake, the ten length-prefixed message types plus keep-alive, the
//! framed TCP transport and the per-connection session state.

mod bitfield;
mod error;
mod message;
mod peer_id;
mod piece;
mod session;
mod transport;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN};
pub use peer_id::PeerId;
pub use piece::{Block, BlockAddress};
pub use session::{ChokingState, PeerSession, SessionState};
pub use transport::PeerTransport;

#[cfg(test)]
mod tests;
