use thiserror::Error;

/// Errors that can occur during peer communication.
///
/// All of these are local to one session: the session is closed and, for
/// outbound peers, a reconnect may be scheduled.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent an invalid handshake.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer's info hash doesn't match ours.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// The handshake carried our own peer id.
    #[error("connected to self")]
    SelfConnection,

    /// Received an unknown message ID.
    #[error("unknown message id: {0}")]
    UnknownMessage(u8),

    /// A message payload had the wrong size for its type.
    #[error("invalid length for message {id}: expected {expected}, got {actual}")]
    InvalidLength {
        id: u8,
        expected: usize,
        actual: usize,
    },

    /// The length prefix exceeds the frame size we accept.
    #[error("message too large: {0}")]
    MessageTooLarge(usize),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation timed out.
    #[error("timeout")]
    Timeout,

    /// Protocol violation by the peer.
    #[error("protocol error: {0}")]
    Protocol(String),
}
