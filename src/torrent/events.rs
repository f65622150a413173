use crate::peer::PeerId;
use std::net::SocketAddr;

/// Notifications published by a running torrent.
///
/// Delivered over a broadcast channel; see
/// [`Torrent::subscribe`](super::Torrent::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentEvent {
    PeerConnected { addr: SocketAddr, peer_id: PeerId },
    PeerDisconnected { addr: SocketAddr },
    /// A piece was written and passed hash verification.
    PieceCompleted(u32),
    /// A fully received piece failed verification and will be downloaded again.
    PieceHashFailed(u32),
    /// Every piece is verified. Published once.
    Completed,
    /// A non-fatal failure, such as a disk error or a tracker outage.
    Error(String),
}
