use crate::metainfo::MetainfoError;
use crate::peer::PeerError;
use crate::storage::StorageError;
use crate::tracker::TrackerError;
use thiserror::Error;

/// Errors from constructing and controlling a torrent transfer.
#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocks must tile pieces exactly.
    #[error("block size {block_size} does not divide piece length {piece_length}")]
    InvalidBlockSize { block_size: u32, piece_length: u32 },

    #[error("torrent already started")]
    AlreadyStarted,

    #[error("torrent stopped")]
    Stopped,
}
