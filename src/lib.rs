//! rswarm - A BitTorrent peer-wire engine
//!
//! This library moves torrent data between peers: it speaks the BEP-3 peer
//! wire protocol, picks blocks to request, writes and reads them through a
//! dedicated disk thread, verifies pieces and serves verified data back.
//! Metainfo parsing, trackers and peer discovery are left to the host
//! application, which plugs in through [`TorrentMetadata`] and [`Tracker`].
//!
//! # Modules
//!
//! - [`config`] - Engine configuration
//! - [`constants`] - Protocol constants and defaults
//! - [`metainfo`] - Validated torrent metadata and info hashes
//! - [`peer`] - BEP-3 peer wire protocol, framed transport and session state
//! - [`stats`] - Transfer counters and rate windows
//! - [`storage`] - Block addressing and disk I/O
//! - [`strategy`] - Block selection and download progress
//! - [`torrent`] - Sessions, transfer modes and the torrent lifecycle
//! - [`tracker`] - Tracker collaborator interface

pub mod config;
pub mod constants;
pub mod metainfo;
pub mod peer;
pub mod stats;
pub mod storage;
pub mod strategy;
pub mod torrent;
pub mod tracker;

pub use config::EngineConfig;
pub use metainfo::{FileEntry, InfoHash, MetainfoError, TorrentMetadata};
pub use peer::{
    Bitfield, Block, BlockAddress, ChokingState, Handshake, Message, PeerError, PeerId,
    PeerSession, PeerTransport,
};
pub use stats::{RateWindow, TransferMonitor, TransferSnapshot};
pub use storage::{BlockStore, DiskIoEngine, StorageError};
pub use strategy::PieceStrategist;
pub use torrent::{
    DownloadMode, SeedMode, SessionLink, Torrent, TorrentError, TorrentEvent, TransferMode,
};
pub use tracker::{AnnounceRequest, AnnounceResponse, StaticTracker, Tracker, TrackerError, TrackerEvent};
