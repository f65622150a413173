//! Torrent orchestration.
//!
//! A [`Torrent`] ties the pieces together: a [`BlockStore`] for disk I/O, a
//! [`PieceStrategist`] for block selection, a [`SessionRegistry`] of
//! connected peers and a [`TransferMode`] that decides what to do with them.
//!
//! Every peer connection is owned by its own task. Other tasks talk to it
//! by sending [`Command`]s through the registry; the owning task is the only
//! writer on the socket.
//!
//! # Examples
//!
//! ```no_run
//! use rswarm::config::EngineConfig;
//! use rswarm::metainfo::TorrentMetadata;
//! use rswarm::torrent::{DownloadMode, Torrent, TorrentEvent};
//! use std::sync::Arc;
//!
//! # async fn example(metadata: Arc<TorrentMetadata>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default().with_download_dir("./downloads");
//! let torrent = Torrent::new(metadata, config, DownloadMode::new())?;
//! let mut events = torrent.subscribe();
//!
//! torrent.start().await?;
//! torrent.connect("127.0.0.1:6881".parse()?)?;
//!
//! while let Ok(event) = events.recv().await {
//!     if event == TorrentEvent::Completed {
//!         break;
//!     }
//! }
//! torrent.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`BlockStore`]: crate::storage::BlockStore
//! [`PieceStrategist`]: crate::strategy::PieceStrategist

mod choker;
mod context;
mod driver;
mod error;
mod events;
mod handle;
mod mode;
mod registry;

pub use choker::Choker;
pub use context::TorrentContext;
pub use error::TorrentError;
pub use events::TorrentEvent;
pub use handle::Torrent;
pub use mode::{serve_request, DownloadMode, SeedMode, SessionLink, TransferMode};
pub use registry::{Command, PeerStats, SessionId, SessionRegistry};
