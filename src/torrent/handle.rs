use super::context::TorrentContext;
use super::driver;
use super::events::TorrentEvent;
use super::mode::TransferMode;
use super::TorrentError;
use crate::config::EngineConfig;
use crate::metainfo::{InfoHash, TorrentMetadata};
use crate::peer::Bitfield;
use crate::stats::TransferSnapshot;
use crate::tracker::Tracker;
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// A running torrent.
///
/// The transfer mode decides what happens with peers: [`DownloadMode`]
/// fetches missing pieces, [`SeedMode`] only serves.
///
/// [`DownloadMode`]: super::DownloadMode
/// [`SeedMode`]: super::SeedMode
pub struct Torrent<M: TransferMode> {
    ctx: Arc<TorrentContext>,
    mode: Arc<M>,
}

impl<M: TransferMode> Torrent<M> {
    /// Creates a torrent writing under `config.download_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the block size does not fit the piece length or
    /// the storage layout is invalid.
    pub fn new(
        metadata: Arc<TorrentMetadata>,
        config: EngineConfig,
        mode: M,
    ) -> Result<Self, TorrentError> {
        let ctx = TorrentContext::new(metadata, config)?;
        Ok(Self {
            ctx: Arc::new(ctx),
            mode: Arc::new(mode),
        })
    }

    /// Verifies existing data and starts the choker.
    pub async fn start(&self) -> Result<(), TorrentError> {
        if self.ctx.is_stopping() {
            return Err(TorrentError::Stopped);
        }
        if !self.ctx.mark_started() {
            return Err(TorrentError::AlreadyStarted);
        }

        info!(
            "Starting torrent {} ({} pieces, {} bytes)",
            self.info_hash(),
            self.ctx.metadata().piece_count(),
            self.ctx.metadata().total_length()
        );
        self.mode.on_start(&self.ctx).await?;
        driver::spawn_choker(&self.ctx);
        Ok(())
    }

    /// Starts the torrent and announces to `tracker` for peers.
    pub async fn start_with_tracker<T: Tracker>(&self, tracker: Arc<T>) -> Result<(), TorrentError> {
        self.start().await?;
        driver::spawn_tracker(&self.ctx, &self.mode, tracker);
        Ok(())
    }

    /// Accepts incoming peers on `addr`. Returns the bound address.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, TorrentError> {
        if self.ctx.is_stopping() {
            return Err(TorrentError::Stopped);
        }
        driver::listen(&self.ctx, &self.mode, addr).await
    }

    /// Connects to a peer, reconnecting with backoff if the connection drops.
    pub fn connect(&self, addr: SocketAddr) -> Result<(), TorrentError> {
        if self.ctx.is_stopping() {
            return Err(TorrentError::Stopped);
        }
        debug!("Adding peer {}", addr);
        driver::spawn_outbound(&self.ctx, &self.mode, addr);
        Ok(())
    }

    /// Closes every session, waits for background tasks and releases files.
    ///
    /// Calling this more than once is a no-op.
    pub async fn stop(&self) {
        if !self.ctx.begin_stop() {
            return;
        }
        info!("Stopping torrent {}", self.info_hash());

        self.mode.on_stop(&self.ctx).await;
        self.ctx.registry().clear();
        join_all(self.ctx.take_tasks()).await;
        self.ctx.store().close().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TorrentEvent> {
        self.ctx.subscribe()
    }

    pub fn info_hash(&self) -> InfoHash {
        *self.ctx.metadata().info_hash()
    }

    pub fn metadata(&self) -> &Arc<TorrentMetadata> {
        self.ctx.metadata()
    }

    pub fn mode(&self) -> &M {
        &self.mode
    }

    pub fn context(&self) -> &Arc<TorrentContext> {
        &self.ctx
    }

    /// Pieces verified on disk.
    pub fn verified(&self) -> Bitfield {
        self.ctx.verified()
    }

    pub fn is_complete(&self) -> bool {
        self.ctx.is_seeding()
    }

    pub fn peer_count(&self) -> usize {
        self.ctx.registry().len()
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.ctx.strategist().remaining_bytes()
    }

    pub fn transfer(&self) -> TransferSnapshot {
        self.ctx.monitor().snapshot()
    }
}
