use super::events::TorrentEvent;
use super::registry::SessionRegistry;
use crate::config::EngineConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::metainfo::TorrentMetadata;
use crate::peer::{Bitfield, Message};
use crate::stats::TransferMonitor;
use crate::storage::BlockStore;
use crate::strategy::PieceStrategist;
use crate::torrent::TorrentError;
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// State shared by every session, timer and the transfer mode of a torrent.
pub struct TorrentContext {
    config: EngineConfig,
    metadata: Arc<TorrentMetadata>,
    store: BlockStore,
    strategist: PieceStrategist,
    registry: SessionRegistry,
    monitor: Arc<TransferMonitor>,
    verified: RwLock<Bitfield>,
    events: broadcast::Sender<TorrentEvent>,
    started: AtomicBool,
    stopping: AtomicBool,
    stop_tx: watch::Sender<bool>,
    connecting: DashSet<SocketAddr>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TorrentContext {
    pub(crate) fn new(
        metadata: Arc<TorrentMetadata>,
        config: EngineConfig,
    ) -> Result<Self, TorrentError> {
        let monitor = Arc::new(TransferMonitor::new());
        let store = BlockStore::with_monitor(config.download_dir.clone(), metadata.clone(), monitor.clone())?;
        let strategist = PieceStrategist::new(metadata.clone(), config.block_size)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            registry: SessionRegistry::new(config.max_peers),
            verified: RwLock::new(Bitfield::new(metadata.piece_count() as usize)),
            config,
            metadata,
            store,
            strategist,
            monitor,
            events,
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            stop_tx,
            connecting: DashSet::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<TorrentMetadata> {
        &self.metadata
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn strategist(&self) -> &PieceStrategist {
        &self.strategist
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<TransferMonitor> {
        &self.monitor
    }

    pub fn emit(&self, event: TorrentEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TorrentEvent> {
        self.events.subscribe()
    }

    /// Queues a message for every connected peer.
    pub fn broadcast(&self, message: &Message) {
        self.registry.broadcast(message);
    }

    /// Records a piece as verified on disk. Returns false if it already was.
    pub fn mark_verified(&self, piece: u32) -> bool {
        let mut verified = self.verified.write();
        if verified.has_piece(piece as usize) {
            return false;
        }
        verified.set_piece(piece as usize);
        true
    }

    pub fn is_verified(&self, piece: u32) -> bool {
        self.verified.read().has_piece(piece as usize)
    }

    /// Pieces we can serve.
    pub fn verified(&self) -> Bitfield {
        self.verified.read().clone()
    }

    pub fn verified_count(&self) -> usize {
        self.verified.read().count()
    }

    pub fn is_seeding(&self) -> bool {
        self.verified.read().is_complete()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn begin_stop(&self) -> bool {
        let first = !self.stopping.swap(true, Ordering::AcqRel);
        if first {
            self.stop_tx.send_replace(true);
        }
        first
    }

    pub(crate) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Claims `addr` for an outbound connection. False if one is in progress.
    pub(crate) fn claim_endpoint(&self, addr: SocketAddr) -> bool {
        self.connecting.insert(addr)
    }

    pub(crate) fn release_endpoint(&self, addr: &SocketAddr) {
        self.connecting.remove(addr);
    }

    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    pub(crate) fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.tasks.lock())
    }
}

/// Resolves once `stop` carries `true`, including when it already did
/// before the receiver was created.
pub(crate) async fn wait_stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
