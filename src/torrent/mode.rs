use super::context::TorrentContext;
use super::events::TorrentEvent;
use super::registry::{Command, SessionId};
use crate::constants::PROGRESS_LOG_INTERVAL;
use crate::peer::{Block, BlockAddress, Message, PeerSession};
use crate::torrent::TorrentError;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

/// A session as seen by a transfer mode.
///
/// Messages queued with [`send`](Self::send) are written by the session
/// task, in order, once the handler returns.
pub struct SessionLink<'a> {
    id: SessionId,
    session: &'a mut PeerSession,
    outgoing: Vec<Message>,
}

impl<'a> SessionLink<'a> {
    pub(crate) fn new(id: SessionId, session: &'a mut PeerSession) -> Self {
        Self {
            id,
            session,
            outgoing: Vec::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn session(&self) -> &PeerSession {
        &*self.session
    }

    pub fn session_mut(&mut self) -> &mut PeerSession {
        &mut *self.session
    }

    pub fn send(&mut self, message: Message) {
        self.outgoing.push(message);
    }

    pub(crate) fn take_outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }
}

/// What a torrent does with its peers.
///
/// The driver updates session state for every message and then calls into
/// the mode. Handlers are no-ops unless a mode overrides them, except
/// [`handle_request`](Self::handle_request), which serves verified data.
pub trait TransferMode: Send + Sync + 'static {
    /// Runs once when the torrent starts, before any session is admitted.
    fn on_start(&self, ctx: &TorrentContext) -> impl Future<Output = Result<(), TorrentError>> + Send;

    fn on_stop(&self, _ctx: &TorrentContext) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Called when a session leaves the registry.
    fn on_disconnect(&self, _ctx: &TorrentContext, _link: &mut SessionLink<'_>) {}

    fn handle_bitfield(
        &self,
        _ctx: &TorrentContext,
        _link: &mut SessionLink<'_>,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn handle_have(
        &self,
        _ctx: &TorrentContext,
        _link: &mut SessionLink<'_>,
        _piece: u32,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn handle_unchoke(
        &self,
        _ctx: &TorrentContext,
        _link: &mut SessionLink<'_>,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn handle_choke(
        &self,
        _ctx: &TorrentContext,
        _link: &mut SessionLink<'_>,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn handle_piece(
        &self,
        _ctx: &TorrentContext,
        _link: &mut SessionLink<'_>,
        _block: Block,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn handle_request(
        &self,
        ctx: &TorrentContext,
        link: &mut SessionLink<'_>,
        block: BlockAddress,
    ) -> impl Future<Output = ()> + Send {
        serve_request(ctx, link, block)
    }
}

/// Reads a requested block and queues it for the peer.
///
/// Requests are only served while the peer is unchoked, for pieces we have
/// verified, and up to the configured maximum request length.
pub async fn serve_request(ctx: &TorrentContext, link: &mut SessionLink<'_>, block: BlockAddress) {
    if ctx.is_stopping() || link.session().choking.am_choking {
        return;
    }
    if block.length == 0 || block.length > ctx.config().max_request_length {
        debug!(
            "Ignoring request {}:{}+{} from {}",
            block.piece_index,
            block.offset,
            block.length,
            link.session().addr
        );
        return;
    }
    if !ctx.is_verified(block.piece_index) {
        return;
    }

    match ctx
        .store()
        .get_block(block.piece_index, block.offset, block.length)
        .await
    {
        Ok(data) => {
            let len = data.len() as u64;
            link.session_mut().record_upload(len);
            ctx.monitor().add_sent(len);
            link.send(Message::Piece {
                index: block.piece_index,
                begin: block.offset,
                data,
            });
        }
        Err(e) => {
            warn!(
                "Failed to read block {}:{} for {}: {}",
                block.piece_index,
                block.offset,
                link.session().addr,
                e
            );
            ctx.emit(TorrentEvent::Error(format!(
                "read of piece {} failed: {}",
                block.piece_index, e
            )));
        }
    }
}

/// Marks every piece already valid on disk. Returns how many there were.
async fn resume(ctx: &TorrentContext) -> Result<usize, TorrentError> {
    let valid = ctx.store().verify_all().await?;
    let mut count = 0;
    for (piece, ok) in valid.into_iter().enumerate() {
        if ok {
            ctx.strategist().mark_piece_complete(piece as u32);
            ctx.mark_verified(piece as u32);
            count += 1;
        }
    }
    Ok(count)
}

/// Downloads missing pieces and serves verified ones.
pub struct DownloadMode {
    in_flight: DashMap<BlockAddress, Vec<SessionId>>,
    written: DashMap<u32, u64>,
    completed: AtomicBool,
}

impl DownloadMode {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            written: DashMap::new(),
            completed: AtomicBool::new(false),
        }
    }

    /// Number of distinct blocks currently requested from some peer.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn update_interest(&self, ctx: &TorrentContext, link: &mut SessionLink<'_>) {
        let session = link.session_mut();
        if !session.choking.am_interested && ctx.strategist().wants_any(&session.bitfield) {
            session.choking.am_interested = true;
            link.send(Message::Interested);
        }
    }

    /// Tops the session's request queue up to the configured depth.
    ///
    /// Outside endgame a block already requested from another peer is
    /// skipped. In endgame any pending block may be requested again.
    fn fill_requests(&self, ctx: &TorrentContext, link: &mut SessionLink<'_>) {
        if ctx.is_stopping() || !link.session().can_request() {
            return;
        }

        let depth = ctx.config().request_queue_depth;
        let endgame = ctx.strategist().is_endgame();
        let id = link.id();

        while link.session().pending_count() < depth {
            let session = link.session();
            let next = ctx.strategist().pick(&session.bitfield, |block| {
                if endgame {
                    !session.has_request(block)
                } else {
                    !self.in_flight.contains_key(block)
                }
            });
            let Some(block) = next else {
                break;
            };

            link.session_mut().add_request(block);
            self.in_flight.entry(block).or_default().push(id);
            link.send(Message::request(block));
        }
    }

    fn forget(&self, id: SessionId, block: &BlockAddress) {
        if let Some(mut requesters) = self.in_flight.get_mut(block) {
            requesters.retain(|other| *other != id);
        }
        self.in_flight.remove_if(block, |_, requesters| requesters.is_empty());
    }

    fn drop_requests(&self, link: &mut SessionLink<'_>) {
        let id = link.id();
        for block in link.session_mut().take_requests() {
            self.forget(id, &block);
        }
    }

    async fn verify(&self, ctx: &TorrentContext, piece: u32) {
        match ctx.store().verify_piece(piece).await {
            Ok(true) => {
                if !ctx.mark_verified(piece) {
                    return;
                }
                ctx.broadcast(&Message::Have { piece });
                ctx.emit(TorrentEvent::PieceCompleted(piece));

                let verified = ctx.verified_count();
                if verified as u32 % PROGRESS_LOG_INTERVAL == 0 {
                    info!(
                        "Progress: {}/{} pieces",
                        verified,
                        ctx.metadata().piece_count()
                    );
                } else {
                    debug!("Piece {} verified", piece);
                }
                self.check_complete(ctx);
            }
            Ok(false) => {
                warn!("Piece {} failed hash check", piece);
                ctx.strategist().reset_piece(piece);
                ctx.emit(TorrentEvent::PieceHashFailed(piece));
            }
            Err(e) => {
                warn!("Failed to verify piece {}: {}", piece, e);
                ctx.strategist().reset_piece(piece);
                ctx.emit(TorrentEvent::PieceHashFailed(piece));
                ctx.emit(TorrentEvent::Error(format!(
                    "verification of piece {} failed: {}",
                    piece, e
                )));
            }
        }
    }

    fn check_complete(&self, ctx: &TorrentContext) {
        if !ctx.is_seeding() || self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            "Download complete: {} pieces, {} bytes",
            ctx.metadata().piece_count(),
            ctx.metadata().total_length()
        );
        ctx.emit(TorrentEvent::Completed);
        ctx.registry()
            .broadcast_command(&Command::SetInterested(false));
    }
}

impl Default for DownloadMode {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferMode for DownloadMode {
    async fn on_start(&self, ctx: &TorrentContext) -> Result<(), TorrentError> {
        let resumed = resume(ctx).await?;
        if resumed > 0 {
            info!(
                "Resuming with {}/{} pieces on disk",
                resumed,
                ctx.metadata().piece_count()
            );
        }
        self.check_complete(ctx);
        Ok(())
    }

    async fn on_stop(&self, _ctx: &TorrentContext) {
        self.in_flight.clear();
        self.written.clear();
    }

    fn on_disconnect(&self, _ctx: &TorrentContext, link: &mut SessionLink<'_>) {
        self.drop_requests(link);
    }

    async fn handle_bitfield(&self, ctx: &TorrentContext, link: &mut SessionLink<'_>) {
        self.update_interest(ctx, link);
        self.fill_requests(ctx, link);
    }

    async fn handle_have(&self, ctx: &TorrentContext, link: &mut SessionLink<'_>, _piece: u32) {
        self.update_interest(ctx, link);
        self.fill_requests(ctx, link);
    }

    async fn handle_unchoke(&self, ctx: &TorrentContext, link: &mut SessionLink<'_>) {
        self.update_interest(ctx, link);
        self.fill_requests(ctx, link);
        self.check_complete(ctx);
    }

    async fn handle_choke(&self, _ctx: &TorrentContext, link: &mut SessionLink<'_>) {
        self.drop_requests(link);
    }

    async fn handle_piece(&self, ctx: &TorrentContext, link: &mut SessionLink<'_>, block: Block) {
        if ctx.is_stopping() {
            return;
        }

        let addr = block.address();
        let id = link.id();
        link.session_mut().remove_request(&addr);
        let requesters = self
            .in_flight
            .remove(&addr)
            .map(|(_, ids)| ids)
            .unwrap_or_default();

        if !ctx.strategist().received(&addr) {
            trace!(
                "Ignoring block {}:{} from {}",
                addr.piece_index,
                addr.offset,
                link.session().addr
            );
            self.fill_requests(ctx, link);
            return;
        }

        for other in requesters.into_iter().filter(|other| *other != id) {
            ctx.registry().send(other, Command::Cancel(addr));
        }

        if let Err(e) = ctx.store().add_block(&block).await {
            warn!(
                "Failed to write block {}:{}: {}",
                addr.piece_index, addr.offset, e
            );
            ctx.strategist().release(&addr);
            ctx.emit(TorrentEvent::Error(format!(
                "write of piece {} failed: {}",
                addr.piece_index, e
            )));
            return;
        }

        let piece = addr.piece_index;
        let piece_size = ctx.metadata().piece_size(piece) as u64;
        let written = {
            let mut written = self.written.entry(piece).or_insert(0);
            *written += addr.length as u64;
            *written
        };

        if written >= piece_size {
            self.written.remove(&piece);
            self.verify(ctx, piece).await;
        }

        self.fill_requests(ctx, link);
    }
}

/// Serves verified pieces and never requests.
#[derive(Debug, Default)]
pub struct SeedMode;

impl SeedMode {
    pub fn new() -> Self {
        Self
    }
}

impl TransferMode for SeedMode {
    async fn on_start(&self, ctx: &TorrentContext) -> Result<(), TorrentError> {
        let verified = resume(ctx).await?;
        let total = ctx.metadata().piece_count() as usize;
        if verified < total {
            warn!("Seeding with only {}/{} pieces verified", verified, total);
        } else {
            info!("Seeding {} pieces", total);
        }
        Ok(())
    }
}
