use super::bitfield::Bitfield;
use super::error::PeerError;
use super::message::{Handshake, Message};
use super::peer_id::PeerId;
use super::piece::BlockAddress;
use super::transport::PeerTransport;
use crate::metainfo::InfoHash;
use crate::stats::RateWindow;
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::trace;

/// Where a session is in its lifecycle.
///
/// The two handshake states may be visited in either order depending on
/// who connected to whom; a session is `Active` once both handshakes have
/// crossed the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HandshakeSent,
    HandshakeReceived,
    Active,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokingState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for ChokingState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// Protocol state of one peer connection.
///
/// Owned by the task driving the connection; nothing else mutates it.
#[derive(Debug)]
pub struct PeerSession {
    /// The peer's socket address.
    pub addr: SocketAddr,
    /// The peer's ID, once its handshake arrived.
    pub peer_id: Option<PeerId>,
    /// Choke and interest flags in both directions.
    pub choking: ChokingState,
    /// Pieces the peer has announced.
    pub bitfield: Bitfield,
    /// Total block bytes received from this peer.
    pub downloaded: u64,
    /// Total block bytes sent to this peer.
    pub uploaded: u64,
    state: SessionState,
    outbound: bool,
    sent_handshake: bool,
    received_handshake: bool,
    pending: HashSet<BlockAddress>,
    uploads: VecDeque<BlockAddress>,
    download_rate: RateWindow,
    upload_rate: RateWindow,
    connected_at: Instant,
}

impl PeerSession {
    pub fn new(addr: SocketAddr, piece_count: u32, outbound: bool) -> Self {
        Self {
            addr,
            peer_id: None,
            choking: ChokingState::default(),
            bitfield: Bitfield::new(piece_count as usize),
            downloaded: 0,
            uploaded: 0,
            state: SessionState::Connecting,
            outbound,
            sent_handshake: false,
            received_handshake: false,
            pending: HashSet::new(),
            uploads: VecDeque::new(),
            download_rate: RateWindow::new(),
            upload_rate: RateWindow::new(),
            connected_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn mark_handshake_sent(&mut self) {
        self.sent_handshake = true;
        self.advance(SessionState::HandshakeSent);
    }

    pub fn mark_handshake_received(&mut self, peer_id: PeerId) {
        self.received_handshake = true;
        self.peer_id = Some(peer_id);
        self.advance(SessionState::HandshakeReceived);
    }

    fn advance(&mut self, next: SessionState) {
        if self.state == SessionState::Closing {
            return;
        }
        self.state = if self.sent_handshake && self.received_handshake {
            SessionState::Active
        } else {
            next
        };
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closing;
    }

    /// Runs the handshake exchange over `transport`.
    ///
    /// Outbound sessions send first. Inbound sessions wait for the peer's
    /// handshake and answer it. Returns the remote peer id once the session
    /// is active.
    pub async fn handshake(
        &mut self,
        transport: &mut PeerTransport,
        info_hash: InfoHash,
        our_id: PeerId,
    ) -> Result<PeerId, PeerError> {
        let ours = Handshake::new(info_hash, our_id);

        if self.outbound {
            transport.send_handshake(&ours).await?;
            self.mark_handshake_sent();
        }

        let theirs = transport.receive_handshake().await?;
        if theirs.info_hash != info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        if theirs.peer_id == our_id {
            return Err(PeerError::SelfConnection);
        }
        self.mark_handshake_received(theirs.peer_id);

        if !self.sent_handshake {
            transport.send_handshake(&ours).await?;
            self.mark_handshake_sent();
        }

        trace!("Handshake with {} complete ({:?})", self.addr, theirs.peer_id);
        Ok(theirs.peer_id)
    }

    /// Applies the session-level effect of an incoming message.
    pub fn apply(&mut self, message: &Message) -> Result<(), PeerError> {
        match message {
            Message::Choke => self.choking.peer_choking = true,
            Message::Unchoke => self.choking.peer_choking = false,
            Message::Interested => self.choking.peer_interested = true,
            Message::NotInterested => self.choking.peer_interested = false,
            Message::Have { piece } => {
                if *piece as usize >= self.bitfield.piece_count() {
                    return Err(PeerError::Protocol(format!("have for piece {}", piece)));
                }
                self.bitfield.set_piece(*piece as usize);
            }
            Message::Bitfield(bits) => {
                self.bitfield = Bitfield::try_from_bytes(bits, self.bitfield.piece_count())?;
            }
            Message::Piece { data, .. } => {
                self.downloaded += data.len() as u64;
                self.download_rate.record(data.len() as u64);
            }
            Message::KeepAlive | Message::Request { .. } | Message::Cancel { .. } | Message::Port(_) => {}
        }
        Ok(())
    }

    /// Records an outstanding request. Returns false if it was already pending.
    pub fn add_request(&mut self, block: BlockAddress) -> bool {
        self.pending.insert(block)
    }

    /// Drops an outstanding request. Returns false if it wasn't pending.
    pub fn remove_request(&mut self, block: &BlockAddress) -> bool {
        self.pending.remove(block)
    }

    pub fn has_request(&self, block: &BlockAddress) -> bool {
        self.pending.contains(block)
    }

    /// Removes and returns every outstanding request.
    pub fn take_requests(&mut self) -> Vec<BlockAddress> {
        self.pending.drain().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Queues a block the peer asked for. Duplicate requests are dropped.
    pub fn queue_upload(&mut self, block: BlockAddress) {
        if !self.uploads.contains(&block) {
            self.uploads.push_back(block);
        }
    }

    /// Drops a queued upload the peer cancelled.
    pub fn cancel_upload(&mut self, block: &BlockAddress) -> bool {
        let before = self.uploads.len();
        self.uploads.retain(|queued| queued != block);
        self.uploads.len() != before
    }

    pub fn next_upload(&mut self) -> Option<BlockAddress> {
        self.uploads.pop_front()
    }

    pub fn has_uploads(&self) -> bool {
        !self.uploads.is_empty()
    }

    /// Discards queued uploads, as when we choke the peer.
    pub fn clear_uploads(&mut self) {
        self.uploads.clear();
    }

    pub fn record_upload(&mut self, bytes: u64) {
        self.uploaded += bytes;
        self.upload_rate.record(bytes);
    }

    pub fn download_rate(&mut self) -> f64 {
        self.download_rate.rate()
    }

    pub fn upload_rate(&mut self) -> f64 {
        self.upload_rate.rate()
    }

    /// True when we may send requests: active, unchoked and interested.
    pub fn can_request(&self) -> bool {
        self.is_active() && !self.choking.peer_choking && self.choking.am_interested
    }
}
