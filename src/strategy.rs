//! Block selection and download progress.
//!
//! [`PieceStrategist`] tracks every block of a torrent that has not been
//! received yet and hands out random pending blocks to request. It owns the
//! completion bitfield: a piece's bit is set once all of its bytes arrived.

use crate::metainfo::TorrentMetadata;
use crate::peer::{Bitfield, BlockAddress};
use crate::storage::address::{from_absolute, to_absolute};
use crate::torrent::TorrentError;
use parking_lot::Mutex;
use rand::Rng as _;
use std::sync::Arc;
use tracing::{debug, trace};

/// Random picks tried before giving up on matching the peer's bitfield.
pub const SELECT_ATTEMPTS: usize = 10;

const ABSENT: u32 = u32::MAX;

/// Flat block indices not yet received, with O(1) random pick and removal.
#[derive(Debug)]
pub struct PendingBlocks {
    blocks: Vec<u32>,
    positions: Vec<u32>,
}

impl PendingBlocks {
    /// Creates a set holding every index in `0..total`.
    pub fn full(total: u32) -> Self {
        Self {
            blocks: (0..total).collect(),
            positions: (0..total).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, index: u32) -> bool {
        self.positions
            .get(index as usize)
            .is_some_and(|&pos| pos != ABSENT)
    }

    pub fn insert(&mut self, index: u32) -> bool {
        if self.contains(index) || index as usize >= self.positions.len() {
            return false;
        }
        self.positions[index as usize] = self.blocks.len() as u32;
        self.blocks.push(index);
        true
    }

    pub fn remove(&mut self, index: u32) -> bool {
        if !self.contains(index) {
            return false;
        }
        let pos = self.positions[index as usize] as usize;
        self.blocks.swap_remove(pos);
        if let Some(&moved) = self.blocks.get(pos) {
            self.positions[moved as usize] = pos as u32;
        }
        self.positions[index as usize] = ABSENT;
        true
    }

    fn get(&self, pos: usize) -> u32 {
        self.blocks[pos]
    }
}

struct Progress {
    pending: PendingBlocks,
    remaining: Vec<u64>,
    have: Bitfield,
}

/// Block-granularity download strategist.
pub struct PieceStrategist {
    metadata: Arc<TorrentMetadata>,
    block_size: u32,
    blocks_per_piece: u32,
    total_blocks: u32,
    progress: Mutex<Progress>,
}

impl PieceStrategist {
    /// Creates a strategist with every block pending.
    ///
    /// The effective block size is `min(block_size, piece_length)` and must
    /// divide the piece length so no block straddles two pieces.
    pub fn new(metadata: Arc<TorrentMetadata>, block_size: u32) -> Result<Self, TorrentError> {
        let piece_length = metadata.piece_length();
        let effective = block_size.min(piece_length);
        if effective == 0 || piece_length % effective != 0 {
            return Err(TorrentError::InvalidBlockSize {
                block_size,
                piece_length,
            });
        }

        let total_blocks = metadata.total_length().div_ceil(effective as u64) as u32;
        let remaining = (0..metadata.piece_count())
            .map(|piece| metadata.piece_size(piece) as u64)
            .collect();

        debug!(
            "Strategist: {} blocks of {} bytes over {} pieces",
            total_blocks,
            effective,
            metadata.piece_count()
        );

        Ok(Self {
            block_size: effective,
            blocks_per_piece: piece_length / effective,
            total_blocks,
            progress: Mutex::new(Progress {
                pending: PendingBlocks::full(total_blocks),
                remaining,
                have: Bitfield::new(metadata.piece_count() as usize),
            }),
            metadata,
        })
    }

    fn address(&self, index: u32) -> BlockAddress {
        from_absolute(
            index as u64 * self.block_size as u64,
            self.metadata.piece_length(),
            self.block_size,
            self.metadata.total_length(),
        )
    }

    /// Flat index of `block`, if it is exactly one of our blocks.
    fn index_of(&self, block: &BlockAddress) -> Option<u32> {
        if block.piece_index >= self.metadata.piece_count() || block.length == 0 {
            return None;
        }
        let absolute = to_absolute(block.piece_index, block.offset, self.metadata.piece_length());
        if absolute % self.block_size as u64 != 0 {
            return None;
        }
        let index = (absolute / self.block_size as u64) as u32;
        if index >= self.total_blocks || self.address(index) != *block {
            return None;
        }
        Some(index)
    }

    fn piece_blocks(&self, piece: u32) -> std::ops::Range<u32> {
        let first = piece * self.blocks_per_piece;
        first..(first + self.blocks_per_piece).min(self.total_blocks)
    }

    /// Picks a random pending block, preferring ones the peer has.
    ///
    /// Up to [`SELECT_ATTEMPTS`] random picks are checked against
    /// `peer_bitfield`. If none match, the last pick is returned anyway.
    pub fn next(&self, peer_bitfield: &Bitfield) -> Option<BlockAddress> {
        let progress = self.progress.lock();
        if progress.pending.is_empty() {
            return None;
        }

        let mut rng = rand::rng();
        let mut pick = 0;
        for _ in 0..SELECT_ATTEMPTS {
            pick = progress.pending.get(rng.random_range(0..progress.pending.len()));
            if peer_bitfield.has_piece((pick / self.blocks_per_piece) as usize) {
                break;
            }
        }
        Some(self.address(pick))
    }

    /// Picks a pending block the peer has and `accept` allows.
    ///
    /// Random picks are tried first, then the pending set is scanned from a
    /// random position. Returns `None` when no pending block qualifies.
    pub fn pick<F>(&self, peer_bitfield: &Bitfield, mut accept: F) -> Option<BlockAddress>
    where
        F: FnMut(&BlockAddress) -> bool,
    {
        let progress = self.progress.lock();
        let len = progress.pending.len();
        if len == 0 {
            return None;
        }

        let mut rng = rand::rng();
        let mut qualifies = |index: u32| {
            if !peer_bitfield.has_piece((index / self.blocks_per_piece) as usize) {
                return None;
            }
            let block = self.address(index);
            accept(&block).then_some(block)
        };

        for _ in 0..SELECT_ATTEMPTS {
            let index = progress.pending.get(rng.random_range(0..len));
            if let Some(block) = qualifies(index) {
                return Some(block);
            }
        }

        let start = rng.random_range(0..len);
        (0..len)
            .map(|i| progress.pending.get((start + i) % len))
            .find_map(qualifies)
    }

    /// Records a received block.
    ///
    /// Returns true if the block was pending. Duplicates and blocks that
    /// don't match our block grid return false and change nothing.
    pub fn received(&self, block: &BlockAddress) -> bool {
        let Some(index) = self.index_of(block) else {
            return false;
        };

        let mut progress = self.progress.lock();
        if !progress.pending.remove(index) {
            return false;
        }

        let piece = block.piece_index as usize;
        progress.remaining[piece] -= block.length as u64;
        if progress.remaining[piece] == 0 {
            progress.have.set_piece(piece);
            trace!("Piece {} fully received", piece);
        }
        true
    }

    /// Returns a received block to the pending set.
    pub fn release(&self, block: &BlockAddress) -> bool {
        let Some(index) = self.index_of(block) else {
            return false;
        };

        let mut progress = self.progress.lock();
        if !progress.pending.insert(index) {
            return false;
        }

        let piece = block.piece_index as usize;
        progress.remaining[piece] += block.length as u64;
        progress.have.clear_piece(piece);
        true
    }

    /// Returns every block of `piece` to the pending set.
    pub fn reset_piece(&self, piece: u32) {
        if piece >= self.metadata.piece_count() {
            return;
        }

        let mut progress = self.progress.lock();
        for index in self.piece_blocks(piece) {
            progress.pending.insert(index);
        }
        progress.remaining[piece as usize] = self.metadata.piece_size(piece) as u64;
        progress.have.clear_piece(piece as usize);
        debug!("Piece {} reset", piece);
    }

    /// Marks `piece` as complete without receiving its blocks.
    pub fn mark_piece_complete(&self, piece: u32) {
        if piece >= self.metadata.piece_count() {
            return;
        }

        let mut progress = self.progress.lock();
        for index in self.piece_blocks(piece) {
            progress.pending.remove(index);
        }
        progress.remaining[piece as usize] = 0;
        progress.have.set_piece(piece as usize);
    }

    pub fn is_complete(&self) -> bool {
        self.progress.lock().pending.is_empty()
    }

    /// True once fewer than 1% of all blocks are still pending.
    pub fn is_endgame(&self) -> bool {
        (self.progress.lock().pending.len() as u64) * 100 < self.total_blocks as u64
    }

    /// True when the peer has at least one piece we lack.
    pub fn wants_any(&self, peer_bitfield: &Bitfield) -> bool {
        peer_bitfield.has_missing_from(&self.progress.lock().have)
    }

    pub fn has_piece(&self, piece: u32) -> bool {
        self.progress.lock().have.has_piece(piece as usize)
    }

    pub fn bitfield(&self) -> Bitfield {
        self.progress.lock().have.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.progress.lock().pending.len()
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.progress.lock().remaining.iter().sum()
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }
}
