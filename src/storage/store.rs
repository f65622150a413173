use super::address::{file_ranges, to_absolute, FileSegment};
use super::error::StorageError;
use super::file::{validate_file_path, HandleCache};
use super::io::DiskIoEngine;
use crate::metainfo::TorrentMetadata;
use crate::peer::Block;
use crate::stats::TransferMonitor;
use bytes::{Bytes, BytesMut};
use futures::stream::{FuturesUnordered, StreamExt};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::constants::VERIFY_BATCH_SIZE;

/// Block-level storage for one torrent.
///
/// Decomposes block reads and writes into one disk operation per covered
/// file segment and queues them on the [`DiskIoEngine`]. Files are opened
/// lazily under the root directory.
pub struct BlockStore {
    root: PathBuf,
    metadata: Arc<TorrentMetadata>,
    handles: HandleCache,
    engine: DiskIoEngine,
}

impl BlockStore {
    pub fn new(root: impl Into<PathBuf>, metadata: Arc<TorrentMetadata>) -> Result<Self, StorageError> {
        Self::build(root.into(), metadata, DiskIoEngine::new()?)
    }

    pub fn with_monitor(
        root: impl Into<PathBuf>,
        metadata: Arc<TorrentMetadata>,
        monitor: Arc<TransferMonitor>,
    ) -> Result<Self, StorageError> {
        Self::build(root.into(), metadata, DiskIoEngine::with_monitor(monitor)?)
    }

    fn build(
        root: PathBuf,
        metadata: Arc<TorrentMetadata>,
        engine: DiskIoEngine,
    ) -> Result<Self, StorageError> {
        for file in metadata.files() {
            validate_file_path(&file.path)?;
        }

        Ok(Self {
            handles: HandleCache::new(root.clone()),
            root,
            metadata,
            engine,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &Arc<TorrentMetadata> {
        &self.metadata
    }

    /// Returns how a block maps onto files without touching the disk.
    pub fn plan(&self, piece: u32, offset: u32, length: u32) -> Result<Vec<FileSegment>, StorageError> {
        if piece >= self.metadata.piece_count() {
            return Err(StorageError::InvalidPieceIndex(piece));
        }
        if offset as u64 + length as u64 > self.metadata.piece_size(piece) as u64 {
            return Err(StorageError::InvalidBlockOffset { piece, offset });
        }

        let absolute = to_absolute(piece, offset, self.metadata.piece_length());
        Ok(file_ranges(self.metadata.files(), absolute, length as u64)?)
    }

    fn file_path(&self, segment: &FileSegment) -> &Path {
        &self.metadata.files()[segment.file_index].path
    }

    /// Reads a block. Resolves once every segment has landed, or with the
    /// first segment failure.
    pub async fn get_block(&self, piece: u32, offset: u32, length: u32) -> Result<Bytes, StorageError> {
        let segments = self.plan(piece, offset, length)?;

        let mut pending = FuturesUnordered::new();
        for segment in &segments {
            let handle = self.handles.get_read(self.file_path(segment)).await?;
            let rx = self
                .engine
                .submit_read(handle, segment.file_offset, segment.length as usize)?;
            let buffer_offset = segment.buffer_offset;
            pending.push(async move { (buffer_offset, rx.await) });
        }

        let mut buf = BytesMut::zeroed(length as usize);
        while let Some((buffer_offset, result)) = pending.next().await {
            let data = result.map_err(|_| StorageError::EngineStopped)??;
            buf[buffer_offset..buffer_offset + data.len()].copy_from_slice(&data);
        }

        trace!("Read block {}:{}+{}", piece, offset, length);
        Ok(buf.freeze())
    }

    /// Writes a block, one queued write per covered file segment.
    pub async fn add_block(&self, block: &Block) -> Result<(), StorageError> {
        let segments = self.plan(block.piece, block.offset, block.data.len() as u32)?;

        let mut pending = FuturesUnordered::new();
        for segment in &segments {
            let handle = self.handles.get_write(self.file_path(segment)).await?;
            let start = segment.buffer_offset;
            let data = block.data.slice(start..start + segment.length as usize);
            pending.push(self.engine.submit_write(handle, segment.file_offset, data)?);
        }

        while let Some(result) = pending.next().await {
            result.map_err(|_| StorageError::EngineStopped)??;
        }

        trace!(
            "Wrote block {}:{}+{}",
            block.piece,
            block.offset,
            block.data.len()
        );
        Ok(())
    }

    /// Reads a full piece back and checks it against its SHA-1 checksum.
    pub async fn verify_piece(&self, piece: u32) -> Result<bool, StorageError> {
        let expected = *self
            .metadata
            .checksum(piece)
            .ok_or(StorageError::InvalidPieceIndex(piece))?;

        let data = self.get_block(piece, 0, self.metadata.piece_size(piece)).await?;

        let hash = tokio::task::spawn_blocking(move || {
            let mut hasher = Sha1::new();
            hasher.update(&data);
            hasher.finalize()
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        Ok(hash.as_slice() == expected.as_slice())
    }

    /// Verifies every piece. Pieces whose files don't exist count as invalid.
    pub async fn verify_all(&self) -> Result<Vec<bool>, StorageError> {
        let piece_count = self.metadata.piece_count() as usize;
        let mut results = vec![false; piece_count];
        let mut valid = 0usize;

        debug!("Starting verification of {} pieces", piece_count);

        for batch_start in (0..piece_count).step_by(VERIFY_BATCH_SIZE) {
            let batch_end = (batch_start + VERIFY_BATCH_SIZE).min(piece_count);
            let batch = (batch_start..batch_end).map(|i| self.verify_piece(i as u32));
            let batch_results = futures::future::join_all(batch).await;

            for (i, result) in batch_results.into_iter().enumerate() {
                let piece = batch_start + i;
                results[piece] = match result {
                    Ok(ok) => ok,
                    Err(StorageError::FileNotFound(_)) | Err(StorageError::ShortTransfer { .. }) => {
                        false
                    }
                    Err(StorageError::EngineStopped) => return Err(StorageError::EngineStopped),
                    Err(e) => {
                        trace!("Piece {} verification error: {}", piece, e);
                        false
                    }
                };
                if results[piece] {
                    valid += 1;
                }
            }
        }

        debug!("Verification complete: {}/{} pieces valid", valid, piece_count);
        Ok(results)
    }

    /// Returns true if a read of `relative` would fail fast because the file
    /// is known not to exist.
    pub fn is_known_missing(&self, relative: &Path) -> bool {
        self.handles.is_known_missing(relative)
    }

    pub fn open_files(&self) -> usize {
        self.handles.open_count()
    }

    /// Drains the disk engine, then syncs and closes every open file.
    pub async fn close(&self) {
        self.engine.shutdown().await;

        let handles = self.handles.drain();
        if handles.is_empty() {
            return;
        }

        let result = tokio::task::spawn_blocking(move || {
            for handle in &handles {
                if let Err(e) = handle.sync() {
                    warn!("Failed to sync {}: {}", handle.path().display(), e);
                }
            }
        })
        .await;

        if let Err(e) = result {
            warn!("File sync task failed: {}", e);
        }
    }
}
