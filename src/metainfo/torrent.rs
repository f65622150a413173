use super::error::MetainfoError;
use super::info_hash::InfoHash;
use std::path::PathBuf;

/// A file within a torrent.
///
/// Files form one logical byte stream in the order they appear in the
/// metadata. Paths are relative to the download root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path to the file (relative to the download root).
    pub path: PathBuf,
    /// Size of the file in bytes.
    pub length: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, length: u64) -> Self {
        Self {
            path: path.into(),
            length,
        }
    }
}

/// Validated, immutable metadata for one transfer.
///
/// Built once from decoded torrent metadata and shared (usually behind an
/// `Arc`) by every engine component for the life of the transfer.
#[derive(Debug, Clone)]
pub struct TorrentMetadata {
    piece_length: u32,
    piece_count: u32,
    total_length: u64,
    checksums: Vec<[u8; 20]>,
    files: Vec<FileEntry>,
    info_hash: InfoHash,
}

impl TorrentMetadata {
    /// Builds metadata from its decoded parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the piece length is zero, the file list is empty,
    /// or the number of checksums doesn't match the piece count implied by
    /// the total length.
    pub fn new(
        piece_length: u32,
        checksums: Vec<[u8; 20]>,
        files: Vec<FileEntry>,
        info_hash: InfoHash,
    ) -> Result<Self, MetainfoError> {
        if piece_length == 0 {
            return Err(MetainfoError::InvalidPieceLength(piece_length));
        }
        if files.is_empty() {
            return Err(MetainfoError::NoFiles);
        }

        let total_length: u64 = files.iter().map(|f| f.length).sum();
        let piece_count = total_length.div_ceil(piece_length as u64);
        let piece_count =
            u32::try_from(piece_count).map_err(|_| MetainfoError::TooManyPieces(piece_count))?;

        if checksums.len() != piece_count as usize {
            return Err(MetainfoError::ChecksumCount {
                expected: piece_count,
                actual: checksums.len(),
            });
        }

        Ok(Self {
            piece_length,
            piece_count,
            total_length,
            checksums,
            files,
            info_hash,
        })
    }

    /// Builds metadata from the raw concatenated `pieces` string of an info
    /// dictionary, checking it against a declared total length.
    pub fn from_parts(
        piece_length: u32,
        pieces: &[u8],
        files: Vec<FileEntry>,
        total_length: u64,
        info_hash: InfoHash,
    ) -> Result<Self, MetainfoError> {
        if pieces.len() % 20 != 0 {
            return Err(MetainfoError::MalformedChecksums(pieces.len()));
        }

        let files_total: u64 = files.iter().map(|f| f.length).sum();
        if files_total != total_length {
            return Err(MetainfoError::LengthMismatch {
                files: files_total,
                total: total_length,
            });
        }

        let checksums = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        Self::new(piece_length, checksums, files, info_hash)
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn info_hash(&self) -> &InfoHash {
        &self.info_hash
    }

    pub fn checksum(&self, piece: u32) -> Option<&[u8; 20]> {
        self.checksums.get(piece as usize)
    }

    /// Logical length of a piece. Every piece is `piece_length` long except
    /// possibly the last one. Returns 0 for an out-of-range index.
    pub fn piece_size(&self, piece: u32) -> u32 {
        if piece >= self.piece_count {
            return 0;
        }
        let start = piece as u64 * self.piece_length as u64;
        (self.total_length - start).min(self.piece_length as u64) as u32
    }
}
