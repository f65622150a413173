use thiserror::Error;

/// Errors raised while building a [`TorrentMetadata`](super::TorrentMetadata).
///
/// All of these are fatal to constructing a transfer.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The piece length is zero.
    #[error("invalid piece length: {0}")]
    InvalidPieceLength(u32),

    /// The number of checksums doesn't match the number of pieces.
    #[error("expected {expected} piece checksums, got {actual}")]
    ChecksumCount { expected: u32, actual: usize },

    /// The concatenated checksum blob is not a multiple of 20 bytes.
    #[error("piece checksum blob of {0} bytes is not a multiple of 20")]
    MalformedChecksums(usize),

    /// The file lengths don't add up to the declared total.
    #[error("file lengths sum to {files} but total length is {total}")]
    LengthMismatch { files: u64, total: u64 },

    /// The torrent has no files.
    #[error("torrent has no files")]
    NoFiles,

    /// The info hash is not 20 bytes.
    #[error("invalid info hash length")]
    InvalidInfoHashLength,

    /// The torrent would need more than `u32::MAX` pieces.
    #[error("too many pieces: {0}")]
    TooManyPieces(u64),
}
