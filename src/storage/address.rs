//! Translation between piece-relative, absolute and file-relative addresses.
//!
//! The files of a torrent form one logical byte stream. A block is addressed
//! by `(piece, offset, length)`; its absolute position in the stream is
//! `piece * piece_length + offset`, and that range may cover any number of
//! files.

use crate::metainfo::FileEntry;
use crate::peer::BlockAddress;
use thiserror::Error;

/// A byte range that no file covers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("no file covers {length} bytes at absolute offset {offset}")]
    Uncovered { offset: u64, length: u64 },
}

/// The part of a request that falls inside one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSegment {
    /// Index into the torrent's file list.
    pub file_index: usize,
    /// Offset within that file.
    pub file_offset: u64,
    /// Number of bytes in this segment.
    pub length: u64,
    /// Offset of this segment within the caller's buffer.
    pub buffer_offset: usize,
}

pub fn to_absolute(piece_index: u32, offset: u32, piece_length: u32) -> u64 {
    piece_index as u64 * piece_length as u64 + offset as u64
}

/// Converts an absolute offset back into a block address.
///
/// The length is clamped so the block never extends past `max_offset`.
pub fn from_absolute(byte_offset: u64, piece_length: u32, length: u32, max_offset: u64) -> BlockAddress {
    let piece_length = piece_length as u64;
    let available = max_offset.saturating_sub(byte_offset);

    BlockAddress {
        piece_index: (byte_offset / piece_length) as u32,
        offset: (byte_offset % piece_length) as u32,
        length: (length as u64).min(available) as u32,
    }
}

/// Splits an absolute byte range into per-file segments, in file order.
///
/// Zero-length files never receive a segment. A zero-length request yields
/// no segments.
///
/// # Errors
///
/// Returns [`AddressError::Uncovered`] if part of the range lies past the end
/// of the last file.
pub fn file_ranges(
    files: &[FileEntry],
    absolute_offset: u64,
    length: u64,
) -> Result<Vec<FileSegment>, AddressError> {
    let mut segments = Vec::new();
    let mut remaining = length;
    let mut current = absolute_offset;
    let mut file_start = 0u64;

    for (file_index, file) in files.iter().enumerate() {
        if remaining == 0 {
            break;
        }

        let file_end = file_start + file.length;

        if current >= file_start && current < file_end {
            let take = remaining.min(file_end - current);

            segments.push(FileSegment {
                file_index,
                file_offset: current - file_start,
                length: take,
                buffer_offset: (length - remaining) as usize,
            });

            current += take;
            remaining -= take;
        }

        file_start = file_end;
    }

    if remaining > 0 {
        return Err(AddressError::Uncovered {
            offset: current,
            length: remaining,
        });
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(lengths: &[u64]) -> Vec<FileEntry> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| FileEntry::new(format!("f{}", i), len))
            .collect()
    }

    #[test]
    fn test_absolute_roundtrip() {
        for piece_length in [1u32, 7, 50, 16384, 262144] {
            for piece in [0u32, 1, 3, 1000] {
                for offset in [0, piece_length / 2, piece_length - 1] {
                    let abs = to_absolute(piece, offset, piece_length);
                    let addr = from_absolute(abs, piece_length, 1, abs + 1);
                    assert_eq!(addr.piece_index, piece);
                    assert_eq!(addr.offset, offset);
                    assert_eq!(addr.length, 1);
                }
            }
        }
    }

    #[test]
    fn test_from_absolute_clamps_length() {
        let addr = from_absolute(140, 50, 50, 150);
        assert_eq!(addr, BlockAddress::new(2, 40, 10));

        let addr = from_absolute(150, 50, 50, 150);
        assert_eq!(addr.length, 0);
    }

    #[test]
    fn test_single_file_segment() {
        let segs = file_ranges(&files(&[100, 50]), 50, 50).unwrap();
        assert_eq!(
            segs,
            vec![FileSegment {
                file_index: 0,
                file_offset: 50,
                length: 50,
                buffer_offset: 0
            }]
        );

        let segs = file_ranges(&files(&[100, 50]), 100, 50).unwrap();
        assert_eq!(
            segs,
            vec![FileSegment {
                file_index: 1,
                file_offset: 0,
                length: 50,
                buffer_offset: 0
            }]
        );
    }

    #[test]
    fn test_spanning_segments() {
        let segs = file_ranges(&files(&[100, 50]), 80, 40).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!((segs[0].file_index, segs[0].file_offset, segs[0].length), (0, 80, 20));
        assert_eq!((segs[1].file_index, segs[1].file_offset, segs[1].length), (1, 0, 20));
        assert_eq!(segs[1].buffer_offset, 20);
    }

    #[test]
    fn test_zero_length_files_skipped() {
        let segs = file_ranges(&files(&[10, 0, 0, 10, 0]), 5, 10).unwrap();
        assert_eq!(segs.len(), 2);
        assert!(segs.iter().all(|s| s.length > 0));
        assert_eq!(segs[1].file_index, 3);
    }

    #[test]
    fn test_segments_sum_and_contiguity() {
        let layout = files(&[3, 0, 17, 1, 64, 0, 9, 30]);
        let total: u64 = layout.iter().map(|f| f.length).sum();

        for start in 0..total {
            for len in 0..=(total - start) {
                let segs = file_ranges(&layout, start, len).unwrap();
                let sum: u64 = segs.iter().map(|s| s.length).sum();
                assert_eq!(sum, len);

                let mut expected_buffer = 0usize;
                for seg in &segs {
                    assert_eq!(seg.buffer_offset, expected_buffer);
                    expected_buffer += seg.length as usize;
                }
                for pair in segs.windows(2) {
                    assert!(pair[0].file_index < pair[1].file_index);
                    assert_eq!(pair[1].file_offset, 0);
                }
            }
        }
    }

    #[test]
    fn test_empty_request() {
        assert!(file_ranges(&files(&[10]), 4, 0).unwrap().is_empty());
    }

    #[test]
    fn test_uncovered_range() {
        let err = file_ranges(&files(&[100, 50]), 140, 20).unwrap_err();
        assert_eq!(
            err,
            AddressError::Uncovered {
                offset: 150,
                length: 10
            }
        );

        assert!(file_ranges(&files(&[100]), 200, 1).is_err());
    }
}
