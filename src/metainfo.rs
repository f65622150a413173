//! Torrent metadata consumed by the engine.
//!
//! Parsing `.torrent` files is left to the host application. This module
//! defines the validated, immutable value the engine is constructed from:
//! the piece geometry, one SHA-1 checksum per piece, the ordered file list
//! and the info hash.
//!
//! # Examples
//!
//! ```
//! use rswarm::metainfo::{FileEntry, InfoHash, TorrentMetadata};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let files = vec![
//!     FileEntry::new("a.bin", 100),
//!     FileEntry::new("b.bin", 50),
//! ];
//!
//! let metadata = TorrentMetadata::new(
//!     50,
//!     vec![[0u8; 20]; 3],
//!     files,
//!     InfoHash::from_bytes([7u8; 20]),
//! )?;
//!
//! assert_eq!(metadata.piece_count(), 3);
//! assert_eq!(metadata.total_length(), 150);
//! assert_eq!(metadata.piece_size(2), 50);
//! # Ok(())
//! # }
//! ```
//!
//! # Invariants
//!
//! A [`TorrentMetadata`] can only be built when:
//!
//! - the sum of the file lengths is the total length,
//! - there is exactly one checksum per piece,
//! - the piece length is positive.
//!
//! Violations are reported as [`MetainfoError`] before any network or disk
//! activity starts.

mod error;
mod info_hash;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use torrent::{FileEntry, TorrentMetadata};
