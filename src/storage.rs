//! Disk storage and block addressing.
//!
//! Torrent data is one logical byte stream cut into fixed-size pieces and
//! laid out over an ordered list of files. Pieces and blocks freely straddle
//! file boundaries; this module translates block addresses into per-file
//! segments and performs the I/O.
//!
//! # Components
//!
//! - [`address`] - Pure address translation (piece ⇄ absolute ⇄ file)
//! - [`DiskIoEngine`] - Single worker thread that performs every disk transfer
//! - [`BlockStore`] - Per-torrent block reads and writes over the engine
//!
//! # Examples
//!
//! ```no_run
//! use rswarm::metainfo::{FileEntry, InfoHash, TorrentMetadata};
//! use rswarm::peer::Block;
//! use rswarm::storage::BlockStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let metadata = Arc::new(TorrentMetadata::new(
//!     128,
//!     vec![[0u8; 20]; 2],
//!     vec![FileEntry::new("a.bin", 100), FileEntry::new("b.bin", 50)],
//!     InfoHash::from_bytes([0u8; 20]),
//! )?);
//!
//! let store = BlockStore::new("./downloads", metadata)?;
//!
//! // Bytes 80..120 land in a.bin[80..100] and b.bin[0..20].
//! store.add_block(&Block::new(0, 80, vec![7u8; 40].into())).await?;
//! let data = store.get_block(0, 80, 40).await?;
//! assert_eq!(data.len(), 40);
//!
//! store.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! File paths containing `..`, a root or a drive prefix are rejected when a
//! [`BlockStore`] is created.

pub mod address;
mod error;
mod file;
mod io;
mod store;

pub use address::{AddressError, FileSegment};
pub use error::StorageError;
pub use file::FileHandle;
pub use io::{DiskIoEngine, ReadCompletion, WriteCompletion};
pub use store::BlockStore;
