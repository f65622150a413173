//! Protocol constants and tuning parameters.
//!
//! Defaults for [`EngineConfig`](crate::config::EngineConfig) live here along
//! with the fixed values of the peer wire protocol.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-RS0001-";

// ============================================================================
// Ports
// ============================================================================

/// Default BitTorrent listen port
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Connection limits
// ============================================================================

/// Maximum peers per torrent (qBittorrent default: 100, Transmission: 60)
pub const MAX_PEERS_PER_TORRENT: usize = 200;

/// Maximum peers we keep unchoked for uploads (qBittorrent: 4, libtorrent: 8)
pub const MAX_UNCHOKED_PEERS: usize = 4;

/// Maximum reconnect attempts for a dropped outbound peer
pub const MAX_PEER_RETRY_ATTEMPTS: u32 = 5;

/// Outstanding block requests per peer for request pipelining
pub const MAX_REQUESTS_PER_PEER: usize = 64;

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Standard block size (16KB)
pub const BLOCK_SIZE: u32 = 16384;

/// Maximum request length per BEP 3 (128KB). Larger requests are not served.
pub const MAX_REQUEST_LENGTH: u32 = 131072;

/// Maximum frame size accepted from a peer (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16777216;

/// Initial read buffer capacity for peer connections
pub const READ_BUFFER_SIZE: usize = 32 * 1024;

// ============================================================================
// Timeouts
// ============================================================================

/// TCP connection timeout
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Handshake timeout after TCP connect (libtorrent default: 10s)
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket write timeout
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Intervals
// ============================================================================

/// Default tracker announce interval
pub const TRACKER_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1800);

/// Minimum tracker announce interval
pub const TRACKER_MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Choking algorithm run interval
pub const CHOKING_INTERVAL: Duration = Duration::from_secs(10);

/// Optimistic unchoke interval
pub const OPTIMISTIC_UNCHOKE_INTERVAL: Duration = Duration::from_secs(30);

/// Base delay for peer retry backoff
pub const PEER_RETRY_BASE_DELAY: Duration = Duration::from_secs(60);

/// Backoff exponent cap for retries
pub const BACKOFF_EXPONENT_CAP: u32 = 4;

/// Keepalive message interval
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// Rate calculation window for speed measurements
pub const RATE_CALC_WINDOW: Duration = Duration::from_secs(5);

// ============================================================================
// Protocol constants
// ============================================================================

/// BitTorrent protocol string
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Reserved bytes in handshake. No extensions are advertised.
pub const RESERVED_BYTES: [u8; 8] = [0; 8];

// ============================================================================
// Misc constants
// ============================================================================

/// Capacity of the torrent event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Progress log interval (pieces)
pub const PROGRESS_LOG_INTERVAL: u32 = 100;

/// Pieces verified concurrently when checking existing data
pub const VERIFY_BATCH_SIZE: usize = 32;
