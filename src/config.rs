//! Engine configuration.
//!
//! Every torrent is constructed with an explicit [`EngineConfig`]. Defaults
//! come from [`crate::constants`].

use crate::constants::{
    BLOCK_SIZE, CHOKING_INTERVAL, CONNECTION_TIMEOUT, DEFAULT_PORT, HANDSHAKE_TIMEOUT,
    KEEPALIVE_INTERVAL, MAX_PEERS_PER_TORRENT, MAX_PEER_RETRY_ATTEMPTS, MAX_REQUESTS_PER_PEER,
    MAX_REQUEST_LENGTH, MAX_UNCHOKED_PEERS, PEER_RETRY_BASE_DELAY,
};
use crate::peer::PeerId;
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by the sessions, timers and storage of a torrent.
///
/// # Examples
///
/// ```
/// use rswarm::config::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .with_download_dir("/tmp/downloads")
///     .with_max_peers(50)
///     .with_keepalive_interval(Duration::from_secs(60));
///
/// assert_eq!(config.max_peers, 50);
/// assert_eq!(config.block_size, 16384);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Our peer id, sent in every handshake.
    pub peer_id: PeerId,
    /// Port reported to trackers.
    pub listen_port: u16,
    /// Root directory that torrent files are stored under.
    pub download_dir: PathBuf,
    /// Requested block size. Capped at the piece length.
    pub block_size: u32,
    /// Maximum concurrent sessions per torrent.
    pub max_peers: usize,
    /// Outstanding requests kept per unchoked peer.
    pub request_queue_depth: usize,
    pub keepalive_interval: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// First reconnect delay; doubles on every failed attempt.
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Largest request we serve.
    pub max_request_length: u32,
    /// Upload slots, including the optimistic one.
    pub max_unchoked: usize,
    pub choking_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            peer_id: PeerId::generate(),
            listen_port: DEFAULT_PORT,
            download_dir: PathBuf::from("."),
            block_size: BLOCK_SIZE,
            max_peers: MAX_PEERS_PER_TORRENT,
            request_queue_depth: MAX_REQUESTS_PER_PEER,
            keepalive_interval: KEEPALIVE_INTERVAL,
            connect_timeout: CONNECTION_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            reconnect_base_delay: PEER_RETRY_BASE_DELAY,
            max_reconnect_attempts: MAX_PEER_RETRY_ATTEMPTS,
            max_request_length: MAX_REQUEST_LENGTH,
            max_unchoked: MAX_UNCHOKED_PEERS,
            choking_interval: CHOKING_INTERVAL,
        }
    }
}

impl EngineConfig {
    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = peer_id;
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    pub fn with_request_queue_depth(mut self, depth: usize) -> Self {
        self.request_queue_depth = depth.max(1);
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, base_delay: Duration, max_attempts: u32) -> Self {
        self.reconnect_base_delay = base_delay;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_max_request_length(mut self, length: u32) -> Self {
        self.max_request_length = length;
        self
    }

    pub fn with_max_unchoked(mut self, slots: usize) -> Self {
        self.max_unchoked = slots.max(1);
        self
    }

    pub fn with_choking_interval(mut self, interval: Duration) -> Self {
        self.choking_interval = interval;
        self
    }
}
