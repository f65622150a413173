use super::error::TrackerError;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    None,
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }
}

/// What a torrent tells its tracker on every announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: TrackerEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {
    /// Time until the next regular announce.
    pub interval: Duration,
    pub min_interval: Option<Duration>,
    pub peers: Vec<SocketAddr>,
}

impl AnnounceResponse {
    pub fn new(interval: Duration, peers: Vec<SocketAddr>) -> Self {
        Self {
            interval,
            min_interval: None,
            peers,
        }
    }

    /// Builds a response from compact peer lists (6 bytes per IPv4 peer,
    /// 18 bytes per IPv6 peer).
    pub fn from_compact(interval: Duration, peers: &[u8], peers6: &[u8]) -> Self {
        let peers = peers
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                SocketAddr::new(IpAddr::V4(ip), u16::from_be_bytes([chunk[4], chunk[5]]))
            })
            .chain(peers6.chunks_exact(18).map(|chunk| {
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&chunk[..16]);
                SocketAddr::new(
                    IpAddr::V6(Ipv6Addr::from(ip)),
                    u16::from_be_bytes([chunk[16], chunk[17]]),
                )
            }))
            .collect();
        Self::new(interval, peers)
    }

    /// The delay before the next announce, never below `floor`.
    pub fn next_announce(&self, floor: Duration) -> Duration {
        self.interval
            .max(self.min_interval.unwrap_or_default())
            .max(floor)
    }
}

/// A source of peer endpoints.
///
/// Implementations talk to HTTP or UDP trackers, a DHT, or anything else
/// that can turn an announce into a list of peers.
pub trait Tracker: Send + Sync + 'static {
    fn announce(
        &self,
        request: AnnounceRequest,
    ) -> impl Future<Output = Result<AnnounceResponse, TrackerError>> + Send;
}
