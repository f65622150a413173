use super::announce::{AnnounceRequest, AnnounceResponse, Tracker};
use super::error::TrackerError;
use crate::constants::TRACKER_ANNOUNCE_INTERVAL;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;

/// A tracker that answers every announce with a fixed peer list.
///
/// Useful for LAN transfers, tests and for feeding peers learned elsewhere.
/// Every request is recorded and can be inspected with
/// [`announces`](Self::announces).
pub struct StaticTracker {
    peers: Mutex<Vec<SocketAddr>>,
    interval: Duration,
    failure: Mutex<Option<TrackerError>>,
    history: Mutex<Vec<AnnounceRequest>>,
}

impl StaticTracker {
    pub fn new(peers: Vec<SocketAddr>) -> Self {
        Self {
            peers: Mutex::new(peers),
            interval: TRACKER_ANNOUNCE_INTERVAL,
            failure: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn set_peers(&self, peers: Vec<SocketAddr>) {
        *self.peers.lock() = peers;
    }

    /// Makes every following announce fail with `error`, or succeed again
    /// when `None`.
    pub fn set_failure(&self, error: Option<TrackerError>) {
        *self.failure.lock() = error;
    }

    pub fn announces(&self) -> Vec<AnnounceRequest> {
        self.history.lock().clone()
    }
}

impl Tracker for StaticTracker {
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, TrackerError> {
        self.history.lock().push(request);

        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        Ok(AnnounceResponse::new(self.interval, self.peers.lock().clone()))
    }
}
