use super::registry::{PeerStats, SessionId};
use crate::constants::OPTIMISTIC_UNCHOKE_INTERVAL;
use rand::Rng as _;
use std::time::{Duration, Instant};

/// Tit-for-tat upload slot allocation.
///
/// Each round unchokes the interested peers that give us the most (or that
/// take the most when seeding), plus one optimistic slot that rotates every
/// [`OPTIMISTIC_UNCHOKE_INTERVAL`].
pub struct Choker {
    max_unchoked: usize,
    optimistic_interval: Duration,
    last_optimistic: Option<Instant>,
    optimistic_peer: Option<SessionId>,
}

impl Choker {
    pub fn new(max_unchoked: usize) -> Self {
        Self {
            max_unchoked: max_unchoked.max(1),
            optimistic_interval: OPTIMISTIC_UNCHOKE_INTERVAL,
            last_optimistic: None,
            optimistic_peer: None,
        }
    }

    pub fn with_optimistic_interval(mut self, interval: Duration) -> Self {
        self.optimistic_interval = interval;
        self
    }

    pub fn optimistic_peer(&self) -> Option<SessionId> {
        self.optimistic_peer
    }

    /// Returns `(session, unchoke)` for every session whose state must change.
    pub fn compute(&mut self, peers: &[(SessionId, PeerStats)], seeding: bool) -> Vec<(SessionId, bool)> {
        let now = Instant::now();

        if self
            .optimistic_peer
            .is_some_and(|opt| !peers.iter().any(|(id, _)| *id == opt))
        {
            self.optimistic_peer = None;
        }

        let mut candidates: Vec<_> = peers.iter().filter(|(_, stats)| stats.interested).collect();
        let rate = |stats: &PeerStats| {
            if seeding {
                stats.upload_rate
            } else {
                stats.download_rate
            }
        };
        candidates.sort_by(|(_, a), (_, b)| {
            rate(b)
                .partial_cmp(&rate(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut to_unchoke: Vec<SessionId> = candidates
            .iter()
            .take(self.max_unchoked - 1)
            .map(|(id, _)| *id)
            .collect();

        let rotate = self
            .last_optimistic
            .map_or(true, |last| now.duration_since(last) >= self.optimistic_interval);
        if rotate || self.optimistic_peer.is_none() {
            let choked_interested: Vec<_> = candidates
                .iter()
                .map(|(id, _)| *id)
                .filter(|id| !to_unchoke.contains(id))
                .collect();

            if !choked_interested.is_empty() {
                let idx = rand::rng().random_range(0..choked_interested.len());
                self.optimistic_peer = Some(choked_interested[idx]);
                self.last_optimistic = Some(now);
            }
        }

        if let Some(opt) = self.optimistic_peer {
            if !to_unchoke.contains(&opt) && to_unchoke.len() < self.max_unchoked {
                to_unchoke.push(opt);
            }
        }

        peers
            .iter()
            .filter_map(|(id, stats)| {
                let unchoke = to_unchoke.contains(id);
                (unchoke == stats.choked).then_some((*id, unchoke))
            })
            .collect()
    }
}
