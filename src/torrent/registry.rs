use crate::peer::{BlockAddress, Message, PeerId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Stable handle of an admitted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Work handed to a session task from outside it.
///
/// Commands are drained in order by the task that owns the socket, so
/// everything sent to one peer stays FIFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(Message),
    SetChoking(bool),
    SetInterested(bool),
    /// Withdraw an outstanding request, telling the peer.
    Cancel(BlockAddress),
    Close,
}

/// What the choker needs to know about a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerStats {
    pub download_rate: f64,
    pub upload_rate: f64,
    pub interested: bool,
    pub choked: bool,
}

struct SessionEntry {
    addr: SocketAddr,
    peer_id: PeerId,
    commands: mpsc::UnboundedSender<Command>,
    stats: Mutex<PeerStats>,
}

/// Arena of active sessions with a peer-id index.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
    by_peer: DashMap<PeerId, SessionId>,
    next_id: AtomicU64,
    /// Admitted sessions, reserved before anything is inserted.
    slots: AtomicUsize,
    max_peers: usize,
}

impl SessionRegistry {
    pub fn new(max_peers: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            by_peer: DashMap::new(),
            next_id: AtomicU64::new(1),
            slots: AtomicUsize::new(0),
            max_peers,
        }
    }

    /// Admits a session whose handshake completed.
    ///
    /// Returns `None` when the registry is full or the peer is already
    /// connected. Otherwise returns the new id and the command receiver the
    /// session task must drain.
    pub fn admit(
        &self,
        peer_id: PeerId,
        addr: SocketAddr,
    ) -> Option<(SessionId, mpsc::UnboundedReceiver<Command>)> {
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < self.max_peers).then_some(taken + 1)
            })
            .ok()?;

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.by_peer.entry(peer_id) {
            Entry::Occupied(_) => {
                self.slots.fetch_sub(1, Ordering::AcqRel);
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.insert(
            id,
            SessionEntry {
                addr,
                peer_id,
                commands: tx,
                stats: Mutex::new(PeerStats {
                    choked: true,
                    ..PeerStats::default()
                }),
            },
        );
        Some((id, rx))
    }

    pub fn remove(&self, id: SessionId) {
        if let Some((_, entry)) = self.sessions.remove(&id) {
            self.by_peer.remove_if(&entry.peer_id, |_, current| *current == id);
            self.slots.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Queues a command for one session. Returns false if it is gone.
    pub fn send(&self, id: SessionId, command: Command) -> bool {
        self.sessions
            .get(&id)
            .is_some_and(|entry| entry.commands.send(command).is_ok())
    }

    /// Queues a message for every session.
    pub fn broadcast(&self, message: &Message) {
        for entry in self.sessions.iter() {
            let _ = entry.commands.send(Command::Send(message.clone()));
        }
    }

    /// Queues a command for every session.
    pub fn broadcast_command(&self, command: &Command) {
        for entry in self.sessions.iter() {
            let _ = entry.commands.send(command.clone());
        }
    }

    pub fn update_stats(&self, id: SessionId, stats: PeerStats) {
        if let Some(entry) = self.sessions.get(&id) {
            *entry.stats.lock() = stats;
        }
    }

    pub fn stats(&self) -> Vec<(SessionId, PeerStats)> {
        let mut stats: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), *entry.stats.lock()))
            .collect();
        stats.sort_by_key(|(id, _)| *id);
        stats
    }

    pub fn unchoked_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| !entry.stats.lock().choked)
            .count()
    }

    pub fn contains_addr(&self, addr: &SocketAddr) -> bool {
        self.sessions.iter().any(|entry| entry.addr == *addr)
    }

    pub fn contains_peer(&self, peer_id: &PeerId) -> bool {
        self.by_peer.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Tells every session to close and forgets them all.
    pub fn clear(&self) {
        self.broadcast_command(&Command::Close);
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_admit_and_remove() {
        let registry = SessionRegistry::new(10);
        let peer = PeerId([1; 20]);

        let (id, _rx) = registry.admit(peer, addr(1)).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains_peer(&peer));
        assert!(registry.contains_addr(&addr(1)));

        assert!(registry.admit(peer, addr(2)).is_none());

        registry.remove(id);
        assert!(registry.is_empty());
        assert!(!registry.contains_peer(&peer));
        assert!(registry.admit(peer, addr(2)).is_some());
    }

    #[test]
    fn test_duplicate_refusal_releases_slot() {
        let registry = SessionRegistry::new(2);
        let (a, _rx_a) = registry.admit(PeerId([1; 20]), addr(1)).unwrap();
        assert!(registry.admit(PeerId([1; 20]), addr(2)).is_none());
        let (_b, _rx_b) = registry.admit(PeerId([2; 20]), addr(3)).unwrap();
        assert!(registry.admit(PeerId([3; 20]), addr(4)).is_none());

        registry.remove(a);
        assert!(registry.admit(PeerId([3; 20]), addr(4)).is_some());

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.admit(PeerId([4; 20]), addr(5)).is_some());
    }

    #[test]
    fn test_concurrent_admission_respects_max_peers() {
        let registry = Arc::new(SessionRegistry::new(1));

        for round in 0..200u8 {
            let barrier = Arc::new(Barrier::new(8));
            let handles: Vec<_> = (0..8u8)
                .map(|n| {
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        registry
                            .admit(PeerId([n; 20]), addr(1000 + n as u16))
                            .map(|(id, _rx)| id)
                    })
                })
                .collect();

            let admitted: Vec<SessionId> = handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect();
            assert_eq!(admitted.len(), 1, "round {}", round);
            assert_eq!(registry.len(), 1);
            registry.remove(admitted[0]);
        }
    }

    #[test]
    fn test_max_peers() {
        let registry = SessionRegistry::new(2);
        let _a = registry.admit(PeerId([1; 20]), addr(1)).unwrap();
        let _b = registry.admit(PeerId([2; 20]), addr(2)).unwrap();
        assert!(registry.admit(PeerId([3; 20]), addr(3)).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_commands_are_fifo() {
        let registry = SessionRegistry::new(10);
        let (id, mut rx) = registry.admit(PeerId([1; 20]), addr(1)).unwrap();

        assert!(registry.send(id, Command::SetChoking(false)));
        registry.broadcast(&Message::Have { piece: 3 });
        registry.clear();

        assert_eq!(rx.try_recv().unwrap(), Command::SetChoking(false));
        assert_eq!(
            rx.try_recv().unwrap(),
            Command::Send(Message::Have { piece: 3 })
        );
        assert_eq!(rx.try_recv().unwrap(), Command::Close);
        assert!(!registry.send(id, Command::Close));
    }

    #[test]
    fn test_unchoked_count() {
        let registry = SessionRegistry::new(10);
        let (a, _rx_a) = registry.admit(PeerId([1; 20]), addr(1)).unwrap();
        let (_b, _rx_b) = registry.admit(PeerId([2; 20]), addr(2)).unwrap();
        assert_eq!(registry.unchoked_count(), 0);

        registry.update_stats(
            a,
            PeerStats {
                interested: true,
                choked: false,
                ..PeerStats::default()
            },
        );
        assert_eq!(registry.unchoked_count(), 1);
        assert!(registry.stats()[0].1.interested);
    }
}
