use std::sync::{Mutex, MutexGuard, PoisonError};

use libp2p::PeerId;

use crate::balancer::Getter;
use crate::protocol::ProtocolId;

/// Peers believed to serve proxy protocols.
///
/// Grows when discovery results are merged and shrinks on dial failures.
/// Every access takes the lock; readers get a copy. Insertion order is kept
/// so consecutive snapshots agree while nothing changes.
#[derive(Debug, Default)]
pub struct CandidateSet {
    peers: Mutex<Vec<PeerId>>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PeerId>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add peers not yet present. Returns how many were new.
    pub fn merge<I>(&self, peers: I) -> usize
    where
        I: IntoIterator<Item = PeerId>,
    {
        let mut current = self.lock();
        let before = current.len();
        for peer in peers {
            if !current.contains(&peer) {
                current.push(peer);
            }
        }
        current.len() - before
    }

    /// Drop `peer`. Returns whether it was present.
    pub fn remove(&self, peer: &PeerId) -> bool {
        let mut current = self.lock();
        match current.iter().position(|p| p == peer) {
            Some(i) => {
                current.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.lock().contains(peer)
    }

    pub fn snapshot(&self) -> Vec<PeerId> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Getter for CandidateSet {
    fn get_proxies(&self, _protocol: &ProtocolId) -> Vec<PeerId> {
        self.snapshot()
    }
}
