use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use libp2p::PeerId;

use super::{Balancer, Getter};
use crate::error::CoreError;
use crate::protocol::ProtocolId;

pub const ROUND_ROBIN: &str = "round_robin";

/// Cycles through the candidate set.
///
/// One counter is shared by every protocol this balancer serves, so
/// interleaved picks for different protocols advance the same sequence.
pub struct RoundRobin {
    getter: Arc<dyn Getter>,
    counter: AtomicU32,
}

impl RoundRobin {
    pub fn new(getter: Arc<dyn Getter>) -> Self {
        Self {
            getter,
            counter: AtomicU32::new(0),
        }
    }
}

impl Balancer for RoundRobin {
    fn name(&self) -> &str {
        ROUND_ROBIN
    }

    fn next(&self, protocol: &ProtocolId) -> Result<PeerId, CoreError> {
        let proxies = self.getter.get_proxies(protocol);
        match proxies.len() {
            0 => Err(CoreError::NotEnoughProxies {
                protocol: protocol.clone(),
            }),
            1 => Ok(proxies[0]),
            len => {
                let n = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
                Ok(proxies[n as usize % len])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::CandidateSet;

    fn proto() -> ProtocolId {
        ProtocolId::from("/p2p-proxy/http/0.1.0")
    }

    #[test]
    fn test_empty_set_is_not_enough_proxies() {
        let rr = RoundRobin::new(Arc::new(CandidateSet::new()));
        let err = rr.next(&proto()).unwrap_err();
        assert!(err.is_not_enough_proxies());
    }

    #[test]
    fn test_single_candidate_does_not_advance() {
        let set = Arc::new(CandidateSet::new());
        let only = PeerId::random();
        set.merge([only]);
        let rr = RoundRobin::new(set);
        for _ in 0..5 {
            assert_eq!(rr.next(&proto()).unwrap(), only);
        }
        assert_eq!(rr.counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_cycles_through_candidates() {
        let set = Arc::new(CandidateSet::new());
        let peers: Vec<PeerId> = (0..3).map(|_| PeerId::random()).collect();
        set.merge(peers.iter().copied());
        let rr = RoundRobin::new(set);

        let picks: Vec<PeerId> = (0..6).map(|_| rr.next(&proto()).unwrap()).collect();
        // First pick lands on index 1: the counter is incremented before use.
        assert_eq!(
            picks,
            vec![peers[1], peers[2], peers[0], peers[1], peers[2], peers[0]]
        );
    }

    #[test]
    fn test_refetches_after_set_changes() {
        let set = Arc::new(CandidateSet::new());
        let a = PeerId::random();
        let b = PeerId::random();
        set.merge([a, b]);
        let rr = RoundRobin::new(set.clone());

        assert_eq!(rr.next(&proto()).unwrap(), b);
        set.remove(&b);
        assert_eq!(rr.next(&proto()).unwrap(), a);
        set.remove(&a);
        assert!(rr.next(&proto()).unwrap_err().is_not_enough_proxies());
    }

    #[test]
    fn test_counter_shared_across_protocols() {
        let set = Arc::new(CandidateSet::new());
        let a = PeerId::random();
        let b = PeerId::random();
        set.merge([a, b]);
        let rr = RoundRobin::new(set);

        let socks = ProtocolId::from("/p2p-proxy/socks5/0.1.0");
        assert_eq!(rr.next(&proto()).unwrap(), b);
        assert_eq!(rr.next(&socks).unwrap(), a);
        assert_eq!(rr.next(&proto()).unwrap(), b);
    }

    #[test]
    fn test_counter_wraps() {
        let set = Arc::new(CandidateSet::new());
        let peers: Vec<PeerId> = (0..2).map(|_| PeerId::random()).collect();
        set.merge(peers.iter().copied());
        let rr = RoundRobin::new(set);
        rr.counter.store(u32::MAX, Ordering::Relaxed);
        // MAX + 1 wraps to 0.
        assert_eq!(rr.next(&proto()).unwrap(), peers[0]);
        assert_eq!(rr.next(&proto()).unwrap(), peers[1]);
    }
}
