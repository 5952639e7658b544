use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};

/// Bootstrap peers parsed from configuration.
pub struct BootNodes {
    addrs: Vec<Multiaddr>,
}

impl BootNodes {
    /// Parse a list of multiaddr strings.
    /// Invalid multiaddr strings are logged and skipped.
    pub fn new(boot_nodes: &[String]) -> Self {
        let addrs = boot_nodes
            .iter()
            .filter_map(|s| {
                s.parse::<Multiaddr>()
                    .map_err(|e| {
                        tracing::warn!("Invalid multiaddr '{}': {}", s, e);
                        e
                    })
                    .ok()
            })
            .collect();

        Self { addrs }
    }

    /// Return the parsed bootstrap addresses.
    pub fn addrs(&self) -> &[Multiaddr] {
        &self.addrs
    }

    /// Addresses that name their peer, usable to seed the routing table.
    pub fn with_peer_ids(&self) -> impl Iterator<Item = (PeerId, &Multiaddr)> {
        self.addrs
            .iter()
            .filter_map(|addr| peer_id_of(addr).map(|id| (id, addr)))
    }
}

/// The peer id in a trailing `/p2p/<id>` component, if any.
pub fn peer_id_of(addr: &Multiaddr) -> Option<PeerId> {
    match addr.iter().last() {
        Some(Protocol::P2p(id)) => Some(id),
        _ => None,
    }
}
