//! Capabilities the core consumes from the overlay network.

use std::time::Duration;

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};

use crate::error::CoreError;
use crate::protocol::{BoxConn, ProtocolId, SharedListener};

/// A peer as returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl PeerAddress {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            addrs: Vec::new(),
        }
    }
}

/// Protocol-tagged streams over the overlay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open an outbound stream to `peer` tagged with `protocol`.
    async fn open_stream(&self, peer: PeerId, protocol: &ProtocolId)
        -> Result<BoxConn, CoreError>;

    /// Accept inbound streams tagged with `protocol`.
    async fn listen(&self, protocol: &ProtocolId) -> Result<SharedListener, CoreError>;

    /// Tear the transport down. Idempotent.
    async fn close(&self) -> Result<(), CoreError>;
}

/// Rendezvous by service tag.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Peers currently advertising `service_tag`.
    async fn find_peers(&self, service_tag: &str) -> Result<Vec<PeerAddress>, CoreError>;

    /// Announce the local peer under `service_tag` for `ttl`.
    async fn advertise(&self, service_tag: &str, ttl: Duration) -> Result<(), CoreError>;

    fn local_peer_id(&self) -> PeerId;
}
