//! In-process overlay for tests and local wiring.
//!
//! A [`MemoryNetwork`] is a hub; each [`MemoryOverlay`] node joined to it gets
//! a random peer id and implements both [`Transport`] and [`Discovery`].
//! Streams are `tokio::io::duplex` pairs. Dials to a peer can be made to fail
//! on demand, and every dial attempt is counted.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use libp2p::PeerId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::protocol::{BoxConn, Listener, ProtocolId, SharedListener};
use crate::shutdown::listener_closed;
use crate::transport::{Discovery, PeerAddress, Transport};

const BACKLOG: usize = 64;
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Listener fed through a channel. Closing it, or dropping every sender,
/// makes `accept` fail with the closed-listener error.
pub struct ChannelListener {
    protocol: ProtocolId,
    incoming: tokio::sync::Mutex<mpsc::Receiver<BoxConn>>,
    closed: CancellationToken,
}

impl ChannelListener {
    pub fn new(protocol: ProtocolId) -> (Self, mpsc::Sender<BoxConn>) {
        let (tx, rx) = mpsc::channel(BACKLOG);
        let listener = Self {
            protocol,
            incoming: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
        };
        (listener, tx)
    }
}

#[async_trait]
impl Listener for ChannelListener {
    fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    async fn accept(&self) -> io::Result<BoxConn> {
        let mut incoming = tokio::select! {
            _ = self.closed.cancelled() => return Err(listener_closed()),
            rx = self.incoming.lock() => rx,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(listener_closed()),
            conn = incoming.recv() => conn.ok_or_else(listener_closed),
        }
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

#[derive(Default)]
struct NetworkState {
    listeners: HashMap<(PeerId, ProtocolId), mpsc::Sender<BoxConn>>,
    providers: HashMap<String, Vec<PeerId>>,
    failing: HashSet<PeerId>,
    dials: HashMap<PeerId, usize>,
}

/// Shared hub connecting [`MemoryOverlay`] nodes.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join a new node with a random peer id.
    pub fn node(&self) -> MemoryOverlay {
        MemoryOverlay {
            id: PeerId::random(),
            network: self.clone(),
            closed: CancellationToken::new(),
        }
    }

    /// Make every dial to `peer` fail (or succeed again).
    pub fn fail_dials(&self, peer: PeerId, fail: bool) {
        let mut state = self.state();
        if fail {
            state.failing.insert(peer);
        } else {
            state.failing.remove(&peer);
        }
    }

    /// How many times `peer` was dialed, failed attempts included.
    pub fn dial_count(&self, peer: &PeerId) -> usize {
        self.state().dials.get(peer).copied().unwrap_or(0)
    }

    /// List `peer` as a provider of `tag` without running a node for it.
    pub fn add_provider(&self, tag: &str, peer: PeerId) {
        let mut state = self.state();
        let providers = state.providers.entry(tag.to_string()).or_default();
        if !providers.contains(&peer) {
            providers.push(peer);
        }
    }
}

/// One node on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryOverlay {
    id: PeerId,
    network: MemoryNetwork,
    closed: CancellationToken,
}

impl MemoryOverlay {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Transport for MemoryOverlay {
    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: &ProtocolId,
    ) -> Result<BoxConn, CoreError> {
        if self.is_closed() {
            return Err(CoreError::Transport {
                reason: "overlay closed".to_string(),
            });
        }
        let dial_err = |reason: &str| CoreError::Dial {
            peer,
            protocol: protocol.clone(),
            reason: reason.to_string(),
        };

        let sender = {
            let mut state = self.network.state();
            *state.dials.entry(peer).or_insert(0) += 1;
            if state.failing.contains(&peer) {
                return Err(dial_err("connection refused"));
            }
            state.listeners.get(&(peer, protocol.clone())).cloned()
        };
        let sender = sender.ok_or_else(|| dial_err("protocol not supported by peer"))?;

        let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER);
        if sender.send(Box::new(remote)).await.is_err() {
            // The listener was dropped; forget it so later dials see the
            // protocol as unsupported.
            let mut state = self.network.state();
            let key = (peer, protocol.clone());
            if state.listeners.get(&key).is_some_and(|tx| tx.same_channel(&sender)) {
                state.listeners.remove(&key);
            }
            return Err(dial_err("stream reset"));
        }
        Ok(Box::new(local))
    }

    async fn listen(&self, protocol: &ProtocolId) -> Result<SharedListener, CoreError> {
        let (listener, tx) = ChannelListener::new(protocol.clone());
        self.network
            .state()
            .listeners
            .insert((self.id, protocol.clone()), tx);
        Ok(Arc::new(listener))
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.closed.cancel();
        let mut state = self.network.state();
        state.listeners.retain(|(peer, _), _| *peer != self.id);
        for providers in state.providers.values_mut() {
            providers.retain(|p| *p != self.id);
        }
        Ok(())
    }
}

#[async_trait]
impl Discovery for MemoryOverlay {
    async fn find_peers(&self, service_tag: &str) -> Result<Vec<PeerAddress>, CoreError> {
        let state = self.network.state();
        Ok(state
            .providers
            .get(service_tag)
            .map(|peers| {
                peers
                    .iter()
                    .filter(|p| **p != self.id)
                    .map(|p| PeerAddress::new(*p))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn advertise(&self, service_tag: &str, _ttl: Duration) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::Discovery {
                reason: "overlay closed".to_string(),
            });
        }
        self.network.add_provider(service_tag, self.id);
        Ok(())
    }

    fn local_peer_id(&self) -> PeerId {
        self.id
    }
}
