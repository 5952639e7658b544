use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use burrow_core::protocol::{BoxConn, ProtocolId, SharedListener};
use burrow_core::transport::{Discovery, PeerAddress, Transport};
use burrow_core::CoreError;
use futures::StreamExt;
use libp2p::kad::{self, GetProvidersOk, QueryId, QueryResult, RecordKey};
use libp2p::swarm::SwarmEvent;
use libp2p::{identify, mdns, Multiaddr, PeerId, Swarm, SwarmBuilder};
use tokio::sync::{mpsc, oneshot};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::behaviour::{build_behaviour, BurrowBehaviour, BurrowBehaviourEvent};
use crate::config::OverlayConfig;
use crate::discovery::BootNodes;
use crate::error::NetError;
use crate::listener::OverlayListener;
use crate::protocol::stream_protocol;

const COMMAND_BUFFER: usize = 64;

enum Command {
    FindProviders {
        key: RecordKey,
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    StartProviding {
        key: RecordKey,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    ListenAddrs {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
}

struct PendingProviders {
    found: HashSet<PeerId>,
    reply: oneshot::Sender<Vec<PeerId>>,
}

/// The libp2p swarm and its event loop.
///
/// Created together with an [`OverlayHandle`]; the node runs until the handle
/// is closed or every handle is dropped.
pub struct OverlayNode {
    swarm: Swarm<BurrowBehaviour>,
    commands: mpsc::Receiver<Command>,
    pending: HashMap<QueryId, PendingProviders>,
    closed: CancellationToken,
}

impl OverlayNode {
    /// Build the swarm, start listening on the configured addresses and dial
    /// the boot nodes.
    pub fn new(config: OverlayConfig) -> Result<(Self, OverlayHandle), NetError> {
        let keypair = if let Some(seed) = &config.keypair_seed {
            let mut seed_bytes = *seed;
            libp2p::identity::Keypair::ed25519_from_bytes(&mut seed_bytes).map_err(|e| {
                NetError::NetworkError {
                    reason: format!("invalid keypair seed: {}", e),
                }
            })?
        } else {
            libp2p::identity::Keypair::generate_ed25519()
        };

        let idle_timeout = config.idle_connection_timeout;
        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )
            .map_err(|e| NetError::NetworkError {
                reason: format!("tcp transport: {}", e),
            })?
            .with_behaviour(|key| build_behaviour(key, &config))
            .map_err(|e| NetError::NetworkError {
                reason: format!("behaviour: {}", e),
            })?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(idle_timeout))
            .build();

        for addr in &config.listen_addrs {
            let listen_addr: Multiaddr = addr.parse().map_err(|e| NetError::NetworkError {
                reason: format!("parse listen addr {}: {}", addr, e),
            })?;
            swarm
                .listen_on(listen_addr)
                .map_err(|e| NetError::NetworkError {
                    reason: format!("listen: {}", e),
                })?;
        }

        let boot = BootNodes::new(&config.boot_nodes);
        for (peer, addr) in boot.with_peer_ids() {
            swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer, addr.clone());
        }
        for addr in boot.addrs() {
            swarm
                .dial(addr.clone())
                .map_err(|e| NetError::ConnectionError {
                    reason: format!("dial boot node {}: {}", addr, e),
                })?;
        }
        if boot.with_peer_ids().next().is_some() {
            if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
                warn!("kademlia bootstrap: {}", e);
            }
        }

        let local_peer_id = *swarm.local_peer_id();
        let control = swarm.behaviour().stream.new_control();
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let closed = CancellationToken::new();

        info!(
            peer_id = %local_peer_id,
            mdns = config.enable_mdns,
            boot_nodes = boot.addrs().len(),
            "overlay node started"
        );

        let handle = OverlayHandle {
            local_peer_id,
            commands: tx,
            control,
            closed: closed.clone(),
            dial_timeout: config.dial_timeout,
        };
        let node = Self {
            swarm,
            commands: rx,
            pending: HashMap::new(),
            closed,
        };
        Ok((node, handle))
    }

    /// Get the local peer ID.
    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    /// Main event loop. Processes swarm events and handle commands.
    pub async fn run(mut self) -> Result<(), NetError> {
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => {
                    info!("overlay node stopped");
                    return Ok(());
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("all overlay handles dropped, stopping");
                        return Ok(());
                    }
                },
                event = self.swarm.next() => match event {
                    Some(event) => self.handle_swarm_event(event),
                    None => {
                        return Err(NetError::NetworkError {
                            reason: "swarm stream ended".to_string(),
                        });
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::FindProviders { key, reply } => {
                let id = self.swarm.behaviour_mut().kademlia.get_providers(key);
                self.pending.insert(
                    id,
                    PendingProviders {
                        found: HashSet::new(),
                        reply,
                    },
                );
            }
            Command::StartProviding { key, reply } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .kademlia
                    .start_providing(key)
                    .map(|_| ())
                    .map_err(|e| NetError::QueryError {
                        reason: format!("start providing: {}", e),
                    });
                let _ = reply.send(result);
            }
            Command::ListenAddrs { reply } => {
                let _ = reply.send(self.swarm.listeners().cloned().collect());
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<BurrowBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event),
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "listening on new address");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                debug!(%peer_id, ?endpoint, "connection established");
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                debug!(%peer_id, ?cause, "connection closed");
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!(?peer_id, %error, "outgoing connection failed");
            }
            other => {
                debug!(?other, "other swarm event");
            }
        }
    }

    fn handle_behaviour_event(&mut self, event: BurrowBehaviourEvent) {
        match event {
            BurrowBehaviourEvent::Kademlia(kad::Event::OutboundQueryProgressed {
                id,
                result,
                step,
                ..
            }) => self.handle_query_progress(id, result, step.last),
            BurrowBehaviourEvent::Kademlia(kad::Event::RoutingUpdated { peer, .. }) => {
                debug!(%peer, "routing table updated");
            }
            BurrowBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
                debug!(
                    %peer_id,
                    protocol = %info.protocol_version,
                    agent = %info.agent_version,
                    "identified peer"
                );
                for addr in info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                }
            }
            BurrowBehaviourEvent::Mdns(mdns::Event::Discovered(peers)) => {
                for (peer_id, addr) in peers {
                    debug!(%peer_id, %addr, "mdns discovered peer");
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                }
            }
            _ => {}
        }
    }

    fn handle_query_progress(&mut self, id: QueryId, result: QueryResult, last: bool) {
        match result {
            QueryResult::GetProviders(Ok(GetProvidersOk::FoundProviders { providers, .. })) => {
                if let Some(pending) = self.pending.get_mut(&id) {
                    pending.found.extend(providers);
                }
            }
            QueryResult::GetProviders(Ok(_)) => {}
            QueryResult::GetProviders(Err(e)) => {
                debug!(error = %e, "provider lookup ended early");
            }
            QueryResult::StartProviding(Ok(_)) => {
                debug!("provider record published");
            }
            QueryResult::StartProviding(Err(e)) => {
                debug!(error = %e, "provider record not replicated");
            }
            QueryResult::Bootstrap(Ok(ok)) => {
                debug!(remaining = ok.num_remaining, "bootstrap progressed");
            }
            QueryResult::Bootstrap(Err(e)) => {
                warn!(error = %e, "kademlia bootstrap failed");
            }
            _ => {}
        }

        if last {
            if let Some(pending) = self.pending.remove(&id) {
                let local = *self.swarm.local_peer_id();
                let peers = pending.found.into_iter().filter(|p| *p != local).collect();
                let _ = pending.reply.send(peers);
            }
        }
    }
}

/// Cloneable handle to a running [`OverlayNode`].
#[derive(Clone)]
pub struct OverlayHandle {
    local_peer_id: PeerId,
    commands: mpsc::Sender<Command>,
    control: libp2p_stream::Control,
    closed: CancellationToken,
    dial_timeout: Duration,
}

impl OverlayHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, NetError> {
        if self.closed.is_cancelled() {
            return Err(NetError::ChannelError {
                reason: "overlay node stopped".to_string(),
            });
        }
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| NetError::ChannelError {
                reason: "overlay node stopped".to_string(),
            })?;
        rx.await.map_err(|_| NetError::ChannelError {
            reason: "overlay node dropped the request".to_string(),
        })
    }

    /// Addresses the swarm currently listens on.
    pub async fn listen_addrs(&self) -> Result<Vec<Multiaddr>, NetError> {
        self.request(|reply| Command::ListenAddrs { reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Transport for OverlayHandle {
    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: &ProtocolId,
    ) -> Result<BoxConn, CoreError> {
        let stream_protocol = stream_protocol(protocol)?;
        let mut control = self.control.clone();
        let dial_err = |reason: String| CoreError::Dial {
            peer,
            protocol: protocol.clone(),
            reason,
        };
        let stream = tokio::time::timeout(
            self.dial_timeout,
            control.open_stream(peer, stream_protocol),
        )
        .await
        .map_err(|_| dial_err("timed out".to_string()))?
        .map_err(|e| dial_err(e.to_string()))?;
        Ok(Box::new(stream.compat()))
    }

    async fn listen(&self, protocol: &ProtocolId) -> Result<SharedListener, CoreError> {
        let stream_protocol = stream_protocol(protocol)?;
        let incoming = self
            .control
            .clone()
            .accept(stream_protocol)
            .map_err(|e| NetError::ProtocolError {
                reason: format!("listen on {}: {}", protocol, e),
            })?;
        Ok(Arc::new(OverlayListener::new(
            protocol.clone(),
            incoming,
            self.closed.child_token(),
        )))
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.closed.cancel();
        Ok(())
    }
}

#[async_trait]
impl Discovery for OverlayHandle {
    async fn find_peers(&self, service_tag: &str) -> Result<Vec<PeerAddress>, CoreError> {
        let key = RecordKey::new(&service_tag);
        let peers = self
            .request(|reply| Command::FindProviders { key, reply })
            .await?;
        Ok(peers.into_iter().map(PeerAddress::new).collect())
    }

    async fn advertise(&self, service_tag: &str, _ttl: Duration) -> Result<(), CoreError> {
        let key = RecordKey::new(&service_tag);
        self.request(|reply| Command::StartProviding { key, reply })
            .await??;
        Ok(())
    }

    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }
}
