use libp2p::identity::Keypair;
use libp2p::kad::{self, store::MemoryStore};
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{identify, mdns, StreamProtocol};

use crate::config::OverlayConfig;
use crate::protocol::{AGENT_VERSION, IDENTIFY_PROTOCOL, KAD_PROTOCOL};

/// Combined network behaviour for a burrow node.
#[derive(NetworkBehaviour)]
pub struct BurrowBehaviour {
    /// Kademlia DHT holding service-tag provider records.
    pub kademlia: kad::Behaviour<MemoryStore>,
    /// Identify protocol, used to learn peers' listen addresses.
    pub identify: identify::Behaviour,
    /// Local network discovery, off unless enabled.
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    /// Protocol-tagged byte streams.
    pub stream: libp2p_stream::Behaviour,
}

/// Build a BurrowBehaviour from a keypair.
///
/// Returns `Result<BurrowBehaviour, Box<dyn Error + Send + Sync>>` to conform
/// to the `TryIntoBehaviour` trait expected by `SwarmBuilder::with_behaviour`.
pub fn build_behaviour(
    keypair: &Keypair,
    config: &OverlayConfig,
) -> Result<BurrowBehaviour, Box<dyn std::error::Error + Send + Sync>> {
    let peer_id = keypair.public().to_peer_id();

    // --- Kademlia ---
    let mut kad_config = kad::Config::new(StreamProtocol::new(KAD_PROTOCOL));
    kad_config.set_query_timeout(config.query_timeout);
    kad_config.set_provider_record_ttl(Some(config.provider_record_ttl));
    let mut kademlia =
        kad::Behaviour::with_config(peer_id, MemoryStore::new(peer_id), kad_config);
    // Answer DHT queries even before an external address is confirmed.
    kademlia.set_mode(Some(kad::Mode::Server));

    // --- Identify ---
    let identify = identify::Behaviour::new(
        identify::Config::new(IDENTIFY_PROTOCOL.to_string(), keypair.public())
            .with_agent_version(AGENT_VERSION.to_string()),
    );

    // --- mDNS ---
    let mdns = if config.enable_mdns {
        Some(
            mdns::tokio::Behaviour::new(mdns::Config::default(), peer_id)
                .map_err(|e| format!("mdns behaviour: {}", e))?,
        )
    } else {
        None
    };

    Ok(BurrowBehaviour {
        kademlia,
        identify,
        mdns: Toggle::from(mdns),
        stream: libp2p_stream::Behaviour::new(),
    })
}
