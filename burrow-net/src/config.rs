use std::time::Duration;

/// Default libp2p listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "/ip4/0.0.0.0/tcp/8888";

/// Configuration for an overlay node.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Multiaddrs to listen on. Empty means dial-only.
    pub listen_addrs: Vec<String>,
    /// Bootstrap node addresses (multiaddr strings, ideally ending in `/p2p/<id>`).
    pub boot_nodes: Vec<String>,
    /// Optional keypair seed (32 bytes). If None, generates random.
    pub keypair_seed: Option<[u8; 32]>,
    /// Discover peers on the local network.
    pub enable_mdns: bool,
    /// Upper bound on a Kademlia query.
    pub query_timeout: Duration,
    /// How long provider records stay valid.
    pub provider_record_ttl: Duration,
    pub idle_connection_timeout: Duration,
    /// Upper bound on opening an outbound stream, dial included.
    pub dial_timeout: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec![DEFAULT_LISTEN_ADDR.to_string()],
            boot_nodes: Vec::new(),
            keypair_seed: None,
            enable_mdns: false,
            query_timeout: Duration::from_secs(30),
            provider_record_ttl: Duration::from_secs(60 * 60 * 2),
            idle_connection_timeout: Duration::from_secs(60),
            dial_timeout: Duration::from_secs(30),
        }
    }
}
