use std::path::{Path, PathBuf};
use std::time::Duration;

use burrow_core::balancer::ROUND_ROBIN;
use burrow_core::config::{
    DispatcherConfig, ListenSpec, RouterConfig, ServiceSpec, DEFAULT_DIAL_RETRIES,
    DEFAULT_SERVICE_TAG,
};
use burrow_core::protocol::{ProtocolId, ServiceConfig};
use burrow_net::config::DEFAULT_LISTEN_ADDR;
use burrow_net::OverlayConfig;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "burrow.toml";

const DEFAULT_INTERVAL_SECS: u64 = 60 * 60;

/// Which side of the tunnel the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Endpoint,
    Proxy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Version of burrow that wrote the file.
    pub version: String,
    /// Tag proxies advertise under and endpoints look up.
    pub service_tag: String,
    pub logging: LoggingConfig,
    pub p2p: P2pConfig,
    pub proxy: ProxyConfig,
    pub endpoint: EndpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `burrow_core=debug,info`.
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Hex-encoded 32-byte seed of the node identity.
    pub keypair_seed: Option<String>,
    pub listen_addrs: Vec<String>,
    pub boot_nodes: Vec<String>,
    pub enable_mdns: bool,
    pub query_timeout_secs: u64,
    pub traffic_report: TrafficReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficReportConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub protocols: Vec<ServiceEntry>,
    pub advertise_interval_secs: u64,
}

/// A protocol served by the proxy, with its service options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "toml::Table::is_empty")]
    pub config: toml::Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub protocols: Vec<ListenerEntry>,
    pub discovery_interval_secs: u64,
    pub balancer: String,
    pub dial_retries: u32,
}

/// A protocol accepted by the endpoint and the local address it listens on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerEntry {
    pub protocol: String,
    pub listen: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            service_tag: DEFAULT_SERVICE_TAG.to_string(),
            logging: LoggingConfig::default(),
            p2p: P2pConfig::default(),
            proxy: ProxyConfig::default(),
            endpoint: EndpointConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            keypair_seed: None,
            listen_addrs: vec![DEFAULT_LISTEN_ADDR.to_string()],
            boot_nodes: Vec::new(),
            enable_mdns: false,
            query_timeout_secs: 30,
            traffic_report: TrafficReportConfig::default(),
        }
    }
}

impl Default for TrafficReportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 60,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            protocols: vec![
                ServiceEntry {
                    protocol: burrow_protocols::HTTP.to_string(),
                    config: toml::Table::new(),
                },
                ServiceEntry {
                    protocol: burrow_protocols::SOCKS5.to_string(),
                    config: toml::Table::new(),
                },
            ],
            advertise_interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            protocols: vec![
                ListenerEntry {
                    protocol: burrow_protocols::HTTP.to_string(),
                    listen: "127.0.0.1:8010".to_string(),
                },
                ListenerEntry {
                    protocol: burrow_protocols::SOCKS5.to_string(),
                    listen: "127.0.0.1:8020".to_string(),
                },
            ],
            discovery_interval_secs: DEFAULT_INTERVAL_SECS,
            balancer: ROUND_ROBIN.to_string(),
            dial_retries: DEFAULT_DIAL_RETRIES,
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, NodeError> {
        let path = expand_path(path);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            NodeError::config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&contents).map_err(|e| {
            NodeError::config(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Load `path`, writing a fresh default config there first if it does
    /// not exist yet.
    pub fn load_or_init(path: &str) -> Result<Self, NodeError> {
        if expand_path(path).exists() {
            Self::load(path)
        } else {
            tracing::info!(path, "config file not found, initializing");
            Self::init(path)
        }
    }

    /// Write a default configuration with a new random identity to `path`.
    /// An existing file is never overwritten.
    pub fn init(path: &str) -> Result<Self, NodeError> {
        let path = expand_path(path);
        if path.exists() {
            return Err(NodeError::config(format!(
                "config file '{}' already exists",
                path.display()
            )));
        }
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let config = NodeConfig {
            p2p: P2pConfig {
                keypair_seed: Some(hex::encode(seed)),
                ..P2pConfig::default()
            },
            ..NodeConfig::default()
        };
        config.write(&path)?;
        Ok(config)
    }

    fn write(&self, path: &Path) -> Result<(), NodeError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| NodeError::config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Check that everything `side` needs is present and well formed.
    pub fn validate(&self, side: Side) -> Result<(), NodeError> {
        if self.service_tag.is_empty() {
            return Err(NodeError::config("no 'service_tag' config"));
        }
        if self.p2p.keypair_seed.is_none() {
            return Err(NodeError::config("no 'p2p.keypair_seed' config"));
        }
        self.keypair_seed()?;
        match side {
            Side::Proxy => {
                if self.p2p.listen_addrs.is_empty() {
                    return Err(NodeError::config("no 'p2p.listen_addrs' config"));
                }
                if self.proxy.protocols.is_empty() {
                    return Err(NodeError::config("no 'proxy.protocols' config"));
                }
                if self.proxy.advertise_interval_secs == 0 {
                    return Err(NodeError::config(
                        "'proxy.advertise_interval_secs' must be positive",
                    ));
                }
            }
            Side::Endpoint => {
                if self.endpoint.protocols.is_empty() {
                    return Err(NodeError::config("no 'endpoint.protocols' config"));
                }
                if let Some(entry) = self.endpoint.protocols.iter().find(|p| p.listen.is_empty()) {
                    return Err(NodeError::config(format!(
                        "no listen address for endpoint protocol '{}'",
                        entry.protocol
                    )));
                }
                if self.endpoint.balancer.is_empty() {
                    return Err(NodeError::config("no 'endpoint.balancer' config"));
                }
                if self.endpoint.discovery_interval_secs == 0 {
                    return Err(NodeError::config(
                        "'endpoint.discovery_interval_secs' must be positive",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Decoded identity seed, if configured.
    pub fn keypair_seed(&self) -> Result<Option<[u8; 32]>, NodeError> {
        let Some(seed) = &self.p2p.keypair_seed else {
            return Ok(None);
        };
        let bytes = hex::decode(seed)
            .map_err(|e| NodeError::config(format!("invalid 'p2p.keypair_seed': {}", e)))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            NodeError::config(format!(
                "'p2p.keypair_seed' must be 32 bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Some(seed))
    }

    /// Replace the listen address of `protocol`, adding the entry if the
    /// endpoint does not list it yet.
    pub fn set_endpoint_listen(&mut self, protocol: &str, listen: String) {
        match self
            .endpoint
            .protocols
            .iter_mut()
            .find(|p| p.protocol == protocol)
        {
            Some(entry) => entry.listen = listen,
            None => self.endpoint.protocols.push(ListenerEntry {
                protocol: protocol.to_string(),
                listen,
            }),
        }
    }

    fn advertise_interval(&self) -> Duration {
        Duration::from_secs(self.proxy.advertise_interval_secs)
    }

    pub fn overlay_config(&self) -> Result<OverlayConfig, NodeError> {
        let defaults = OverlayConfig::default();
        Ok(OverlayConfig {
            listen_addrs: self.p2p.listen_addrs.clone(),
            boot_nodes: self.p2p.boot_nodes.clone(),
            keypair_seed: self.keypair_seed()?,
            enable_mdns: self.p2p.enable_mdns,
            query_timeout: Duration::from_secs(self.p2p.query_timeout_secs),
            // Records must outlive the gap between two advertisements.
            provider_record_ttl: defaults.provider_record_ttl.max(self.advertise_interval() * 2),
            ..defaults
        })
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            service_tag: self.service_tag.clone(),
            protocols: self
                .endpoint
                .protocols
                .iter()
                .map(|p| ListenSpec {
                    protocol: ProtocolId::from(p.protocol.as_str()),
                    listen: p.listen.clone(),
                })
                .collect(),
            discovery_interval: Duration::from_secs(self.endpoint.discovery_interval_secs),
            balancer: self.endpoint.balancer.clone(),
            dial_retries: self.endpoint.dial_retries,
        }
    }

    pub fn dispatcher_config(&self) -> Result<DispatcherConfig, NodeError> {
        let protocols = self
            .proxy
            .protocols
            .iter()
            .map(|p| {
                Ok(ServiceSpec {
                    protocol: ProtocolId::from(p.protocol.as_str()),
                    config: service_config(&p.config)?,
                })
            })
            .collect::<Result<Vec<_>, NodeError>>()?;
        Ok(DispatcherConfig {
            service_tag: self.service_tag.clone(),
            protocols,
            advertise_interval: self.advertise_interval(),
            advertise_ttl: self.advertise_interval() * 2,
        })
    }
}

fn service_config(table: &toml::Table) -> Result<ServiceConfig, NodeError> {
    match serde_json::to_value(table) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(NodeError::config("service config must be a table")),
        Err(e) => Err(NodeError::config(format!("invalid service config: {}", e))),
    }
}
