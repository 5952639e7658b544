use std::time::Duration;

use crate::balancer::ROUND_ROBIN;
use crate::protocol::{ProtocolId, ServiceConfig};

/// Default tag peers advertise and look each other up under.
pub const DEFAULT_SERVICE_TAG: &str = "p2p-proxy/0.0.1";
/// Default dial attempts per client connection.
pub const DEFAULT_DIAL_RETRIES: u32 = 3;
/// Default interval between discovery refreshes and between advertisements.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// One endpoint-side listener: accept `protocol` clients on `listen`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenSpec {
    pub protocol: ProtocolId,
    pub listen: String,
}

/// One proxy-side service: serve `protocol` with `config`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub protocol: ProtocolId,
    pub config: ServiceConfig,
}

/// Endpoint router settings.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub service_tag: String,
    /// Listeners in the order they are opened.
    pub protocols: Vec<ListenSpec>,
    pub discovery_interval: Duration,
    /// Balancer strategy name.
    pub balancer: String,
    /// Dial attempts per client connection.
    pub dial_retries: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            service_tag: DEFAULT_SERVICE_TAG.to_string(),
            protocols: Vec::new(),
            discovery_interval: DEFAULT_INTERVAL,
            balancer: ROUND_ROBIN.to_string(),
            dial_retries: DEFAULT_DIAL_RETRIES,
        }
    }
}

/// Proxy dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub service_tag: String,
    /// Services in the order they are started.
    pub protocols: Vec<ServiceSpec>,
    pub advertise_interval: Duration,
    /// How long an advertisement stays valid.
    pub advertise_ttl: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            service_tag: DEFAULT_SERVICE_TAG.to_string(),
            protocols: Vec::new(),
            advertise_interval: DEFAULT_INTERVAL,
            advertise_ttl: DEFAULT_INTERVAL,
        }
    }
}
