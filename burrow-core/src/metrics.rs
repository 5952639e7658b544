use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Traffic metrics shared by the endpoint router and the proxy dispatcher.
pub struct TrafficMetrics {
    pub connections_accepted: Counter,
    pub streams_opened: Counter,
    pub dial_failures: Counter,
    pub peers_evicted: Counter,
    pub relays_completed: Counter,
    pub relay_errors: Counter,
    pub candidates: Gauge,
    pub services_running: Gauge,
    pub service_failures: Counter,
    pub registry: Registry,
}

impl TrafficMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("burrow");

        let connections_accepted = Counter::default();
        let streams_opened = Counter::default();
        let dial_failures = Counter::default();
        let peers_evicted = Counter::default();
        let relays_completed = Counter::default();
        let relay_errors = Counter::default();
        let candidates = Gauge::default();
        let services_running = Gauge::default();
        let service_failures = Counter::default();

        registry.register(
            "connections_accepted",
            "Client connections accepted by endpoint listeners",
            connections_accepted.clone(),
        );
        registry.register(
            "streams_opened",
            "Overlay streams opened to proxy peers",
            streams_opened.clone(),
        );
        registry.register(
            "dial_failures",
            "Failed attempts to open an overlay stream",
            dial_failures.clone(),
        );
        registry.register(
            "peers_evicted",
            "Candidates removed after a dial failure",
            peers_evicted.clone(),
        );
        registry.register(
            "relays_completed",
            "Relays that ended without error",
            relays_completed.clone(),
        );
        registry.register(
            "relay_errors",
            "Relays that ended with an error",
            relay_errors.clone(),
        );
        registry.register(
            "candidates",
            "Peers currently in the candidate set",
            candidates.clone(),
        );
        registry.register(
            "services_running",
            "Proxy services currently serving",
            services_running.clone(),
        );
        registry.register(
            "service_failures",
            "Proxy services that stopped without being shut down",
            service_failures.clone(),
        );

        Self {
            connections_accepted,
            streams_opened,
            dial_failures,
            peers_evicted,
            relays_completed,
            relay_errors,
            candidates,
            services_running,
            service_failures,
            registry,
        }
    }

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut buf, &self.registry) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        buf
    }
}

impl Default for TrafficMetrics {
    fn default() -> Self {
        Self::new()
    }
}
