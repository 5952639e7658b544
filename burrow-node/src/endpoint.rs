//! Endpoint side: local clients in, overlay streams out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use burrow_core::balancer::BalancerRegistry;
use burrow_core::metrics::TrafficMetrics;
use burrow_core::registry::ProtocolRegistry;
use burrow_core::router::EndpointRouter;
use burrow_core::shutdown::Shutdown;
use burrow_core::transport::{Discovery, Transport};
use tracing::info;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::overlay::Overlay;
use crate::reporter;

/// A started endpoint router wired with the TCP listener plugins.
pub struct Endpoint {
    router: EndpointRouter,
}

impl Endpoint {
    pub async fn start(
        config: &NodeConfig,
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn Discovery>,
        metrics: Arc<TrafficMetrics>,
    ) -> Result<Self, NodeError> {
        let mut registry = ProtocolRegistry::new();
        burrow_protocols::register_listeners(&mut registry)?;

        let router = EndpointRouter::new(
            config.router_config(),
            transport,
            discovery,
            Arc::new(registry),
            Arc::new(BalancerRegistry::with_defaults()),
            metrics,
        );
        router.start().await?;
        for addr in router.local_addrs() {
            info!(%addr, balancer = router.balancer_name(), "endpoint listening");
        }
        Ok(Self { router })
    }

    pub fn router(&self) -> &EndpointRouter {
        &self.router
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.router.local_addrs()
    }

    /// Close the listeners and the transport.
    pub async fn stop(&self) -> Result<(), NodeError> {
        self.router.stop().await?;
        Ok(())
    }
}

/// Run an endpoint over the libp2p overlay until `shutdown` fires.
pub async fn run(config: NodeConfig, shutdown: Shutdown) -> Result<(), NodeError> {
    let overlay = Overlay::spawn(config.overlay_config()?)?;
    let metrics = Arc::new(TrafficMetrics::new());

    let endpoint =
        match Endpoint::start(&config, overlay.handle(), overlay.handle(), metrics.clone()).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                overlay.join().await;
                return Err(e);
            }
        };
    let reporter = config.p2p.traffic_report.enabled.then(|| {
        reporter::spawn(
            metrics,
            Duration::from_secs(config.p2p.traffic_report.interval_secs.max(1)),
            shutdown.child(),
        )
    });

    info!("endpoint running, press Ctrl-C to stop");
    shutdown.triggered().await;
    info!("stopping endpoint");

    let result = endpoint.stop().await;
    overlay.join().await;
    if let Some(task) = reporter {
        let _ = task.await;
    }
    result
}
