//! Proxy side: overlay streams in, protocol services out.

use std::sync::Arc;
use std::time::Duration;

use burrow_core::dispatcher::ProxyDispatcher;
use burrow_core::metrics::TrafficMetrics;
use burrow_core::registry::ProtocolRegistry;
use burrow_core::shutdown::Shutdown;
use burrow_core::transport::{Discovery, Transport};
use tracing::info;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::overlay::Overlay;
use crate::reporter;

/// A started proxy dispatcher wired with the service plugins.
pub struct Proxy {
    dispatcher: ProxyDispatcher,
}

impl Proxy {
    pub async fn start(
        config: &NodeConfig,
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn Discovery>,
        metrics: Arc<TrafficMetrics>,
    ) -> Result<Self, NodeError> {
        let mut registry = ProtocolRegistry::new();
        burrow_protocols::register_services(&mut registry)?;

        let peer_id = discovery.local_peer_id();
        let dispatcher = ProxyDispatcher::new(
            config.dispatcher_config()?,
            transport,
            discovery,
            Arc::new(registry),
            metrics,
        );
        dispatcher.start().await?;
        info!(%peer_id, service_tag = %config.service_tag, "proxy serving");
        Ok(Self { dispatcher })
    }

    /// Shut the services down and close the transport.
    pub async fn stop(&self) -> Result<(), NodeError> {
        self.dispatcher.stop().await?;
        Ok(())
    }
}

/// Run a proxy over the libp2p overlay until `shutdown` fires.
pub async fn run(config: NodeConfig, shutdown: Shutdown) -> Result<(), NodeError> {
    let overlay = Overlay::spawn(config.overlay_config()?)?;
    let metrics = Arc::new(TrafficMetrics::new());

    let proxy =
        match Proxy::start(&config, overlay.handle(), overlay.handle(), metrics.clone()).await {
            Ok(proxy) => proxy,
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

    info!("proxy running, press Ctrl-C to stop");
    shutdown.triggered().await;
    info!("stopping proxy");

    let result = proxy.stop().await;
    overlay.join().await;
    if let Some(task) = reporter {
        let _ = task.await;
    }
    result
}
