//! Proxy dispatcher.
//!
//! Binds each configured service to the overlay listener for its protocol and
//! keeps the local peer advertised under the service tag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::{DispatcherConfig, ServiceSpec};
use crate::error::{CoreError, MultiError};
use crate::metrics::TrafficMetrics;
use crate::protocol::{SharedListener, SharedService};
use crate::registry::ProtocolRegistry;
use crate::shutdown::Shutdown;
use crate::transport::{Discovery, Transport};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Proxy side: overlay streams in, services out.
#[derive(Clone)]
pub struct ProxyDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: DispatcherConfig,
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn Discovery>,
    registry: Arc<ProtocolRegistry>,
    started: AtomicBool,
    services: Mutex<Vec<SharedService>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Shutdown,
    metrics: Arc<TrafficMetrics>,
}

impl ProxyDispatcher {
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn Discovery>,
        registry: Arc<ProtocolRegistry>,
        metrics: Arc<TrafficMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                transport,
                discovery,
                registry,
                started: AtomicBool::new(false),
                services: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                shutdown: Shutdown::new(),
                metrics,
            }),
        }
    }

    /// Create every configured service and its overlay listener, then spawn
    /// one serve task per service plus the advertise loop.
    pub async fn start(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyStarted {
                component: "proxy dispatcher",
            });
        }

        let mut bound: Vec<(SharedService, SharedListener)> =
            Vec::with_capacity(inner.config.protocols.len());
        for spec in &inner.config.protocols {
            match inner.bind(spec).await {
                Ok(pair) => bound.push(pair),
                Err(e) => {
                    for (service, listener) in &bound {
                        if let Err(close_err) = listener.close().await {
                            warn!(
                                protocol = %service.protocol(),
                                error = %close_err,
                                "failed to close listener"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        let mut tasks = Vec::with_capacity(bound.len() + 1);
        let mut services = Vec::with_capacity(bound.len());
        for (service, listener) in bound {
            let protocol = service.protocol().clone();
            info!(%protocol, "serving protocol");
            let span = tracing::info_span!("proxy", %protocol);
            tasks.push(tokio::spawn(
                inner
                    .clone()
                    .serve(service.clone(), listener)
                    .instrument(span),
            ));
            services.push(service);
        }
        tasks.push(tokio::spawn(
            inner
                .clone()
                .advertise_loop()
                .instrument(tracing::info_span!("advertise")),
        ));

        inner.lock_services().extend(services);
        inner.lock_tasks().extend(tasks);
        Ok(())
    }

    /// Shut every service down, close the transport and wait for the serve
    /// and advertise tasks. All errors are reported together.
    pub async fn stop(&self) -> Result<(), MultiError> {
        let inner = &self.inner;
        inner.shutdown.trigger();

        let mut errs = MultiError::new();
        let services = std::mem::take(&mut *inner.lock_services());
        for service in services {
            errs.check(service.shutdown().await);
        }
        errs.check(inner.transport.close().await);

        let tasks = std::mem::take(&mut *inner.lock_tasks());
        for task in tasks {
            errs.check(task.await);
        }
        errs.into_result()
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.inner.shutdown.clone()
    }
}

impl DispatcherInner {
    fn lock_services(&self) -> MutexGuard<'_, Vec<SharedService>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn bind(
        &self,
        spec: &ServiceSpec,
    ) -> Result<(SharedService, SharedListener), CoreError> {
        let service = self.registry.new_service(&spec.protocol, &spec.config)?;
        let listener = self.transport.listen(&spec.protocol).await?;
        Ok((service, listener))
    }

    async fn serve(self: Arc<Self>, service: SharedService, listener: SharedListener) {
        self.metrics.services_running.inc();
        let result = service.serve(listener).await;
        self.metrics.services_running.dec();
        match result {
            Ok(()) => debug!("service stopped"),
            Err(e) => {
                if let Some(e) = self.shutdown.suppress(e) {
                    self.metrics.service_failures.inc();
                    error!(error = %e, "service failed");
                }
            }
        }
    }

    async fn advertise_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.advertise_interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.triggered() => break,
                _ = ticker.tick() => {
                    let tag = &self.config.service_tag;
                    match self.discovery.advertise(tag, self.config.advertise_ttl).await {
                        Ok(()) => debug!(service_tag = %tag, "advertised"),
                        Err(e) => {
                            if let Some(e) = self.shutdown.suppress(e) {
                                warn!(service_tag = %tag, error = %e, "advertise failed");
                            }
                        }
                    }
                }
            }
        }
    }
}
