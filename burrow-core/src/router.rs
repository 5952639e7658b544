//! Endpoint router.
//!
//! Accepts client connections on local listeners, picks a proxy peer through
//! the balancer, opens an overlay stream to it and relays bytes. A peer whose
//! dial fails is evicted from the candidate set; the next discovery refresh
//! may bring it back.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use libp2p::PeerId;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use crate::balancer::{BalancerRegistry, SharedBalancer};
use crate::candidates::CandidateSet;
use crate::config::RouterConfig;
use crate::error::{CoreError, MultiError};
use crate::metrics::TrafficMetrics;
use crate::protocol::{BoxConn, ProtocolId, SharedListener};
use crate::registry::ProtocolRegistry;
use crate::relay::relay;
use crate::shutdown::{is_listener_closed, Shutdown};
use crate::transport::{Discovery, Transport};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Endpoint side of the proxy: local listeners in, overlay streams out.
#[derive(Clone)]
pub struct EndpointRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    config: RouterConfig,
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn Discovery>,
    registry: Arc<ProtocolRegistry>,
    balancers: Arc<BalancerRegistry>,
    candidates: Arc<CandidateSet>,
    balancer: OnceLock<SharedBalancer>,
    listeners: Mutex<Vec<SharedListener>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Shutdown,
    metrics: Arc<TrafficMetrics>,
}

impl EndpointRouter {
    pub fn new(
        config: RouterConfig,
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn Discovery>,
        registry: Arc<ProtocolRegistry>,
        balancers: Arc<BalancerRegistry>,
        metrics: Arc<TrafficMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                config,
                transport,
                discovery,
                registry,
                balancers,
                candidates: Arc::new(CandidateSet::new()),
                balancer: OnceLock::new(),
                listeners: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                shutdown: Shutdown::new(),
                metrics,
            }),
        }
    }

    /// Build the balancer, open every configured listener and spawn the
    /// refresh and accept loops. A wiring error aborts before anything is
    /// spawned and closes the listeners opened so far.
    pub async fn start(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let balancer = inner
            .balancers
            .new_balancer(&inner.config.balancer, inner.candidates.clone())?;
        if inner.balancer.set(balancer).is_err() {
            return Err(CoreError::AlreadyStarted {
                component: "endpoint router",
            });
        }

        let mut opened: Vec<SharedListener> = Vec::with_capacity(inner.config.protocols.len());
        for spec in &inner.config.protocols {
            match inner.registry.new_listener(&spec.protocol, &spec.listen) {
                Ok(listener) => opened.push(listener),
                Err(e) => {
                    for l in &opened {
                        if let Err(close_err) = l.close().await {
                            warn!(
                                protocol = %l.protocol(),
                                error = %close_err,
                                "failed to close listener"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        let mut tasks = Vec::with_capacity(opened.len() + 1);
        tasks.push(tokio::spawn(
            inner.clone().refresh_loop().instrument(tracing::info_span!("refresh")),
        ));
        for listener in &opened {
            let protocol = listener.protocol().clone();
            match listener.local_addr() {
                Some(addr) => info!(%protocol, %addr, "endpoint listening"),
                None => info!(%protocol, "endpoint listening"),
            }
            let span = tracing::info_span!("endpoint", %protocol);
            tasks.push(tokio::spawn(
                inner.clone().accept_loop(listener.clone()).instrument(span),
            ));
        }

        inner.lock_listeners().extend(opened);
        inner.lock_tasks().extend(tasks);
        Ok(())
    }

    /// Stop accepting, close every listener and the transport, and wait for
    /// the router's loops to exit. All close errors are reported together.
    pub async fn stop(&self) -> Result<(), MultiError> {
        let inner = &self.inner;
        inner.shutdown.trigger();

        let mut errs = MultiError::new();
        let listeners = std::mem::take(&mut *inner.lock_listeners());
        for listener in listeners {
            errs.check(listener.close().await);
        }
        errs.check(inner.transport.close().await);

        let tasks = std::mem::take(&mut *inner.lock_tasks());
        for task in tasks {
            errs.check(task.await);
        }
        errs.into_result()
    }

    /// Query discovery once and merge the result into the candidate set.
    /// Returns how many peers were new.
    pub async fn refresh(&self) -> Result<usize, CoreError> {
        self.inner.refresh().await
    }

    /// Open an overlay stream for `protocol`, trying up to `retries` peers.
    pub async fn open_upstream(
        &self,
        protocol: &ProtocolId,
        retries: u32,
    ) -> Result<BoxConn, CoreError> {
        self.inner.open_upstream(protocol, retries).await
    }

    /// Snapshot of the candidate set.
    pub fn candidates(&self) -> Vec<PeerId> {
        self.inner.candidates.snapshot()
    }

    /// Socket addresses of the listeners that have one.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner
            .lock_listeners()
            .iter()
            .filter_map(|l| l.local_addr())
            .collect()
    }

    pub fn balancer_name(&self) -> &str {
        self.inner
            .balancer
            .get()
            .map(|b| b.name())
            .unwrap_or(self.inner.config.balancer.as_str())
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.inner.shutdown.clone()
    }
}

impl RouterInner {
    fn lock_listeners(&self) -> MutexGuard<'_, Vec<SharedListener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh(&self) -> Result<usize, CoreError> {
        let local = self.discovery.local_peer_id();
        let found = self.discovery.find_peers(&self.config.service_tag).await?;
        let added = self
            .candidates
            .merge(found.into_iter().map(|p| p.id).filter(|id| *id != local));
        let total = self.candidates.len();
        self.metrics.candidates.set(total as i64);
        if added > 0 {
            info!(added, total, "discovered proxy peers");
        } else {
            debug!(total, "no new proxy peers");
        }
        Ok(added)
    }

    async fn refresh_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.discovery_interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.triggered() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        if let Some(e) = self.shutdown.suppress(e) {
                            warn!(error = %e, "peer discovery failed");
                        }
                    }
                }
            }
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: SharedListener) {
        let protocol = listener.protocol().clone();
        loop {
            let conn = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    if let Some(e) = self.shutdown.suppress(e) {
                        if is_listener_closed(&e) {
                            error!("listener closed unexpectedly, endpoint stopped accepting");
                        } else {
                            error!(error = %e, "accept failed, listener stopped");
                        }
                    }
                    return;
                }
            };
            self.metrics.connections_accepted.inc();
            let inner = self.clone();
            let protocol = protocol.clone();
            tokio::spawn(
                async move { inner.handle(conn, protocol).await }.instrument(tracing::Span::current()),
            );
        }
    }

    async fn handle(&self, conn: BoxConn, protocol: ProtocolId) {
        let stream = match self.open_upstream(&protocol, self.config.dial_retries).await {
            Ok(stream) => stream,
            Err(e) => {
                if let Some(e) = self.shutdown.suppress(e) {
                    warn!(error = %e, "no proxy stream, dropping client");
                }
                return;
            }
        };
        match relay(conn, stream).await {
            Ok(()) => {
                self.metrics.relays_completed.inc();
            }
            Err(e) => {
                self.metrics.relay_errors.inc();
                if let Some(e) = self.shutdown.suppress(e) {
                    warn!(error = %e, "relay ended with error");
                }
            }
        };
    }

    fn balancer(&self) -> Result<&SharedBalancer, CoreError> {
        self.balancer.get().ok_or_else(|| CoreError::Transport {
            reason: "endpoint router not started".to_string(),
        })
    }

    async fn open_upstream(
        &self,
        protocol: &ProtocolId,
        mut retries: u32,
    ) -> Result<BoxConn, CoreError> {
        let balancer = self.balancer()?;
        loop {
            let peer = match balancer.next(protocol) {
                Ok(peer) => peer,
                Err(e) if e.is_not_enough_proxies() && retries > 0 => {
                    debug!(%protocol, "candidate set empty, refreshing");
                    self.refresh().await?;
                    // One more pick and at most one dial after an empty set.
                    retries = 0;
                    balancer.next(protocol)?
                }
                Err(e) => return Err(e),
            };

            match self.transport.open_stream(peer, protocol).await {
                Ok(stream) => {
                    self.metrics.streams_opened.inc();
                    debug!(%peer, %protocol, "opened proxy stream");
                    return Ok(stream);
                }
                Err(e) => {
                    self.metrics.dial_failures.inc();
                    warn!(%peer, %protocol, error = %e, "dial failed, evicting peer");
                    if self.candidates.remove(&peer) {
                        self.metrics.peers_evicted.inc();
                        self.metrics.candidates.set(self.candidates.len() as i64);
                    }
                    retries = retries.saturating_sub(1);
                    if retries == 0 {
                        return Err(e);
                    }
                }
            }
        }
    }
}
