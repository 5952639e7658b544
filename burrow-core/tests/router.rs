//! End-to-end routing over the in-memory overlay: client connection in,
//! balancer pick, dial with eviction on failure, relay to an echo peer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use burrow_core::balancer::BalancerRegistry;
use burrow_core::config::{ListenSpec, RouterConfig};
use burrow_core::memory::{ChannelListener, MemoryNetwork, MemoryOverlay};
use burrow_core::metrics::TrafficMetrics;
use burrow_core::protocol::{BoxConn, Listener, ProtocolId, SharedListener};
use burrow_core::registry::{ListenerFactory, ProtocolRegistry};
use burrow_core::router::EndpointRouter;
use burrow_core::transport::{Discovery, Transport};
use libp2p::PeerId;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

const TAG: &str = "p2p-proxy/0.0.1";

type Inlet = Arc<Mutex<Option<mpsc::Sender<BoxConn>>>>;

fn echo() -> ProtocolId {
    ProtocolId::from("/echo/1.0.0")
}

/// Listener factory whose listener is fed by the test through `inlet`.
fn inlet_factory(inlet: Inlet) -> ListenerFactory {
    Box::new(move |_span, _listen| {
        let (listener, tx) = ChannelListener::new(echo());
        *inlet.lock().unwrap() = Some(tx);
        Ok(Arc::new(listener) as SharedListener)
    })
}

async fn connect(inlet: &Inlet) -> DuplexStream {
    let (client, server) = tokio::io::duplex(4096);
    let tx = inlet.lock().unwrap().clone().unwrap();
    assert!(tx.send(Box::new(server)).await.is_ok());
    client
}

async fn spawn_echo_peer(node: &MemoryOverlay) {
    let listener = node.listen(&echo()).await.unwrap();
    tokio::spawn(async move {
        while let Ok(conn) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = tokio::io::split(conn);
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
}

async fn wait_for_candidates(router: &EndpointRouter, n: usize) {
    for _ in 0..100 {
        if router.candidates().len() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} candidates, got {:?}", router.candidates());
}

fn build_router(
    net: &MemoryNetwork,
    dial_retries: u32,
    metrics: Arc<TrafficMetrics>,
) -> (EndpointRouter, Inlet) {
    let inlet: Inlet = Arc::new(Mutex::new(None));
    let mut registry = ProtocolRegistry::new();
    registry
        .register_listener_factory(echo(), "echo", inlet_factory(inlet.clone()))
        .unwrap();

    let endpoint = Arc::new(net.node());
    let config = RouterConfig {
        service_tag: TAG.to_string(),
        protocols: vec![ListenSpec {
            protocol: echo(),
            listen: "memory".to_string(),
        }],
        dial_retries,
        ..RouterConfig::default()
    };
    let router = EndpointRouter::new(
        config,
        endpoint.clone(),
        endpoint,
        Arc::new(registry),
        Arc::new(BalancerRegistry::with_defaults()),
        metrics,
    );
    (router, inlet)
}

#[tokio::test]
async fn test_failover_evicts_failing_peer() {
    let net = MemoryNetwork::new();
    let proxy_b = net.node();
    spawn_echo_peer(&proxy_b).await;
    proxy_b.advertise(TAG, Duration::from_secs(60)).await.unwrap();

    // Peer A is listed after B, so round robin's first pick lands on it.
    let peer_a = PeerId::random();
    let peer_b = proxy_b.local_peer_id();
    net.add_provider(TAG, peer_a);
    net.fail_dials(peer_a, true);

    let metrics = Arc::new(TrafficMetrics::new());
    let (router, inlet) = build_router(&net, 3, metrics.clone());
    router.start().await.unwrap();
    wait_for_candidates(&router, 2).await;
    assert_eq!(router.candidates(), vec![peer_b, peer_a]);

    let mut first = connect(&inlet).await;
    first.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    first.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    assert_eq!(net.dial_count(&peer_a), 1);
    assert_eq!(router.candidates(), vec![peer_b]);

    let mut second = connect(&inlet).await;
    second.write_all(b"pong").await.unwrap();
    second.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");

    assert_eq!(net.dial_count(&peer_a), 1);
    assert_eq!(net.dial_count(&peer_b), 2);
    assert_eq!(metrics.peers_evicted.get(), 1);
    assert_eq!(metrics.streams_opened.get(), 2);

    drop(first);
    drop(second);
    router.stop().await.unwrap();
}

#[tokio::test]
async fn test_retry_budget_exhausted_drops_client() {
    let net = MemoryNetwork::new();
    let peer_a = PeerId::random();
    let peer_b = PeerId::random();
    for peer in [peer_a, peer_b] {
        net.add_provider(TAG, peer);
        net.fail_dials(peer, true);
    }

    let metrics = Arc::new(TrafficMetrics::new());
    let (router, inlet) = build_router(&net, 1, metrics.clone());
    router.start().await.unwrap();
    wait_for_candidates(&router, 2).await;

    let mut client = connect(&inlet).await;
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf))
        .await
        .expect("client should be dropped")
        .unwrap();
    assert_eq!(n, 0);

    assert_eq!(net.dial_count(&peer_a) + net.dial_count(&peer_b), 1);
    assert_eq!(router.candidates().len(), 1);
    assert_eq!(metrics.connections_accepted.get(), 1);
    assert_eq!(metrics.streams_opened.get(), 0);
    assert_eq!(metrics.relays_completed.get() + metrics.relay_errors.get(), 0);

    router.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_listeners() {
    let net = MemoryNetwork::new();
    let (router, inlet) = build_router(&net, 3, Arc::new(TrafficMetrics::new()));
    router.start().await.unwrap();
    router.stop().await.unwrap();

    // The listener is gone; queued connections are never accepted.
    let tx = inlet.lock().unwrap().clone().unwrap();
    let (_client, server) = tokio::io::duplex(64);
    let _ = tx.send(Box::new(server)).await;
    assert!(router.shutdown_signal().is_triggered());
    assert!(router.local_addrs().is_empty());
}
