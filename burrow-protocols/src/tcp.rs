use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use burrow_core::protocol::{BoxConn, Listener, ProtocolId, SharedListener};
use burrow_core::registry::ListenerFactory;
use burrow_core::shutdown::listener_closed;
use burrow_core::CoreError;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Span};

/// Local TCP socket accepting clients of one protocol.
///
/// Closing releases the port once any in-progress `accept` has returned.
pub struct TcpProtocolListener {
    protocol: ProtocolId,
    inner: Mutex<Option<Arc<TcpListener>>>,
    local_addr: SocketAddr,
    closed: CancellationToken,
    span: Span,
}

impl TcpProtocolListener {
    /// Bind `listen` (`host:port`). Must run inside a tokio runtime.
    pub fn bind(protocol: ProtocolId, listen: &str, span: Span) -> io::Result<Self> {
        let std_listener = std::net::TcpListener::bind(listen)?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            protocol,
            inner: Mutex::new(Some(Arc::new(listener))),
            local_addr,
            closed: CancellationToken::new(),
            span,
        })
    }
}

#[async_trait]
impl Listener for TcpProtocolListener {
    fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    async fn accept(&self) -> io::Result<BoxConn> {
        let listener = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(listener_closed)?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(listener_closed()),
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let _ = stream.set_nodelay(true);
                debug!(parent: &self.span, %peer, "accepted client");
                Ok(Box::new(stream))
            }
        }
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.cancel();
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

/// Listener factory binding a [`TcpProtocolListener`] for `protocol`.
pub fn listener_factory(protocol: ProtocolId) -> ListenerFactory {
    Box::new(move |span, listen| {
        let listener = TcpProtocolListener::bind(protocol.clone(), listen, span.clone())
            .map_err(|e| CoreError::Factory {
                protocol: protocol.clone(),
                reason: format!("listen on {listen}: {e}"),
            })?;
        info!(parent: &span, addr = %listener.local_addr, %protocol, "listening");
        Ok(Arc::new(listener) as SharedListener)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::shutdown::is_listener_closed;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn protocol() -> ProtocolId {
        ProtocolId::from("/p2p-proxy/http/0.1.0")
    }

    #[tokio::test]
    async fn test_accept_connection() {
        let listener = TcpProtocolListener::bind(protocol(), "127.0.0.1:0", Span::none()).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"hi").await.unwrap();
            let mut buf = [0u8; 2];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut conn = listener.accept().await.unwrap();
        let mut buf = [0u8; 2];
        conn.read_exact(&mut buf).await.unwrap();
        conn.write_all(&buf).await.unwrap();
        assert_eq!(&client.await.unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_close_wakes_pending_accept() {
        let listener =
            Arc::new(TcpProtocolListener::bind(protocol(), "127.0.0.1:0", Span::none()).unwrap());
        let pending = {
            let l = listener.clone();
            tokio::spawn(async move { l.accept().await.err().unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.close().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("accept should wake")
            .unwrap();
        assert!(is_listener_closed(&err));

        let err = listener.accept().await.err().unwrap();
        assert!(is_listener_closed(&err));
        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_factory_reports_bind_failure() {
        let factory = listener_factory(protocol());
        let err = factory(Span::none(), "not an address").err().unwrap();
        assert!(matches!(err, CoreError::Factory { .. }));
        assert!(err.to_string().contains("not an address"));
    }
}
