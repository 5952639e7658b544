use std::future::Future;
use std::io;
use std::time::Duration;

use burrow_core::lifecycle::ServiceLifecycle;
use burrow_core::protocol::{BoxConn, ProtocolId, ServiceConfig, SharedListener};
use burrow_core::CoreError;
use tokio::net::TcpStream;
use tracing::{debug, Instrument, Span};

pub(crate) const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept connections until the listener closes, handling each on its own
/// task inside `span`. In-flight connections outlive the loop.
///
/// Only a close caused by `lifecycle.shutdown()` ends the loop with `Ok`; a
/// listener that goes away on its own is reported as an error.
pub(crate) async fn accept_loop<H, Fut>(
    lifecycle: &ServiceLifecycle,
    listener: SharedListener,
    span: &Span,
    handler: H,
) -> Result<(), CoreError>
where
    H: Fn(BoxConn) -> Fut,
    Fut: Future<Output = io::Result<()>> + Send + 'static,
{
    if !lifecycle.attach(listener.clone()) {
        return Ok(());
    }
    loop {
        let conn = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                return match lifecycle.filter(e) {
                    Some(e) => Err(e.into()),
                    None => Ok(()),
                }
            }
        };
        let task = handler(conn);
        tokio::spawn(
            async move {
                if let Err(e) = task.await {
                    debug!(error = %e, "connection ended with error");
                }
            }
            .instrument(span.clone()),
        );
    }
}

/// Open a TCP connection to `host:port`, giving up after `timeout`.
pub(crate) async fn dial(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("dial {host}:{port} timed out"),
        )),
    }
}

pub(crate) fn invalid_config(protocol: &ProtocolId, reason: impl Into<String>) -> CoreError {
    CoreError::Factory {
        protocol: protocol.clone(),
        reason: reason.into(),
    }
}

/// `dial_timeout_secs`, a positive integer.
pub(crate) fn dial_timeout(
    protocol: &ProtocolId,
    config: &ServiceConfig,
) -> Result<Duration, CoreError> {
    match config.get("dial_timeout_secs") {
        None => Ok(DEFAULT_DIAL_TIMEOUT),
        Some(value) => value
            .as_u64()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                invalid_config(protocol, "dial_timeout_secs must be a positive integer")
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::memory::ChannelListener;
    use serde_json::json;
    use std::sync::Arc;

    fn config(value: serde_json::Value) -> ServiceConfig {
        value.as_object().cloned().unwrap()
    }

    /// Run `accept_loop` over a channel listener with a no-op handler.
    async fn serve_channel(
        lifecycle: Arc<ServiceLifecycle>,
    ) -> (SharedListener, tokio::task::JoinHandle<Result<(), CoreError>>) {
        let (listener, _tx) = ChannelListener::new(ProtocolId::from("/test"));
        let listener: SharedListener = Arc::new(listener);
        let task = {
            let listener = listener.clone();
            tokio::spawn(async move {
                accept_loop(&lifecycle, listener, &Span::none(), |_conn| async {
                    Ok::<(), io::Error>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        (listener, task)
    }

    #[tokio::test]
    async fn test_accept_loop_lost_listener_is_error() {
        let lifecycle = Arc::new(ServiceLifecycle::new());
        let (listener, task) = serve_channel(lifecycle.clone()).await;
        listener.close().await.unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
        assert!(!lifecycle.is_shutting_down());
    }

    #[tokio::test]
    async fn test_accept_loop_shutdown_is_ok() {
        let lifecycle = Arc::new(ServiceLifecycle::new());
        let (_listener, task) = serve_channel(lifecycle.clone()).await;
        lifecycle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_dial_timeout_default_and_override() {
        let protocol = ProtocolId::from("/test");
        assert_eq!(
            dial_timeout(&protocol, &ServiceConfig::new()).unwrap(),
            DEFAULT_DIAL_TIMEOUT
        );
        let cfg = config(json!({ "dial_timeout_secs": 5 }));
        assert_eq!(
            dial_timeout(&protocol, &cfg).unwrap(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_dial_timeout_rejects_bad_values() {
        let protocol = ProtocolId::from("/test");
        for bad in [json!({ "dial_timeout_secs": 0 }), json!({ "dial_timeout_secs": "5" })] {
            let err = dial_timeout(&protocol, &config(bad)).unwrap_err();
            assert!(matches!(err, CoreError::Factory { .. }));
        }
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let err = dial("127.0.0.1", addr.port(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
