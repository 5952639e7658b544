use std::io;

use async_trait::async_trait;
use burrow_core::protocol::{BoxConn, Listener, ProtocolId};
use burrow_core::shutdown::listener_closed;
use futures::StreamExt;
use libp2p_stream::IncomingStreams;
use tokio::sync::Mutex;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Inbound overlay streams for one protocol.
///
/// Closing drops the registration, so the protocol is no longer offered to
/// remote peers. Closing the node closes every listener it handed out.
pub struct OverlayListener {
    protocol: ProtocolId,
    incoming: Mutex<Option<IncomingStreams>>,
    closed: CancellationToken,
}

impl OverlayListener {
    pub(crate) fn new(
        protocol: ProtocolId,
        incoming: IncomingStreams,
        closed: CancellationToken,
    ) -> Self {
        Self {
            protocol,
            incoming: Mutex::new(Some(incoming)),
            closed,
        }
    }
}

#[async_trait]
impl Listener for OverlayListener {
    fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    async fn accept(&self) -> io::Result<BoxConn> {
        let mut guard = tokio::select! {
            _ = self.closed.cancelled() => return Err(listener_closed()),
            guard = self.incoming.lock() => guard,
        };
        let incoming = guard.as_mut().ok_or_else(listener_closed)?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(listener_closed()),
            next = incoming.next() => match next {
                Some((peer, stream)) => {
                    debug!(%peer, protocol = %self.protocol, "inbound stream");
                    Ok(Box::new(stream.compat()))
                }
                None => Err(listener_closed()),
            },
        }
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.cancel();
        self.incoming.lock().await.take();
        Ok(())
    }
}
