use std::sync::Arc;

use burrow_core::transport::Transport;
use burrow_net::{NetError, OverlayConfig, OverlayHandle, OverlayNode};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::NodeError;

/// A running overlay node and the handle the core talks to.
pub struct Overlay {
    handle: Arc<OverlayHandle>,
    task: JoinHandle<Result<(), NetError>>,
}

impl Overlay {
    /// Build the node and run its event loop on a background task.
    pub fn spawn(config: OverlayConfig) -> Result<Self, NodeError> {
        let (node, handle) = OverlayNode::new(config)?;
        let task = tokio::spawn(node.run());
        Ok(Self {
            handle: Arc::new(handle),
            task,
        })
    }

    pub fn handle(&self) -> Arc<OverlayHandle> {
        self.handle.clone()
    }

    /// Stop the event loop and wait for it.
    pub async fn join(self) {
        if let Err(e) = self.handle.close().await {
            warn!(error = %e, "closing overlay");
        }
        match self.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "overlay node failed"),
            Err(e) => warn!(error = %e, "overlay task failed"),
        }
    }
}
