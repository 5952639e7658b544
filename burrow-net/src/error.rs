use burrow_core::CoreError;
use thiserror::Error;

/// Errors that can occur in the overlay layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// A general network-level error.
    #[error("network error: {reason}")]
    NetworkError { reason: String },

    /// Failed to establish or maintain a connection.
    #[error("connection error: {reason}")]
    ConnectionError { reason: String },

    /// Protocol-level error.
    #[error("protocol error: {reason}")]
    ProtocolError { reason: String },

    /// The node's event loop is gone.
    #[error("channel error: {reason}")]
    ChannelError { reason: String },

    /// A Kademlia query failed.
    #[error("query error: {reason}")]
    QueryError { reason: String },
}

impl From<NetError> for CoreError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::QueryError { .. } => CoreError::Discovery {
                reason: err.to_string(),
            },
            other => CoreError::Transport {
                reason: other.to_string(),
            },
        }
    }
}
