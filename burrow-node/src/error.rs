use burrow_core::{CoreError, MultiError};
use burrow_net::NetError;
use thiserror::Error;

/// Errors that can occur in the node binary.
#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum NodeError {
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    #[error("network error: {0}")]
    NetworkError(#[from] NetError),

    #[error("{0}")]
    CoreError(#[from] CoreError),

    #[error("shutdown error: {0}")]
    ShutdownError(#[from] MultiError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl NodeError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        NodeError::ConfigError {
            reason: reason.into(),
        }
    }
}
