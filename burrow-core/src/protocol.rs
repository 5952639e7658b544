use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::CoreError;

/// Identifier of a tunneled protocol, e.g. `/p2p-proxy/http/0.1.0`.
///
/// The same string tags overlay streams, so both sides must agree on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(Arc<str>);

impl ProtocolId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProtocolId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProtocolId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProtocolId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Any bidirectional byte connection: a TCP socket, an overlay stream, a pipe.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxConn = Box<dyn Connection>;

/// Per-protocol options handed to a service factory.
pub type ServiceConfig = serde_json::Map<String, serde_json::Value>;

/// A bound endpoint yielding connections for one protocol.
///
/// `accept` and `close` may race: closing must wake a pending `accept`, which
/// then fails with [`crate::shutdown::listener_closed`].
#[async_trait]
pub trait Listener: Send + Sync {
    fn protocol(&self) -> &ProtocolId;

    async fn accept(&self) -> io::Result<BoxConn>;

    /// Close the listener. Calling it more than once is harmless.
    async fn close(&self) -> io::Result<()>;

    /// Socket address for listeners bound to one.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

pub type SharedListener = Arc<dyn Listener>;

/// A protocol handler driving connections from a listener.
#[async_trait]
pub trait Service: Send + Sync {
    fn protocol(&self) -> &ProtocolId;

    /// Serve until the listener is closed or [`Service::shutdown`] is called.
    /// Closure caused by shutdown is not an error.
    async fn serve(&self, listener: SharedListener) -> Result<(), CoreError>;

    /// Stop serving. Idempotent.
    async fn shutdown(&self) -> Result<(), CoreError>;
}

pub type SharedService = Arc<dyn Service>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_protocol_id_display_and_eq() {
        let a = ProtocolId::from("/p2p-proxy/http/0.1.0");
        let b = ProtocolId::from(String::from("/p2p-proxy/http/0.1.0"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "/p2p-proxy/http/0.1.0");
        assert_eq!(a.as_str(), b.as_ref());
    }

    #[test]
    fn test_protocol_id_as_map_key() {
        let mut map = HashMap::new();
        map.insert(ProtocolId::from("/a"), 1);
        map.insert(ProtocolId::from("/b"), 2);
        assert_eq!(map.get(&ProtocolId::from("/a")), Some(&1));
        assert_eq!(map.get(&ProtocolId::from("/c")), None);
    }
}
