use burrow_core::ProtocolId;
use libp2p::StreamProtocol;

use crate::error::NetError;

/// Kademlia protocol name. Nodes only talk DHT with nodes using the same one.
pub const KAD_PROTOCOL: &str = "/burrow/kad/1.0.0";

/// Identify protocol version string.
pub const IDENTIFY_PROTOCOL: &str = "/burrow/id/1.0.0";

/// Agent string reported through identify.
pub const AGENT_VERSION: &str = concat!("burrow/", env!("CARGO_PKG_VERSION"));

/// Convert a protocol id into the libp2p stream protocol tagging its streams.
pub fn stream_protocol(protocol: &ProtocolId) -> Result<StreamProtocol, NetError> {
    StreamProtocol::try_from_owned(protocol.as_str().to_string()).map_err(|e| {
        NetError::ProtocolError {
            reason: format!("invalid stream protocol {}: {}", protocol, e),
        }
    })
}
