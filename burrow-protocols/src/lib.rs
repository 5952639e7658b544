//! Protocol plugins for burrow.
//!
//! Endpoint side: TCP listeners accepting local clients for each protocol.
//! Proxy side: the services that terminate those protocols and dial the
//! requested targets.
//!
//! Nothing registers itself; the binary calls [`register_listeners`] and
//! [`register_services`] on its registry while wiring the process.

pub mod http;
mod serve;
pub mod socks5;
pub mod tcp;

pub use http::HttpProxyService;
pub use socks5::Socks5Service;
pub use tcp::TcpProtocolListener;

use burrow_core::registry::ProtocolRegistry;
use burrow_core::{CoreError, ProtocolId};

/// HTTP(S) proxy.
pub const HTTP: &str = "/p2p-proxy/http/0.1.0";
/// SOCKS5 front end.
pub const SOCKS5: &str = "/p2p-proxy/socks5/0.1.0";
/// Reserved for a stream-cipher relay. No plugin serves it.
pub const SHADOWSOCKS: &str = "/p2p-proxy/shadowsocks/0.1.0";

/// Register the endpoint-side TCP listener for every supported protocol.
pub fn register_listeners(registry: &mut ProtocolRegistry) -> Result<(), CoreError> {
    registry.register_listener_factory(HTTP, "http", tcp::listener_factory(ProtocolId::from(HTTP)))?;
    registry.register_listener_factory(
        SOCKS5,
        "socks5",
        tcp::listener_factory(ProtocolId::from(SOCKS5)),
    )?;
    Ok(())
}

/// Register the proxy-side service for every supported protocol.
pub fn register_services(registry: &mut ProtocolRegistry) -> Result<(), CoreError> {
    registry.register_service_factory(HTTP, "http", http::service_factory())?;
    registry.register_service_factory(SOCKS5, "socks5", socks5::service_factory())?;
    Ok(())
}
