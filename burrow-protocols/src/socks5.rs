//! SOCKS5 service (RFC 1928).
//!
//! Only the no-authentication method and the CONNECT command are offered.
//! After a successful CONNECT the client connection is relayed to the target
//! until either side finishes.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use burrow_core::lifecycle::ServiceLifecycle;
use burrow_core::protocol::{ProtocolId, Service, ServiceConfig, SharedListener, SharedService};
use burrow_core::registry::ServiceFactory;
use burrow_core::relay::relay;
use burrow_core::CoreError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, Span};

use crate::serve::{accept_loop, dial, dial_timeout};
use crate::SOCKS5;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Reply field of a SOCKS5 response.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl Reply {
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Reply::ConnectionRefused,
            io::ErrorKind::TimedOut => Reply::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => Reply::NetworkUnreachable,
            _ => Reply::GeneralFailure,
        }
    }
}

/// Destination requested by a CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl TargetAddr {
    async fn connect(&self, timeout: Duration) -> io::Result<TcpStream> {
        match self {
            TargetAddr::Ip(addr) => dial(&addr.ip().to_string(), addr.port(), timeout).await,
            TargetAddr::Domain(host, port) => dial(host, *port, timeout).await,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

pub struct Socks5Service {
    protocol: ProtocolId,
    lifecycle: ServiceLifecycle,
    dial_timeout: Duration,
    span: Span,
}

impl Socks5Service {
    pub fn new(dial_timeout: Duration, span: Span) -> Self {
        Self {
            protocol: ProtocolId::from(SOCKS5),
            lifecycle: ServiceLifecycle::new(),
            dial_timeout,
            span,
        }
    }

    /// Recognised keys: `dial_timeout_secs`.
    pub fn from_config(span: Span, config: &ServiceConfig) -> Result<Self, CoreError> {
        let timeout = dial_timeout(&ProtocolId::from(SOCKS5), config)?;
        Ok(Self::new(timeout, span))
    }
}

pub fn service_factory() -> ServiceFactory {
    Box::new(|span, config| Ok(Arc::new(Socks5Service::from_config(span, config)?) as SharedService))
}

#[async_trait]
impl Service for Socks5Service {
    fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    async fn serve(&self, listener: SharedListener) -> Result<(), CoreError> {
        let timeout = self.dial_timeout;
        accept_loop(&self.lifecycle, listener, &self.span, move |conn| {
            handle(conn, timeout)
        })
        .await
    }

    async fn shutdown(&self) -> Result<(), CoreError> {
        self.lifecycle.shutdown().await
    }
}

async fn handle<S>(mut conn: S, timeout: Duration) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let target = handshake(&mut conn).await?;
    let upstream = match target.connect(timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%target, error = %e, "connect failed");
            let _ = write_reply(&mut conn, Reply::from_io_error(&e), None).await;
            return Err(e);
        }
    };
    write_reply(&mut conn, Reply::Succeeded, upstream.local_addr().ok()).await?;
    debug!(%target, "connected");
    relay(conn, upstream).await.map_err(io::Error::other)
}

/// Run method negotiation and read the request. Failures the client can be
/// told about are answered before the error is returned.
pub async fn handshake<S>(conn: &mut S) -> io::Result<TargetAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = [0u8; 2];
    conn.read_exact(&mut greeting).await?;
    if greeting[0] != VERSION {
        return Err(invalid(format!("unsupported SOCKS version {:#04x}", greeting[0])));
    }
    let mut methods = vec![0u8; greeting[1] as usize];
    conn.read_exact(&mut methods).await?;
    if !methods.contains(&METHOD_NO_AUTH) {
        conn.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
        return Err(invalid("no acceptable authentication method"));
    }
    conn.write_all(&[VERSION, METHOD_NO_AUTH]).await?;

    let mut request = [0u8; 4];
    conn.read_exact(&mut request).await?;
    if request[0] != VERSION {
        return Err(invalid(format!("unsupported SOCKS version {:#04x}", request[0])));
    }
    if request[1] != CMD_CONNECT {
        write_reply(conn, Reply::CommandNotSupported, None).await?;
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("command {:#04x} not supported", request[1]),
        ));
    }

    let target = match request[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            conn.read_exact(&mut octets).await?;
            let port = read_port(conn).await?;
            TargetAddr::Ip(SocketAddr::from((Ipv4Addr::from(octets), port)))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            conn.read_exact(&mut octets).await?;
            let port = read_port(conn).await?;
            TargetAddr::Ip(SocketAddr::from((Ipv6Addr::from(octets), port)))
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            conn.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            conn.read_exact(&mut name).await?;
            let port = read_port(conn).await?;
            let host = String::from_utf8(name).map_err(|_| invalid("domain name is not UTF-8"))?;
            TargetAddr::Domain(host, port)
        }
        other => {
            write_reply(conn, Reply::AddressTypeNotSupported, None).await?;
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("address type {:#04x} not supported", other),
            ));
        }
    };
    Ok(target)
}

async fn read_port<S>(conn: &mut S) -> io::Result<u16>
where
    S: AsyncRead + Unpin,
{
    let mut port = [0u8; 2];
    conn.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

/// Write a reply. Without a bound address the zero IPv4 address is sent.
async fn write_reply<S>(conn: &mut S, reply: Reply, bound: Option<SocketAddr>) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = vec![VERSION, reply as u8, 0x00];
    match bound {
        Some(SocketAddr::V4(addr)) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&addr.ip().octets());
            buf.extend_from_slice(&addr.port().to_be_bytes());
        }
        Some(SocketAddr::V6(addr)) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&addr.ip().octets());
            buf.extend_from_slice(&addr.port().to_be_bytes());
        }
        None => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&[0; 6]);
        }
    }
    conn.write_all(&buf).await
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
