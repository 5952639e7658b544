//! HTTP(S) forward proxy service.
//!
//! `CONNECT host:port` opens a tunnel. Any other method must carry an
//! absolute-form `http://` target; the request is rewritten to origin form
//! and the rest of the connection is relayed to the origin server.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use burrow_core::lifecycle::ServiceLifecycle;
use burrow_core::protocol::{ProtocolId, Service, ServiceConfig, SharedListener, SharedService};
use burrow_core::registry::ServiceFactory;
use burrow_core::relay::relay;
use burrow_core::CoreError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, Span};

use crate::serve::{accept_loop, dial, dial_timeout, invalid_config};
use crate::HTTP;

/// Largest request head accepted, terminator included.
pub const MAX_HEAD_LEN: usize = 8 * 1024;

const DEFAULT_REALM: &str = "burrow";

/// Proxy credentials checked against `Proxy-Authorization: Basic ...`.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    realm: String,
    users: HashMap<String, String>,
}

impl BasicAuth {
    pub fn new(realm: impl Into<String>, users: HashMap<String, String>) -> Self {
        Self {
            realm: realm.into(),
            users,
        }
    }

    /// Whether the header value carries a known user and matching password.
    pub fn check(&self, header: Option<&str>) -> bool {
        let Some((scheme, encoded)) = header.and_then(|h| h.trim().split_once(' ')) else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return false;
        }
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((user, password)) => self.users.get(user).is_some_and(|p| p == password),
            None => false,
        }
    }

    /// Value of the `Proxy-Authenticate` header sent with a 407.
    pub fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }
}

/// Parsed request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse a head without its trailing blank line being required.
    pub fn parse(head: &str) -> Option<Self> {
        let mut lines = head.split("\r\n");
        let mut parts = lines.next()?.split(' ');
        let method = parts.next().filter(|s| !s.is_empty())?;
        let target = parts.next().filter(|s| !s.is_empty())?;
        let version = parts.next().filter(|s| s.starts_with("HTTP/"))?;
        if parts.next().is_some() {
            return None;
        }
        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line.split_once(':')?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
        Some(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request as the origin server should see it: origin-form target,
    /// no `Proxy-*` headers, and a single request per connection.
    pub fn to_origin_form(&self, target: &AbsoluteTarget) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, target.path, self.version);
        if self.header("Host").is_none() {
            out.push_str(&format!("Host: {}\r\n", target.authority));
        }
        for (name, value) in &self.headers {
            let lower = name.to_ascii_lowercase();
            if lower.starts_with("proxy-") || lower == "connection" || lower == "keep-alive" {
                continue;
            }
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("Connection: close\r\n\r\n");
        out
    }
}

/// Decomposed absolute-form `http://` request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsoluteTarget {
    pub host: String,
    pub port: u16,
    pub authority: String,
    pub path: String,
}

impl AbsoluteTarget {
    pub fn parse(target: &str) -> Option<Self> {
        let scheme = target.get(..7)?;
        if !scheme.eq_ignore_ascii_case("http://") {
            return None;
        }
        let rest = &target[7..];
        let end = rest.find(['/', '?']).unwrap_or(rest.len());
        let authority = &rest[..end];
        let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
        let (host, port) = split_host_port(authority, 80)?;
        let path = match &rest[end..] {
            "" => "/".to_string(),
            p if p.starts_with('?') => format!("/{}", p),
            p => p.to_string(),
        };
        Some(Self {
            host,
            port,
            authority: authority.to_string(),
            path,
        })
    }
}

/// Split `host[:port]`, accepting bracketed IPv6 literals.
pub fn split_host_port(authority: &str, default_port: u16) -> Option<(String, u16)> {
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail {
            "" => default_port,
            _ => tail.strip_prefix(':')?.parse().ok()?,
        };
        (host, port)
    } else {
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().ok()?),
            None => (authority, default_port),
        };
        // IPv6 literals must be bracketed.
        if host.contains(':') {
            return None;
        }
        (host, port)
    };
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

pub struct HttpProxyService {
    protocol: ProtocolId,
    lifecycle: ServiceLifecycle,
    auth: Option<Arc<BasicAuth>>,
    dial_timeout: Duration,
    span: Span,
}

impl HttpProxyService {
    pub fn new(auth: Option<BasicAuth>, dial_timeout: Duration, span: Span) -> Self {
        Self {
            protocol: ProtocolId::from(HTTP),
            lifecycle: ServiceLifecycle::new(),
            auth: auth.map(Arc::new),
            dial_timeout,
            span,
        }
    }

    /// Recognised keys: `dial_timeout_secs`, `realm`, and `basic_auth`, an
    /// object mapping user names to passwords. Without users, no
    /// authentication is required.
    pub fn from_config(span: Span, config: &ServiceConfig) -> Result<Self, CoreError> {
        let protocol = ProtocolId::from(HTTP);
        let timeout = dial_timeout(&protocol, config)?;
        let realm = match config.get("realm") {
            None => DEFAULT_REALM,
            Some(v) => v
                .as_str()
                .ok_or_else(|| invalid_config(&protocol, "realm must be a string"))?,
        };
        let mut users = HashMap::new();
        if let Some(value) = config.get("basic_auth") {
            let entries = value
                .as_object()
                .ok_or_else(|| invalid_config(&protocol, "basic_auth must be a table"))?;
            for (user, password) in entries {
                let password = password.as_str().ok_or_else(|| {
                    invalid_config(&protocol, format!("password for {user} must be a string"))
                })?;
                users.insert(user.clone(), password.to_string());
            }
        }
        let auth = (!users.is_empty()).then(|| BasicAuth::new(realm, users));
        Ok(Self::new(auth, timeout, span))
    }
}

pub fn service_factory() -> ServiceFactory {
    Box::new(|span, config| {
        Ok(Arc::new(HttpProxyService::from_config(span, config)?) as SharedService)
    })
}

#[async_trait]
impl Service for HttpProxyService {
    fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    async fn serve(&self, listener: SharedListener) -> Result<(), CoreError> {
        let timeout = self.dial_timeout;
        let auth = self.auth.clone();
        accept_loop(&self.lifecycle, listener, &self.span, move |conn| {
            handle(conn, auth.clone(), timeout)
        })
        .await
    }

    async fn shutdown(&self) -> Result<(), CoreError> {
        self.lifecycle.shutdown().await
    }
}

async fn handle<S>(mut conn: S, auth: Option<Arc<BasicAuth>>, timeout: Duration) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let Some((buf, end)) = read_head(&mut conn).await? else {
        return respond(&mut conn, 431, "Request Header Fields Too Large", &[]).await;
    };
    let Some(head) = std::str::from_utf8(&buf[..end])
        .ok()
        .and_then(RequestHead::parse)
    else {
        return respond(&mut conn, 400, "Bad Request", &[]).await;
    };

    if let Some(auth) = &auth {
        if !auth.check(head.header("Proxy-Authorization")) {
            debug!(method = %head.method, target = %head.target, "proxy authentication required");
            let challenge = auth.challenge();
            return respond(
                &mut conn,
                407,
                "Proxy Authentication Required",
                &[("Proxy-Authenticate", challenge.as_str())],
            )
            .await;
        }
    }

    // Bytes the client sent past the head belong to the upstream.
    let pending = &buf[end..];

    if head.method.eq_ignore_ascii_case("CONNECT") {
        let Some((host, port)) = split_host_port(&head.target, 443) else {
            return respond(&mut conn, 400, "Bad Request", &[]).await;
        };
        let mut upstream = match dial(&host, port, timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = respond(&mut conn, 502, "Bad Gateway", &[]).await;
                return Err(e);
            }
        };
        conn.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;
        upstream.write_all(pending).await?;
        debug!(%host, port, "tunnel established");
        return relay(conn, upstream).await.map_err(io::Error::other);
    }

    let Some(target) = AbsoluteTarget::parse(&head.target) else {
        return respond(&mut conn, 400, "Bad Request", &[]).await;
    };
    let mut upstream = match dial(&target.host, target.port, timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = respond(&mut conn, 502, "Bad Gateway", &[]).await;
            return Err(e);
        }
    };
    upstream
        .write_all(head.to_origin_form(&target).as_bytes())
        .await?;
    upstream.write_all(pending).await?;
    debug!(method = %head.method, host = %target.host, path = %target.path, "forwarding request");
    relay(conn, upstream).await.map_err(io::Error::other)
}

/// Read until the end of the request head. Returns the bytes read and the
/// offset just past the blank line, or `None` when the head exceeds
/// [`MAX_HEAD_LEN`].
async fn read_head<S>(conn: &mut S) -> io::Result<Option<(Vec<u8>, usize)>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4) {
            return Ok((end <= MAX_HEAD_LEN).then_some((buf, end)));
        }
        if buf.len() >= MAX_HEAD_LEN {
            return Ok(None);
        }
        let n = conn.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside request head",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn respond<S>(
    conn: &mut S,
    code: u16,
    reason: &str,
    headers: &[(&str, &str)],
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut out = format!("HTTP/1.1 {} {}\r\n", code, reason);
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
    conn.write_all(out.as_bytes()).await?;
    conn.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::memory::ChannelListener;
    use burrow_core::protocol::BoxConn;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::io::DuplexStream;
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, oneshot};

    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut rd, mut wr) = stream.into_split();
                    let _ = tokio::io::copy(&mut rd, &mut wr).await;
                });
            }
        });
        addr
    }

    /// Origin that captures one request head and answers `ok`.
    async fn origin_server() -> (SocketAddr, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (buf, end) = read_head(&mut stream).await.unwrap().unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf[..end]).into_owned());
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await
                .unwrap();
        });
        (addr, rx)
    }

    fn start(service: HttpProxyService) -> mpsc::Sender<BoxConn> {
        let service = Arc::new(service);
        let (listener, tx) = ChannelListener::new(ProtocolId::from(HTTP));
        tokio::spawn(async move { service.serve(Arc::new(listener)).await });
        tx
    }

    fn open_service() -> HttpProxyService {
        HttpProxyService::new(None, Duration::from_secs(5), Span::none())
    }

    fn auth_service() -> HttpProxyService {
        let users = HashMap::from([("alice".to_string(), "secret".to_string())]);
        HttpProxyService::new(
            Some(BasicAuth::new("burrow", users)),
            Duration::from_secs(5),
            Span::none(),
        )
    }

    async fn connect(tx: &mpsc::Sender<BoxConn>) -> DuplexStream {
        let (client, server) = tokio::io::duplex(16 * 1024);
        assert!(tx.send(Box::new(server)).await.is_ok());
        client
    }

    async fn read_response_head(client: &mut DuplexStream) -> String {
        let (buf, end) = read_head(client).await.unwrap().unwrap();
        String::from_utf8_lossy(&buf[..end]).into_owned()
    }

    #[tokio::test]
    async fn test_connect_tunnel() {
        let target = echo_server().await;
        let tx = start(open_service());
        let mut client = connect(&tx).await;

        let req = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
        client.write_all(req.as_bytes()).await.unwrap();
        let head = read_response_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200"));

        client.write_all(b"tunnel").await.unwrap();
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"tunnel");
    }

    #[tokio::test]
    async fn test_absolute_form_is_rewritten() {
        let (origin, captured) = origin_server().await;
        let tx = start(open_service());
        let mut client = connect(&tx).await;

        let req = format!(
            "GET http://{origin}/path?q=1 HTTP/1.1\r\n\
             Host: {origin}\r\n\
             Proxy-Authorization: Basic Zm9vOmJhcg==\r\n\
             Proxy-Connection: keep-alive\r\n\
             Accept: */*\r\n\r\n"
        );
        client.write_all(req.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("ok"));

        let head = captured.await.unwrap();
        assert!(head.starts_with("GET /path?q=1 HTTP/1.1\r\n"));
        assert!(head.contains("Accept: */*\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(!head.to_ascii_lowercase().contains("proxy-"));
    }

    #[tokio::test]
    async fn test_auth_required() {
        let tx = start(auth_service());
        let mut client = connect(&tx).await;
        client
            .write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 407"));
        assert!(response.contains("Proxy-Authenticate: Basic realm=\"burrow\"\r\n"));
    }

    #[tokio::test]
    async fn test_auth_accepted() {
        let target = echo_server().await;
        let tx = start(auth_service());
        let mut client = connect(&tx).await;

        let credentials = STANDARD.encode("alice:secret");
        let req = format!(
            "CONNECT {target} HTTP/1.1\r\nProxy-Authorization: Basic {credentials}\r\n\r\n"
        );
        client.write_all(req.as_bytes()).await.unwrap();
        let head = read_response_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn test_oversized_head_rejected() {
        let tx = start(open_service());
        let mut client = connect(&tx).await;
        let mut req = b"GET http://example.com/ HTTP/1.1\r\nX-Filler: ".to_vec();
        req.extend(std::iter::repeat(b'a').take(MAX_HEAD_LEN));
        client.write_all(&req).await.unwrap();
        let head = read_response_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 431"));
    }

    #[tokio::test]
    async fn test_origin_form_request_rejected() {
        let tx = start(open_service());
        let mut client = connect(&tx).await;
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();
        let head = read_response_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_connect_unbracketed_ipv6_rejected() {
        let tx = start(open_service());
        let mut client = connect(&tx).await;
        client
            .write_all(b"CONNECT ::1 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let head = read_response_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_unreachable_target_is_bad_gateway() {
        let closed = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let tx = start(open_service());
        let mut client = connect(&tx).await;
        let req = format!("CONNECT {closed} HTTP/1.1\r\n\r\n");
        client.write_all(req.as_bytes()).await.unwrap();
        let head = read_response_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 502"));
    }

    #[test]
    fn test_parse_head() {
        let head = RequestHead::parse(
            "CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\nproxy-authorization: x\r\n\r\n",
        )
        .unwrap();
        assert_eq!(head.method, "CONNECT");
        assert_eq!(head.target, "example.com:443");
        assert_eq!(head.header("Proxy-Authorization"), Some("x"));
        assert_eq!(head.header("Missing"), None);

        assert!(RequestHead::parse("GET /\r\n\r\n").is_none());
        assert!(RequestHead::parse("GET / HTTP/1.1\r\nbroken header\r\n\r\n").is_none());
    }

    #[test]
    fn test_absolute_target() {
        let t = AbsoluteTarget::parse("http://example.com/a/b?c=d").unwrap();
        assert_eq!((t.host.as_str(), t.port, t.path.as_str()), ("example.com", 80, "/a/b?c=d"));

        let t = AbsoluteTarget::parse("HTTP://user:pw@[::1]:8080?x").unwrap();
        assert_eq!((t.host.as_str(), t.port, t.path.as_str()), ("::1", 8080, "/?x"));
        assert_eq!(t.authority, "[::1]:8080");

        assert!(AbsoluteTarget::parse("https://example.com/").is_none());
        assert!(AbsoluteTarget::parse("/relative").is_none());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("a.b:81", 80), Some(("a.b".to_string(), 81)));
        assert_eq!(split_host_port("a.b", 443), Some(("a.b".to_string(), 443)));
        assert_eq!(split_host_port("[::1]", 443), Some(("::1".to_string(), 443)));
        assert_eq!(split_host_port(":80", 443), None);
        assert_eq!(split_host_port("a.b:http", 443), None);
        assert_eq!(split_host_port("::1", 443), None);
        assert_eq!(split_host_port("fe80::1:8080", 443), None);
        assert_eq!(
            split_host_port("[fe80::1]:8080", 443),
            Some(("fe80::1".to_string(), 8080))
        );
    }

    #[test]
    fn test_basic_auth_check() {
        let users = HashMap::from([("alice".to_string(), "secret".to_string())]);
        let auth = BasicAuth::new("r", users);
        let good = format!("Basic {}", STANDARD.encode("alice:secret"));
        let bad = format!("Basic {}", STANDARD.encode("alice:wrong"));
        assert!(auth.check(Some(&good)));
        assert!(!auth.check(Some(&bad)));
        assert!(!auth.check(Some("Bearer token")));
        assert!(!auth.check(Some("Basic !!!")));
        assert!(!auth.check(None));
        assert_eq!(auth.challenge(), "Basic realm=\"r\"");
    }

    #[test]
    fn test_from_config() {
        let cfg = json!({ "realm": "corp", "basic_auth": { "bob": "pw" } })
            .as_object()
            .cloned()
            .unwrap();
        let service = HttpProxyService::from_config(Span::none(), &cfg).unwrap();
        let auth = service.auth.as_ref().unwrap();
        assert_eq!(auth.challenge(), "Basic realm=\"corp\"");

        let open = HttpProxyService::from_config(Span::none(), &ServiceConfig::new()).unwrap();
        assert!(open.auth.is_none());

        let bad = json!({ "basic_auth": { "bob": 1 } }).as_object().cloned().unwrap();
        assert!(HttpProxyService::from_config(Span::none(), &bad).is_err());
    }
}
