//! Plain HTTP/1.0 GET over one reusable TCP socket.

use core::fmt::Write as _;

use embassy_net::{
    IpAddress, Stack,
    dns::DnsQueryType,
    tcp::{ConnectError, Error as TcpError, TcpSocket},
};
use embassy_time::Duration;
use heapless::{String, Vec};
use log::{debug, info};
use mmpaper_core::transfer::{ResponseHead, head_end, parse_head};

const HEAD_BYTES: usize = 1024;
const REQUEST_BYTES: usize = 256;
const SOCKET_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HttpError {
    Dns,
    Connect(ConnectError),
    Io(TcpError),
    /// Peer closed before the response head was complete.
    Closed,
    HeadTooLarge,
    MalformedHead,
    RequestTooLong,
}

impl HttpError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Connect(_) => "connect",
            Self::Io(_) => "io",
            Self::Closed => "closed",
            Self::HeadTooLarge => "head too large",
            Self::MalformedHead => "malformed head",
            Self::RequestTooLong => "request too long",
        }
    }
}

/// Update server endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ServerConfig {
    pub host: &'static str,
    pub port: u16,
    pub user_agent: &'static str,
}

pub struct HttpConnection<'a> {
    stack: Stack<'a>,
    socket: TcpSocket<'a>,
    server: ServerConfig,
    resolved: Option<IpAddress>,
    /// Body bytes that arrived together with the head.
    pending: Vec<u8, HEAD_BYTES>,
    pending_pos: usize,
}

impl<'a> HttpConnection<'a> {
    pub fn new(
        stack: Stack<'a>,
        rx_buffer: &'a mut [u8],
        tx_buffer: &'a mut [u8],
        server: ServerConfig,
    ) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));
        Self {
            stack,
            socket,
            server,
            resolved: None,
            pending: Vec::new(),
            pending_pos: 0,
        }
    }

    async fn resolve(&mut self) -> Result<IpAddress, HttpError> {
        if let Some(addr) = self.resolved {
            return Ok(addr);
        }
        let addrs = self
            .stack
            .dns_query(self.server.host, DnsQueryType::A)
            .await
            .map_err(|_| HttpError::Dns)?;
        let addr = *addrs.first().ok_or(HttpError::Dns)?;
        debug!("http: {} resolved", self.server.host);
        self.resolved = Some(addr);
        Ok(addr)
    }

    pub async fn get(&mut self, path: &str) -> Result<ResponseHead, HttpError> {
        self.reset().await;

        let addr = self.resolve().await?;
        self.socket
            .connect((addr, self.server.port))
            .await
            .map_err(HttpError::Connect)?;

        let mut request: String<REQUEST_BYTES> = String::new();
        write!(
            request,
            "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: {}\r\nConnection: close\r\n\r\n",
            path, self.server.host, self.server.user_agent
        )
        .map_err(|_| HttpError::RequestTooLong)?;
        self.write_all(request.as_bytes()).await?;

        let mut head = [0u8; HEAD_BYTES];
        let mut filled = 0usize;
        let end = loop {
            if let Some(end) = head_end(&head[..filled]) {
                break end;
            }
            if filled == head.len() {
                return Err(HttpError::HeadTooLarge);
            }
            let n = self
                .socket
                .read(&mut head[filled..])
                .await
                .map_err(HttpError::Io)?;
            if n == 0 {
                return Err(HttpError::Closed);
            }
            filled += n;
        };

        let parsed = parse_head(&head[..end]).ok_or(HttpError::MalformedHead)?;
        // `end <= filled <= HEAD_BYTES`, so the leftover always fits.
        let _ = self.pending.extend_from_slice(&head[end..filled]);
        info!(
            "http: GET {} -> {} length={:?}",
            path, parsed.status, parsed.content_length
        );
        Ok(parsed)
    }

    pub async fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending_pos < self.pending.len() {
            let n = (self.pending.len() - self.pending_pos).min(buf.len());
            buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            return Ok(n);
        }
        if !self.socket.can_recv() {
            return Ok(0);
        }
        self.socket.read(buf).await.map_err(HttpError::Io)
    }

    pub fn is_connected(&self) -> bool {
        self.pending_pos < self.pending.len() || self.socket.may_recv()
    }

    pub async fn close(&mut self) {
        self.reset().await;
    }

    /// Drops the DNS cache, e.g. after the link changed.
    pub fn forget_server(&mut self) {
        self.resolved = None;
    }

    async fn reset(&mut self) {
        self.socket.abort();
        let _ = self.socket.flush().await;
        self.pending.clear();
        self.pending_pos = 0;
    }

    async fn write_all(&mut self, mut bytes: &[u8]) -> Result<(), HttpError> {
        while !bytes.is_empty() {
            let n = self.socket.write(bytes).await.map_err(HttpError::Io)?;
            if n == 0 {
                return Err(HttpError::Closed);
            }
            bytes = &bytes[n..];
        }
        self.socket.flush().await.map_err(HttpError::Io)
    }
}
