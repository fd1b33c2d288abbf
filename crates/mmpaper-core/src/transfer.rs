//! HTTP transport seam and the streaming download loop.

use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};

use crate::{install::ArtifactSink, time::parse_http_date, update::UpdateError};

/// Download buffer size.
pub const CHUNK_BYTES: usize = 512;
const PROGRESS_STEP_BYTES: u32 = 100 * 1024;

/// Status line and the headers the updater cares about.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<u32>,
    /// `Date` header as unix seconds.
    pub date_unix: Option<u32>,
}

impl ResponseHead {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Minimal HTTP GET client, one request at a time.
#[allow(async_fn_in_trait)]
pub trait HttpClient {
    type Error;

    /// Sends a GET for `path` on the configured host and returns once the
    /// response head has been parsed.
    async fn get(&mut self, path: &str) -> Result<ResponseHead, Self::Error>;

    /// Copies body bytes that are already available. `Ok(0)` means nothing is
    /// buffered right now.
    async fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// True while more body bytes may still arrive or are buffered.
    fn is_connected(&self) -> bool;

    async fn close(&mut self);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransferConfig {
    /// Yield between poll iterations.
    pub poll_yield_ms: u32,
    /// Abort when no byte arrives for this long.
    pub stall_timeout_ms: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            poll_yield_ms: 1,
            stall_timeout_ms: 15_000,
        }
    }
}

/// Offset just past the blank line that ends an HTTP response head.
pub fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

/// Parses the status line plus `Content-Length` and `Date`. Header names are
/// matched case-insensitively; unknown headers are ignored.
pub fn parse_head(head: &[u8]) -> Option<ResponseHead> {
    let text = core::str::from_utf8(head).ok()?;
    let mut lines = text.split("\r\n");

    let mut status_line = lines.next()?.split_ascii_whitespace();
    if !status_line.next()?.starts_with("HTTP/") {
        return None;
    }
    let status: u16 = status_line.next()?.parse().ok()?;

    let mut parsed = ResponseHead {
        status,
        ..ResponseHead::default()
    };
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            parsed.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("date") {
            parsed.date_unix = parse_http_date(value);
        }
    }
    Some(parsed)
}

/// One download in flight.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransferSession<'a> {
    pub source: &'a str,
    pub destination: &'static str,
    pub expected_size: u32,
    pub bytes_transferred: u32,
}

impl TransferSession<'_> {
    pub const fn is_complete(&self) -> bool {
        self.bytes_transferred == self.expected_size
    }
}

/// Descriptor body length and server time seen in its response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Descriptor {
    pub len: usize,
    pub server_time: Option<u32>,
}

/// Reads a small response body into `buf`, truncating at its length.
pub async fn fetch_descriptor<H, D>(
    http: &mut H,
    delay: &mut D,
    path: &str,
    buf: &mut [u8],
    config: &TransferConfig,
) -> Result<Descriptor, UpdateError>
where
    H: HttpClient,
    D: DelayNs,
{
    let head = match http.get(path).await {
        Ok(head) => head,
        Err(_) => {
            http.close().await;
            return Err(UpdateError::ManifestUnreachable);
        }
    };
    if !head.is_success() {
        debug!("update: GET {} status={}", path, head.status);
        http.close().await;
        return Err(UpdateError::ManifestUnreachable);
    }

    let limit = head
        .content_length
        .map_or(buf.len(), |declared| buf.len().min(declared as usize));
    let mut len = 0usize;
    let mut idle_ms = 0u32;
    let mut result = Ok(());

    while len < limit {
        match http.read_available(&mut buf[len..limit]).await {
            Ok(0) => {
                if !http.is_connected() || idle_ms >= config.stall_timeout_ms {
                    break;
                }
                delay.delay_ms(config.poll_yield_ms).await;
                idle_ms = idle_ms.saturating_add(config.poll_yield_ms.max(1));
            }
            Ok(n) => {
                len += n;
                idle_ms = 0;
            }
            Err(_) => {
                result = Err(UpdateError::ManifestUnreachable);
                break;
            }
        }
    }
    http.close().await;
    result?;

    Ok(Descriptor {
        len,
        server_time: head.date_unix,
    })
}

/// Streams the artifact at `path` into `sink`.
///
/// Succeeds only when exactly the declared `Content-Length` has been written
/// and the sink accepted it. Every failure after `begin` aborts the sink.
pub async fn stream_artifact<'p, H, D, S>(
    http: &mut H,
    delay: &mut D,
    path: &'p str,
    sink: &mut S,
    config: &TransferConfig,
) -> Result<TransferSession<'p>, UpdateError>
where
    H: HttpClient,
    D: DelayNs,
    S: ArtifactSink,
{
    let head = match http.get(path).await {
        Ok(head) => head,
        Err(_) => {
            http.close().await;
            return Err(UpdateError::TransferIncomplete);
        }
    };
    let expected = match head.content_length {
        Some(len) if head.is_success() && len > 0 => len,
        _ => {
            warn!(
                "update: GET {} status={} length={:?}",
                path, head.status, head.content_length
            );
            http.close().await;
            return Err(UpdateError::TransferIncomplete);
        }
    };

    let mut session = TransferSession {
        source: path,
        destination: sink.destination(),
        expected_size: expected,
        bytes_transferred: 0,
    };
    info!(
        "update: download start src={} dest={} bytes={}",
        session.source, session.destination, expected
    );

    if sink.begin(expected).is_err() {
        http.close().await;
        return Err(UpdateError::InstallFailed);
    }

    let pumped = pump(http, delay, sink, &mut session, config).await;
    http.close().await;
    if let Err(err) = pumped {
        warn!(
            "update: download aborted at {}/{} bytes",
            session.bytes_transferred, session.expected_size
        );
        sink.abort();
        return Err(err);
    }

    // The sink cleans up after itself when finishing fails.
    sink.finish().map_err(|_| UpdateError::InstallFailed)?;
    Ok(session)
}

async fn pump<H, D, S>(
    http: &mut H,
    delay: &mut D,
    sink: &mut S,
    session: &mut TransferSession<'_>,
    config: &TransferConfig,
) -> Result<(), UpdateError>
where
    H: HttpClient,
    D: DelayNs,
    S: ArtifactSink,
{
    let mut chunk = [0u8; CHUNK_BYTES];
    let mut idle_ms = 0u32;
    let mut next_progress = PROGRESS_STEP_BYTES;

    while !session.is_complete() {
        let remaining = session.expected_size - session.bytes_transferred;
        let want = CHUNK_BYTES.min(remaining as usize);

        let read = http
            .read_available(&mut chunk[..want])
            .await
            .map_err(|_| UpdateError::TransferIncomplete)?;

        if read == 0 {
            if !http.is_connected() {
                return Err(UpdateError::TransferIncomplete);
            }
            if idle_ms >= config.stall_timeout_ms {
                warn!("update: stalled for {} ms", idle_ms);
                return Err(UpdateError::TransferIncomplete);
            }
            idle_ms = idle_ms.saturating_add(config.poll_yield_ms.max(1));
        } else {
            sink.write(&chunk[..read])
                .map_err(|_| UpdateError::InstallFailed)?;
            session.bytes_transferred += read as u32;
            idle_ms = 0;

            if session.bytes_transferred >= next_progress {
                info!(
                    "update: {} / {} bytes",
                    session.bytes_transferred, session.expected_size
                );
                next_progress = next_progress.saturating_add(PROGRESS_STEP_BYTES);
            }
        }

        delay.delay_ms(config.poll_yield_ms).await;
    }

    Ok(())
}
