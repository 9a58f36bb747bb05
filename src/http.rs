//! Minimal blocking HTTP/1.1 client for the localization service.
//!
//! One connection per request (`Connection: close`), plain `http://` only.
//! Covers what the service needs: a multipart `POST` to the upload endpoint
//! and a `GET` on `/ping`.

use crate::protocol::UploadRequest;
use crate::{Result, ScenelockError};
use std::io::{ErrorKind as IoErrorKind, Read as _, Write as _};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

const UPLOAD_SUFFIX: &str = "/upload";
const PING_PATH: &str = "/ping";
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Parsed `http://host[:port]/path` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| {
                ScenelockError::InvalidUrl(format!("only http:// is supported: {}", url))
            })?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(ScenelockError::InvalidUrl(format!("missing host: {}", url)));
        }

        let bad_port = || ScenelockError::InvalidUrl(format!("bad port in {}", url));
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| ScenelockError::InvalidUrl(format!("unclosed IPv6 host: {}", url)))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, port.parse::<u16>().map_err(|_| bad_port())?),
                None if tail.is_empty() => (host, 80),
                None => return Err(bad_port()),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse::<u16>().map_err(|_| bad_port())?),
                None => (authority, 80),
            }
        };
        if host.is_empty() {
            return Err(ScenelockError::InvalidUrl(format!("missing host: {}", url)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// `/ping` next to the upload endpoint.
    pub fn ping(&self) -> Self {
        let base = self.path.trim_end_matches('/');
        let base = base.strip_suffix(UPLOAD_SUFFIX).unwrap_or(base);
        Self {
            host: self.host.clone(),
            port: self.port,
            path: format!("{}{}", base, PING_PATH),
        }
    }

    /// `Host` header value.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 80 {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ScenelockError::Network(format!("resolve {}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| ScenelockError::Network(format!("no address for {}", self.host)))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "http://{}{}", self.authority(), self.path)
    }
}

/// Status line and body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Blocking transport for uploads and pings.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    upload: Endpoint,
    ping: Endpoint,
    timeout: Duration,
}

impl HttpTransport {
    /// `timeout` bounds each request from connect until the response is read.
    pub fn new(upload_url: &str, timeout: Duration) -> Result<Self> {
        let upload = Endpoint::parse(upload_url)?;
        let ping = upload.ping();
        log::debug!("HTTP transport: upload {} ping {}", upload, ping);
        Ok(Self {
            upload,
            ping,
            timeout,
        })
    }

    pub fn upload_endpoint(&self) -> &Endpoint {
        &self.upload
    }

    pub fn ping_endpoint(&self) -> &Endpoint {
        &self.ping
    }

    /// Post one capture. Returns the body of a 2xx response.
    pub fn upload(&self, request: &UploadRequest) -> Result<String> {
        let boundary = format!(
            "----scenelock{:08x}{:012x}",
            request.id,
            request.metadata.timestamp_ms as u64
        );
        let body = request.encode_multipart(&boundary)?;
        let content_type = format!("multipart/form-data; boundary={}", boundary);

        let response = self.send("POST", &self.upload, Some(&content_type), &body)?;
        if !response.is_success() {
            return Err(ScenelockError::Http {
                status: response.status,
                reason: response.reason,
            });
        }
        Ok(response.body_text())
    }

    /// `GET /ping`; true on 200.
    pub fn ping(&self) -> Result<bool> {
        let response = self.send("GET", &self.ping, None, &[])?;
        Ok(response.status == 200)
    }

    fn send(
        &self,
        method: &str,
        endpoint: &Endpoint,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<HttpResponse> {
        let deadline = Instant::now() + self.timeout;
        let addr = endpoint.socket_addr()?;
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout).map_err(|e| {
            ScenelockError::Network(format!("connect {}: {}", endpoint.authority(), e))
        })?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true).ok();

        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: scenelock/{}\r\n",
            method,
            endpoint.path,
            endpoint.authority(),
            env!("CARGO_PKG_VERSION")
        );
        head.push_str("Accept: application/json\r\nConnection: close\r\n");
        if let Some(ct) = content_type {
            head.push_str(&format!("Content-Type: {}\r\n", ct));
        }
        if method != "GET" || !body.is_empty() {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");

        stream.write_all(head.as_bytes()).map_err(network)?;
        stream.write_all(body).map_err(network)?;
        stream.flush().map_err(network)?;

        let raw = read_until_close(&mut stream, deadline)?;
        let response = parse_response(&raw)?;
        log::debug!("{} {} -> {} {}", method, endpoint, response.status, response.reason);
        Ok(response)
    }
}

/// Read until the peer closes. The deadline covers the whole response, not
/// each individual read.
fn read_until_close(stream: &mut TcpStream, deadline: Instant) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(ScenelockError::Network("request timed out".into()));
        }
        stream.set_read_timeout(Some(left))?;
        match stream.read(&mut buf) {
            Ok(0) => return Ok(raw),
            Ok(n) => {
                raw.extend_from_slice(&buf[..n]);
                if raw.len() >= MAX_RESPONSE_BYTES {
                    raw.truncate(MAX_RESPONSE_BYTES);
                    return Ok(raw);
                }
            }
            Err(e) if e.kind() == IoErrorKind::Interrupted => {}
            Err(e) => return Err(network(e)),
        }
    }
}

fn network(e: std::io::Error) -> ScenelockError {
    match e.kind() {
        IoErrorKind::TimedOut | IoErrorKind::WouldBlock => {
            ScenelockError::Network("request timed out".into())
        }
        _ => ScenelockError::Network(e.to_string()),
    }
}

/// Parse a complete HTTP/1.x response read until connection close.
pub fn parse_response(raw: &[u8]) -> Result<HttpResponse> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| ScenelockError::Network("truncated response head".into()))?;
    let head = String::from_utf8_lossy(&raw[..split]);
    let mut payload = &raw[split + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ScenelockError::Network(format!("bad status line: {}", status_line)));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| ScenelockError::Network(format!("bad status line: {}", status_line)))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut content_length = None;
    let mut chunked = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().ok();
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            chunked = true;
        }
    }

    let body = if chunked {
        decode_chunked(payload)?
    } else {
        if let Some(len) = content_length {
            if payload.len() < len {
                return Err(ScenelockError::Network(format!(
                    "response body truncated: {} of {} bytes",
                    payload.len(),
                    len
                )));
            }
            payload = &payload[..len];
        }
        payload.to_vec()
    };

    Ok(HttpResponse {
        status,
        reason,
        body,
    })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| ScenelockError::Network("truncated chunk header".into()))?;
        let size_str = String::from_utf8_lossy(&data[..line_end]);
        let size_str = size_str.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| ScenelockError::Network(format!("bad chunk size: {}", size_str)))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if data.len() < size {
            return Err(ScenelockError::Network("truncated chunk".into()));
        }
        out.extend_from_slice(&data[..size]);
        data = data.get(size + 2..).unwrap_or_default();
    }
}
