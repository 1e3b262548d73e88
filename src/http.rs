use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use log::{debug, info};
use native_tls::TlsConnector;

use crate::cache::{cache_expiry, HttpCache};
use crate::cookies::CookieJar;
use crate::errors::{Error, Result};
use crate::url::Url;

/// A plain or TLS-wrapped connection.
pub enum Stream {
    Tcp(TcpStream),
    Tls(native_tls::TlsStream<TcpStream>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

type PoolKey = (String, String, u16);

/// The explicitly constructed engine context: socket pool, HTTP cache and
/// cookie jar. One per process in normal use, one per test when tests need
/// a private context. The client owns the pool exclusively; the jar is also
/// written by the script bridge, serialized through this struct.
pub struct Engine {
    pool: HashMap<PoolKey, BufReader<Stream>>,
    pub cache: HttpCache,
    pub cookies: CookieJar,
}

/// Per-request knobs. `method: None` means GET without a payload and POST
/// with one.
pub struct RequestOptions {
    pub max_redirect: u32,
    pub read_cache: bool,
    pub payload: Option<String>,
    pub cookies: bool,
    pub referrer: Option<Url>,
    pub method: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            max_redirect: 3,
            read_cache: true,
            payload: None,
            cookies: true,
            referrer: None,
            method: None,
        }
    }
}

/// A completed request: decoded body text, lowercase-folded headers and the
/// final URL after any redirects.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub explanation: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub url: Url,
}

pub fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Engine {
    pub fn new(cache: HttpCache, cookies: CookieJar) -> Self {
        Engine { pool: HashMap::new(), cache, cookies }
    }

    /// Acquires `url` per the full pipeline: meta schemes, cache, socket
    /// pool, HTTP/1.1 framing, cookies, redirects, cache store.
    pub fn request(&mut self, url: &Url, opts: &RequestOptions) -> Result<Response> {
        match url.scheme.as_str() {
            "about" => {
                let body = if url.path == "blank" { "" } else { "page not found" };
                Ok(Response {
                    status: 200,
                    explanation: "OK".into(),
                    headers: HashMap::new(),
                    body: body.into(),
                    url: url.clone(),
                })
            }
            "data" => Ok(Response {
                status: 200,
                explanation: "OK".into(),
                headers: HashMap::new(),
                body: url.content.clone(),
                url: url.clone(),
            }),
            "file" => {
                if opts.payload.is_some() {
                    return Err(Error::Protocol("cannot POST to a file url".into()));
                }
                let body = fs::read_to_string(&url.path)
                    .map_err(|e| Error::Network(format!("{}: {e}", url.path)))?;
                Ok(Response {
                    status: 200,
                    explanation: "OK".into(),
                    headers: HashMap::new(),
                    body,
                    url: url.clone(),
                })
            }
            "http" | "https" => self.request_socket(url, opts),
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }

    fn request_socket(&mut self, url: &Url, opts: &RequestOptions) -> Result<Response> {
        let method = match &opts.method {
            Some(m) => m.to_ascii_uppercase(),
            None => {
                if opts.payload.is_some() {
                    "POST".into()
                } else {
                    "GET".into()
                }
            }
        };

        let cache_key = url.cache_key();
        if method == "GET" && opts.read_cache {
            if let Some(body) = self.cache.lookup(&cache_key, now_seconds()) {
                return Ok(Response {
                    status: 200,
                    explanation: "OK (cache)".into(),
                    headers: HashMap::new(),
                    body,
                    url: url.clone(),
                });
            }
        }

        let cookie_header = if opts.cookies {
            self.cookies.get_request_cookies(
                &url.host,
                opts.referrer.as_ref().map(|r| r.host.as_str()),
                &method,
            )
        } else {
            String::new()
        };

        let key: PoolKey = (url.scheme.clone(), url.host.clone(), url.port);
        let mut retried = false;
        let (sock, raw) = loop {
            let reused = self.pool.contains_key(&key);
            let mut sock = match self.pool.remove(&key) {
                Some(s) => s,
                None => connect(url)?,
            };
            match send_and_read(&mut sock, url, &method, opts, &cookie_header) {
                Ok(raw) => break (sock, raw),
                // A pooled socket the server already closed shows up as an
                // error on first use; retry once on a fresh connection.
                Err(e) if reused && !retried => {
                    debug!("pooled connection to {}:{} went stale: {e}", url.host, url.port);
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            "{} {} {} {}{}",
            raw.status, raw.explanation, method, url.host, url.path
        );

        for set_cookie in &raw.set_cookies {
            self.cookies.set_cookie_by_host(&url.host, set_cookie, false);
        }

        if raw.keep_alive {
            self.pool.insert(key, sock);
        } else {
            drop(sock);
        }

        if (300..400).contains(&raw.status) && opts.max_redirect > 0 {
            if let Some(location) = raw.headers.get("location") {
                let next = url.resolve(location)?;
                let redirect_opts = RequestOptions {
                    max_redirect: opts.max_redirect - 1,
                    read_cache: opts.read_cache,
                    payload: None,
                    cookies: opts.cookies,
                    referrer: Some(url.clone()),
                    method: None,
                };
                return self.request(&next, &redirect_opts);
            }
        }

        if raw.status == 200 && method == "GET" {
            let now = now_seconds();
            let cache_control = raw.headers.get("cache-control").map(String::as_str);
            if let Some(expires) = cache_expiry(cache_control, now) {
                self.cache.store(&cache_key, &raw.body, expires);
            }
        }

        Ok(Response {
            status: raw.status,
            explanation: raw.explanation,
            headers: raw.headers,
            body: String::from_utf8_lossy(&raw.body).into_owned(),
            url: url.clone(),
        })
    }

    /// Drops every pooled connection.
    pub fn close_idle_sockets(&mut self) {
        self.pool.clear();
    }
}

fn connect(url: &Url) -> Result<BufReader<Stream>> {
    let tcp = TcpStream::connect((url.host.as_str(), url.port))
        .map_err(|e| Error::Network(format!("{}:{}: {e}", url.host, url.port)))?;
    let stream = if url.scheme == "https" {
        let connector = TlsConnector::new().map_err(|e| Error::Tls(e.to_string()))?;
        let tls = connector
            .connect(&url.host, tcp)
            .map_err(|e| Error::Tls(e.to_string()))?;
        Stream::Tls(tls)
    } else {
        Stream::Tcp(tcp)
    };
    Ok(BufReader::new(stream))
}

fn send_and_read(
    sock: &mut BufReader<Stream>,
    url: &Url,
    method: &str,
    opts: &RequestOptions,
    cookie_header: &str,
) -> Result<RawResponse> {
    let mut request = format!("{} {} HTTP/1.1\r\n", method, url.request_path());
    request.push_str(&format!("Host: {}\r\n", url.host));
    request.push_str("Connection: keep-alive\r\n");
    request.push_str("Accept-Encoding: gzip\r\n");
    if !cookie_header.is_empty() {
        request.push_str(&format!("Cookie: {cookie_header}\r\n"));
    }
    if let Some(payload) = &opts.payload {
        request.push_str(&format!("Content-Length: {}\r\n", payload.len()));
    }
    request.push_str("\r\n");
    if let Some(payload) = &opts.payload {
        request.push_str(payload);
    }

    let out = sock.get_mut();
    out.write_all(request.as_bytes())
        .map_err(|e| Error::Network(e.to_string()))?;
    out.flush().map_err(|e| Error::Network(e.to_string()))?;

    read_response(sock)
}

/// A response as read off the wire, body already length-decoded and
/// decompressed. `framed` records whether the body had explicit framing
/// (chunked or content-length); only framed responses may keep the
/// connection alive.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub explanation: String,
    pub headers: HashMap<String, String>,
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
    pub framed: bool,
    pub keep_alive: bool,
}

fn map_read_err(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::Protocol("truncated body".into())
    } else {
        Error::Network(e.to_string())
    }
}

/// Reads one HTTP/1.1 response. Generic over `BufRead` so framing is
/// testable against in-memory buffers.
pub fn read_response<R: BufRead>(r: &mut R) -> Result<RawResponse> {
    let mut statusline = String::new();
    let n = r
        .read_line(&mut statusline)
        .map_err(|e| Error::Network(e.to_string()))?;
    if n == 0 {
        return Err(Error::Protocol("empty response".into()));
    }
    let statusline = statusline.trim_end_matches(['\r', '\n']);
    let mut parts = statusline.splitn(3, ' ');
    let _version = parts
        .next()
        .filter(|v| v.starts_with("HTTP/"))
        .ok_or_else(|| Error::Protocol(format!("malformed status line: {statusline:?}")))?;
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed status line: {statusline:?}")))?;
    let explanation = parts.next().unwrap_or("").trim().to_string();

    let mut headers = HashMap::new();
    let mut set_cookies = Vec::new();
    loop {
        let mut line = String::new();
        let n = r
            .read_line(&mut line)
            .map_err(|e| Error::Network(e.to_string()))?;
        if n == 0 {
            return Err(Error::Protocol("truncated headers".into()));
        }
        if line == "\r\n" || line == "\n" {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Protocol(format!("malformed header: {line:?}")))?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        if key == "set-cookie" {
            set_cookies.push(value.clone());
        }
        headers.insert(key, value);
    }

    let mut gzip = false;
    if let Some(encoding) = headers.get("content-encoding") {
        if encoding != "gzip" {
            return Err(Error::Protocol(format!("unsupported content-encoding: {encoding}")));
        }
        gzip = true;
    }
    let mut chunked = false;
    if let Some(transfer) = headers.get("transfer-encoding") {
        if transfer.contains("compress") || transfer.contains("deflate") {
            return Err(Error::Protocol(format!("unsupported transfer-encoding: {transfer}")));
        }
        chunked = transfer.contains("chunked");
        gzip |= transfer.contains("gzip");
    }

    let mut body = Vec::new();
    let framed;
    if chunked {
        framed = true;
        loop {
            let mut size_line = String::new();
            let n = r
                .read_line(&mut size_line)
                .map_err(|e| Error::Network(e.to_string()))?;
            if n == 0 {
                return Err(Error::Protocol("truncated chunked body".into()));
            }
            let size_str = size_line
                .trim_end_matches(['\r', '\n'])
                .split(';')
                .next()
                .unwrap_or("")
                .trim();
            let size = usize::from_str_radix(size_str, 16)
                .map_err(|_| Error::Protocol(format!("bad chunk size: {size_str:?}")))?;
            let mut chunk = vec![0u8; size];
            r.read_exact(&mut chunk).map_err(map_read_err)?;
            let mut endline = String::new();
            r.read_line(&mut endline).map_err(map_read_err)?;
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk);
        }
    } else if let Some(length) = headers.get("content-length") {
        framed = true;
        let length: usize = length
            .parse()
            .map_err(|_| Error::Protocol(format!("bad content-length: {length:?}")))?;
        body = vec![0u8; length];
        r.read_exact(&mut body).map_err(map_read_err)?;
    } else {
        // HTTP/1.0 fallback: length unknown, read until the server closes.
        framed = false;
        r.read_to_end(&mut body)
            .map_err(|e| Error::Network(e.to_string()))?;
    }

    if gzip {
        let mut decoded = Vec::new();
        GzDecoder::new(body.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| Error::Protocol(format!("gzip: {e}")))?;
        body = decoded;
    }

    let keep_alive = framed
        && headers
            .get("connection")
            .is_some_and(|c| c.eq_ignore_ascii_case("keep-alive"));

    Ok(RawResponse {
        status,
        explanation,
        headers,
        set_cookies,
        body,
        framed,
        keep_alive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Cursor;

    fn response_of(bytes: &[u8]) -> Result<RawResponse> {
        read_response(&mut Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn content_length_body() {
        let raw = response_of(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: keep-alive\r\n\r\nhello",
        )
        .unwrap();
        assert_eq!(raw.status, 200);
        assert_eq!(raw.explanation, "OK");
        assert_eq!(raw.body, b"hello");
        assert!(raw.framed);
        assert!(raw.keep_alive);
    }

    #[test]
    fn chunked_body() {
        let raw = response_of(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(raw.body, b"hello world");
        assert!(raw.framed);
    }

    #[test]
    fn chunked_truncated_is_protocol_error() {
        let err = response_of(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel")
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {err:?}");
    }

    #[test]
    fn gzip_content_encoding() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"compressed page").unwrap();
        let gz = enc.finish().unwrap();
        let mut bytes = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            gz.len()
        )
        .into_bytes();
        bytes.extend_from_slice(&gz);
        let raw = response_of(&bytes).unwrap();
        assert_eq!(raw.body, b"compressed page");
    }

    #[test]
    fn deflate_rejected() {
        let err = response_of(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: deflate\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn malformed_status_line() {
        let err = response_of(b"garbage\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn read_to_close_never_keeps_alive() {
        let raw = response_of(b"HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n\r\nall the rest")
            .unwrap();
        assert_eq!(raw.body, b"all the rest");
        assert!(!raw.framed);
        assert!(!raw.keep_alive);
    }

    #[test]
    fn set_cookie_headers_collected() {
        let raw = response_of(
            b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2; HttpOnly\r\nContent-Length: 0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(raw.set_cookies, vec!["a=1".to_string(), "b=2; HttpOnly".to_string()]);
    }

    #[test]
    fn truncated_content_length_is_protocol_error() {
        let err = response_of(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn data_and_about_schemes() {
        let mut engine = Engine::new(HttpCache::new(None), CookieJar::new());
        let url = Url::new("data:text/html,Hello world!", None).unwrap();
        let resp = engine.request(&url, &RequestOptions::default()).unwrap();
        assert_eq!(resp.body, "Hello world!");

        let url = Url::new("about:blank", None).unwrap();
        let resp = engine.request(&url, &RequestOptions::default()).unwrap();
        assert_eq!(resp.body, "");
    }

    #[test]
    fn post_to_file_fails() {
        let mut engine = Engine::new(HttpCache::new(None), CookieJar::new());
        let url = Url::new("file:///tmp/nope.html", None).unwrap();
        let opts = RequestOptions { payload: Some("x=1".into()), ..Default::default() };
        assert!(engine.request(&url, &opts).is_err());
    }
}
