//! End-to-end client tests against a tiny in-process HTTP server, covering
//! redirects, cookies, keep-alive, chunked and gzip framing, and the cache.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use skiff::cache::HttpCache;
use skiff::cookies::CookieJar;
use skiff::http::{Engine, RequestOptions};
use skiff::url::Url;

struct TestRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

struct Counters {
    connections: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Spawns a server thread that accepts up to `max_connections`
/// connections. The handler returns the complete raw response bytes; when
/// they advertise keep-alive the connection is reused for more requests.
fn spawn_server<F>(max_connections: usize, handler: F) -> (String, Counters)
where
    F: Fn(&TestRequest) -> Vec<u8> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let port = listener.local_addr().expect("local addr").port();
    let connections = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(AtomicUsize::new(0));
    let counters = Counters { connections: connections.clone(), requests: requests.clone() };

    thread::spawn(move || {
        for _ in 0..max_connections {
            let Ok((stream, _)) = listener.accept() else { break };
            connections.fetch_add(1, Ordering::SeqCst);
            serve_connection(stream, &handler, &requests);
        }
    });

    (format!("http://127.0.0.1:{port}"), counters)
}

fn serve_connection<F>(stream: TcpStream, handler: &F, requests: &AtomicUsize)
where
    F: Fn(&TestRequest) -> Vec<u8>,
{
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut stream = stream;
    loop {
        let mut reqline = String::new();
        if reader.read_line(&mut reqline).unwrap_or(0) == 0 {
            return;
        }
        let mut parts = reqline.trim_end().splitn(3, ' ');
        let method = parts.next().unwrap_or("").to_string();
        let path = parts.next().unwrap_or("").to_string();

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                return;
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }
        if let Some(length) = headers.get("content-length") {
            let length: usize = length.parse().unwrap_or(0);
            let mut body = vec![0u8; length];
            let _ = reader.read_exact(&mut body);
        }

        requests.fetch_add(1, Ordering::SeqCst);
        let request = TestRequest { method, path, headers };
        let response = handler(&request);
        if stream.write_all(&response).is_err() {
            return;
        }
        let _ = stream.flush();
        if !contains_subslice(&response, b"Connection: keep-alive") {
            return;
        }
    }
}

fn ok_with_body(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

fn status_with_headers(status: &str, headers: &str) -> Vec<u8> {
    format!("HTTP/1.1 {status}\r\n{headers}Content-Length: 0\r\n\r\n").into_bytes()
}

fn private_engine() -> Engine {
    Engine::new(HttpCache::new(None), CookieJar::new())
}

#[test]
fn follows_a_redirect_chain() {
    let (base, counters) = spawn_server(4, |req| match req.path.as_str() {
        "/" => status_with_headers("301 Moved", "Location: /redir1\r\n"),
        "/redir1" => status_with_headers("301 Moved", "Location: /redir2\r\n"),
        "/redir2" => status_with_headers("301 Moved", "Location: /redir3\r\n"),
        "/redir3" => ok_with_body("<title>passed</title>"),
        _ => status_with_headers("404 Not Found", ""),
    });

    let mut engine = private_engine();
    let url = Url::new(&format!("{base}/"), None).unwrap();
    let opts = RequestOptions { max_redirect: 5, ..Default::default() };
    let response = engine.request(&url, &opts).unwrap();
    assert_eq!(response.status, 200);
    assert!(response.body.contains("passed"));
    assert_eq!(response.url.path, "/redir3");
    assert_eq!(counters.requests.load(Ordering::SeqCst), 4);
}

#[test]
fn redirect_limit_stops_the_chain() {
    let (base, _counters) = spawn_server(3, |_req| {
        status_with_headers("301 Moved", "Location: /loop\r\n")
    });
    let mut engine = private_engine();
    let url = Url::new(&format!("{base}/"), None).unwrap();
    let opts = RequestOptions { max_redirect: 2, ..Default::default() };
    let response = engine.request(&url, &opts).unwrap();
    assert_eq!(response.status, 301);
}

#[test]
fn cookies_echo_across_a_redirect() {
    let (base, _counters) = spawn_server(2, |req| match req.path.as_str() {
        "/" => status_with_headers(
            "301 Moved",
            "Set-Cookie: session=1234\r\nLocation: /login\r\n",
        ),
        "/login" => {
            if req.headers.get("cookie").map(String::as_str) == Some("session=1234") {
                ok_with_body("<title>passed</title>")
            } else {
                status_with_headers("404 Not Found", "")
            }
        }
        _ => status_with_headers("404 Not Found", ""),
    });

    let mut engine = private_engine();
    let url = Url::new(&format!("{base}/"), None).unwrap();
    let response = engine.request(&url, &RequestOptions::default()).unwrap();
    assert_eq!(response.status, 200);
    assert!(response.body.contains("passed"));
}

#[test]
fn keep_alive_reuses_the_connection() {
    let (base, counters) = spawn_server(1, |req| {
        let body = format!("hello from {}", req.path);
        format!(
            "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
        .into_bytes()
    });

    let mut engine = private_engine();
    for path in ["/one", "/two", "/three"] {
        let url = Url::new(&format!("{base}{path}"), None).unwrap();
        let response = engine.request(&url, &RequestOptions::default()).unwrap();
        assert_eq!(response.body, format!("hello from {path}"));
    }
    assert_eq!(counters.connections.load(Ordering::SeqCst), 1);
    assert_eq!(counters.requests.load(Ordering::SeqCst), 3);
}

#[test]
fn chunked_transfer_over_the_wire() {
    let (base, _counters) = spawn_server(1, |_req| {
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          7\r\nchunked\r\n8\r\n content\r\n0\r\n\r\n"
            .to_vec()
    });
    let mut engine = private_engine();
    let url = Url::new(&format!("{base}/"), None).unwrap();
    let response = engine.request(&url, &RequestOptions::default()).unwrap();
    assert_eq!(response.body, "chunked content");
}

#[test]
fn gzip_content_over_the_wire() {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"zipped body").unwrap();
    let gz = encoder.finish().unwrap();

    let (base, _counters) = spawn_server(1, move |_req| {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            gz.len()
        )
        .into_bytes();
        response.extend_from_slice(&gz);
        response
    });

    let mut engine = private_engine();
    let url = Url::new(&format!("{base}/"), None).unwrap();
    let response = engine.request(&url, &RequestOptions::default()).unwrap();
    assert_eq!(response.body, "zipped body");
}

#[test]
fn cache_serves_the_second_request() {
    let (base, counters) = spawn_server(2, |_req| {
        b"HTTP/1.1 200 OK\r\nCache-Control: max-age=300\r\nContent-Length: 6\r\n\r\ncached".to_vec()
    });

    let mut engine = private_engine();
    let url = Url::new(&format!("{base}/page"), None).unwrap();
    let first = engine.request(&url, &RequestOptions::default()).unwrap();
    assert_eq!(first.body, "cached");
    let second = engine.request(&url, &RequestOptions::default()).unwrap();
    assert_eq!(second.body, "cached");
    assert_eq!(counters.requests.load(Ordering::SeqCst), 1, "second hit must come from cache");

    // Bypassing the cache reaches the server again.
    let opts = RequestOptions { read_cache: false, ..Default::default() };
    let third = engine.request(&url, &opts).unwrap();
    assert_eq!(third.body, "cached");
    assert_eq!(counters.requests.load(Ordering::SeqCst), 2);
}

#[test]
fn no_store_responses_are_not_cached() {
    let (base, counters) = spawn_server(2, |_req| {
        b"HTTP/1.1 200 OK\r\nCache-Control: no-store\r\nContent-Length: 5\r\n\r\nfresh".to_vec()
    });
    let mut engine = private_engine();
    let url = Url::new(&format!("{base}/"), None).unwrap();
    engine.request(&url, &RequestOptions::default()).unwrap();
    engine.request(&url, &RequestOptions::default()).unwrap();
    assert_eq!(counters.requests.load(Ordering::SeqCst), 2);
}

#[test]
fn samesite_lax_cookie_skipped_on_cross_site_post() {
    let seen_cookie = Arc::new(Mutex::new(Vec::<Option<String>>::new()));
    let seen = seen_cookie.clone();
    let (base, _counters) = spawn_server(2, move |req| {
        seen.lock().unwrap().push(req.headers.get("cookie").cloned());
        ok_with_body("ok")
    });

    let url = Url::new(&format!("{base}/orders"), None).unwrap();
    let mut engine = private_engine();
    engine
        .cookies
        .set_cookie_by_host(&url.host, "foo=bar; SameSite=Lax", false);
    let referrer = Url::new("http://evil.example:1234/", None).unwrap();

    let post = RequestOptions {
        payload: Some("buy=1".into()),
        referrer: Some(referrer.clone()),
        ..Default::default()
    };
    engine.request(&url, &post).unwrap();

    let get = RequestOptions { referrer: Some(referrer), ..Default::default() };
    engine.request(&url, &get).unwrap();

    let seen = seen_cookie.lock().unwrap();
    assert_eq!(seen[0], None, "cross-site POST must omit the lax cookie");
    assert_eq!(seen[1].as_deref(), Some("foo=bar"), "cross-site GET keeps it");
}

#[test]
fn post_payload_reaches_the_server() {
    let got = Arc::new(Mutex::new(String::new()));
    let got_clone = got.clone();
    let (base, _counters) = spawn_server(1, move |req| {
        *got_clone.lock().unwrap() = format!(
            "{} {}",
            req.method,
            req.headers.get("content-length").cloned().unwrap_or_default()
        );
        ok_with_body("done")
    });

    let mut engine = private_engine();
    let url = Url::new(&format!("{base}/submit"), None).unwrap();
    let opts = RequestOptions { payload: Some("name=value".into()), ..Default::default() };
    engine.request(&url, &opts).unwrap();
    assert_eq!(*got.lock().unwrap(), "POST 10");
}
