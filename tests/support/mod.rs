//! A scriptable mock HTTP/1.1 server for client tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type ReplyFn = dyn Fn(&str) -> Vec<u8> + Send + Sync;

/// Handle onto a running mock server.
pub struct TestServer {
    pub addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
    concurrent: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Number of TCP connections accepted so far.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Raw requests (head plus any `Content-Length` body) in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

/// A `Content-Length` response that keeps the connection open.
pub fn keep_alive_reply(status: u16, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n{}",
        status,
        body.len(),
        body
    )
    .into_bytes()
}

/// A `Content-Length` response after which the server closes the socket.
pub fn close_reply(status: u16, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {} X\r\nContent-Length: {}\r\n\r\n{}",
        status,
        body.len(),
        body
    )
    .into_bytes()
}

/// A redirect that keeps the connection open.
pub fn redirect_reply(status: u16, location: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {} X\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: keep-alive\r\n\r\n",
        status, location
    )
    .into_bytes()
}

pub async fn start_server<F>(reply: F) -> TestServer
where
    F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
{
    start_server_inner(reply, Duration::ZERO, false).await
}

/// Starts a server that waits `delay` before answering each request.
/// Connections are served until the peer goes away or a reply without
/// `keep-alive` is sent.
pub async fn start_server_with_delay<F>(reply: F, delay: Duration) -> TestServer
where
    F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
{
    start_server_inner(reply, delay, false).await
}

/// Starts a server that closes the socket after every reply, regardless of
/// what the reply's headers promise.
pub async fn start_one_shot_server<F>(reply: F) -> TestServer
where
    F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
{
    start_server_inner(reply, Duration::ZERO, true).await
}

async fn start_server_inner<F>(reply: F, delay: Duration, force_close: bool) -> TestServer
where
    F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let accepts = Arc::new(AtomicUsize::new(0));
    let concurrent = Arc::new(AtomicUsize::new(0));
    let max_concurrent = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let reply: Arc<ReplyFn> = Arc::new(reply);

    let server = TestServer {
        addr,
        accepts: accepts.clone(),
        concurrent: concurrent.clone(),
        max_concurrent: max_concurrent.clone(),
        requests: requests.clone(),
    };

    tokio::spawn(async move {
        loop {
            let Ok((stream, _peer)) = listener.accept().await else {
                break;
            };
            accepts.fetch_add(1, Ordering::SeqCst);
            let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            max_concurrent.fetch_max(now, Ordering::SeqCst);

            let reply = reply.clone();
            let requests = requests.clone();
            let concurrent = concurrent.clone();
            tokio::spawn(async move {
                serve_connection(stream, reply, requests, delay, force_close).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    server
}

async fn serve_connection(
    mut stream: TcpStream,
    reply: Arc<ReplyFn>,
    requests: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    force_close: bool,
) {
    loop {
        let Some(request) = read_request(&mut stream).await else {
            break;
        };
        requests.lock().expect("requests lock").push(request.clone());

        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        let response = reply(&request);
        let keep_open = !force_close
            && response
                .windows(b"keep-alive".len())
                .any(|w| w.eq_ignore_ascii_case(b"keep-alive"));
        if stream.write_all(&response).await.is_err() {
            break;
        }
        let _ = stream.flush().await;
        if !keep_open {
            break;
        }
    }
}

/// Reads one request: the head through the blank line, plus a
/// `Content-Length` body when one is declared. Returns `None` at EOF.
async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            let head_end = pos + 4;
            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let body_len = content_length(&head);
            while buf.len() < head_end + body_len {
                let n = stream.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return Some(String::from_utf8_lossy(&buf[..head_end + body_len]).to_string());
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(head: &str) -> usize {
    for line in head.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            return value.trim().parse().unwrap_or(0);
        }
    }
    0
}
