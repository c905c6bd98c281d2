use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One request as the scratch upstream saw it on the wire.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        let header = self.header("cookie")?;
        for pair in header.split(';') {
            let (cookie_name, value) = pair.trim().split_once('=')?;
            if cookie_name == name {
                return Some(value.to_string());
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            body: body.as_bytes().to_vec(),
            content_type: "text/plain".to_string(),
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.as_bytes().to_vec(),
            content_type: "text/plain".to_string(),
        }
    }

    pub fn bytes(body: Vec<u8>, content_type: &str) -> Self {
        Self {
            status: 200,
            body,
            content_type: content_type.to_string(),
        }
    }
}

type Responder = dyn Fn(&ReceivedRequest) -> Reply + Send + Sync;

/// Scripted localhost HTTP/1.1 upstream: hands every parsed request to the
/// responder, records it for later assertions, and can be told to drop or
/// hang connections to exercise the retry and cancellation paths.
pub struct TestServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    drops_remaining: Arc<AtomicUsize>,
    drop_window: Arc<Mutex<(usize, usize)>>,
    accepted: Arc<AtomicUsize>,
    hang: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn start<F>(responder: F) -> Result<Self>
    where
        F: Fn(&ReceivedRequest) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let requests: Arc<Mutex<Vec<ReceivedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let drops_remaining = Arc::new(AtomicUsize::new(0));
        let drop_window = Arc::new(Mutex::new((0usize, 0usize)));
        let accepted = Arc::new(AtomicUsize::new(0));
        let hang = Arc::new(AtomicUsize::new(0));
        let responder: Arc<Responder> = Arc::new(responder);

        let accept_requests = requests.clone();
        let accept_drops = drops_remaining.clone();
        let accept_window = drop_window.clone();
        let accept_counter = accepted.clone();
        let accept_hang = hang.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(connection) => connection,
                    Err(_) => break,
                };

                let index = accept_counter.fetch_add(1, Ordering::SeqCst);
                let (start, count) = *accept_window.lock().expect("drop window lock");
                if count > 0 && index >= start && index < start + count {
                    let _ = stream.shutdown().await;
                    continue;
                }

                if accept_drops
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                        remaining.checked_sub(1)
                    })
                    .is_ok()
                {
                    let _ = stream.shutdown().await;
                    continue;
                }
                if accept_hang.load(Ordering::SeqCst) != 0 {
                    // Park the connection without answering; the client's
                    // timeout or cancellation has to break the stalemate.
                    tokio::spawn(async move {
                        let mut sink = [0u8; 512];
                        while let Ok(n) = stream.read(&mut sink).await {
                            if n == 0 {
                                break;
                            }
                        }
                    });
                    continue;
                }

                let requests = accept_requests.clone();
                let responder = responder.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(&mut stream, requests, responder).await;
                });
            }
        });

        Ok(Self {
            addr,
            handle,
            requests,
            drops_remaining,
            drop_window,
            accepted,
            hang,
        })
    }

    /// Server that answers 200 "ok" only when every header in `required` is
    /// present, 403 otherwise.
    pub async fn requiring_headers(required: &[&str]) -> Result<Self> {
        let required: Vec<String> = required.iter().map(|name| name.to_string()).collect();
        Self::start(move |request| {
            if required.iter().all(|name| request.has_header(name)) {
                Reply::ok("ok")
            } else {
                Reply::status(403, "missing header")
            }
        })
        .await
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    /// Drop the next `count` connections without reading the request.
    pub fn drop_next(&self, count: usize) {
        self.drops_remaining.store(count, Ordering::SeqCst);
    }

    /// Drop `count` connections starting at the given 0-based accept index.
    pub fn drop_connection_range(&self, start: usize, count: usize) {
        *self.drop_window.lock().expect("drop window lock") = (start, count);
    }

    pub fn accepted_connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Park every following connection without a response.
    pub fn hang_forever(&self) {
        self.hang.store(1, Ordering::SeqCst);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: &mut TcpStream,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    responder: Arc<Responder>,
) -> Result<()> {
    let head = read_head(stream).await?;
    let request = parse_head(&head)?;

    let content_length = request
        .header("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > 0 {
        let mut body = vec![0u8; content_length];
        stream.read_exact(&mut body).await?;
    }

    let reply = responder(&request);
    requests.lock().expect("requests lock").push(request);

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status,
        reason(reply.status),
        reply.content_type,
        reply.body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.write_all(&reply.body).await?;
    stream.shutdown().await.ok();
    Ok(())
}

async fn read_head(stream: &mut TcpStream) -> Result<String> {
    let mut buffer = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        let bytes = stream.read(&mut byte).await?;
        if bytes == 0 {
            break;
        }
        buffer.extend_from_slice(&byte);
        if buffer.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8(buffer).map_err(|_| anyhow!("request head was not UTF-8"))
}

fn parse_head(head: &str) -> Result<ReceivedRequest> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request head"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| anyhow!("missing method"))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| anyhow!("missing target"))?
        .to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(ReceivedRequest {
        method,
        path,
        headers,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}
