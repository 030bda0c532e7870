#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tapline::ProxyError;
use tapline::http::method::Method;
use tapline::http::parser::{ResponseParser, parse_request_head};
use tapline::http::response::ResponseHead;
use tapline::proxy::{ProxyServer, Session, SessionListener};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub fn client_addr() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

/// Runs one exchange against `server` over an in-memory socket and returns
/// everything the client received.
pub async fn run_exchange(server: &Arc<ProxyServer>, request: &[u8]) -> Vec<u8> {
    let (mut client, proxy_side) = tokio::io::duplex(1 << 16);

    let task = {
        let server = server.clone();
        tokio::spawn(async move { server.handle_connection(proxy_side, client_addr()).await })
    };

    client.write_all(request).await.unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), client.read_to_end(&mut received))
        .await
        .expect("proxy did not finish the exchange")
        .unwrap();
    task.await.unwrap();

    received
}

/// A one-shot origin that answers its first connection with `response`.
pub struct Origin {
    pub addr: SocketAddr,
    pub request: JoinHandle<Vec<u8>>,
}

pub async fn origin(response: &'static [u8]) -> Origin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let request = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let received = read_request(&mut socket).await;
        socket.write_all(response).await.unwrap();
        socket.shutdown().await.unwrap();
        received
    });

    Origin { addr, request }
}

/// Reads one complete request, body included.
pub async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        if let Some((head, consumed)) = parse_request_head(&received).unwrap() {
            let body = &received[consumed..];
            let done = match head.content_length().unwrap() {
                Some(len) => body.len() as u64 >= len,
                None if head.is_chunked() => body.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if done {
                return received;
            }
        }

        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return received;
        }
        received.extend_from_slice(&buf[..n]);
    }
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Parses what the client received: the final response head and its
/// unframed body. Interim responses are skipped.
pub fn split_response(raw: &[u8], method: Method) -> (ResponseHead, Vec<u8>) {
    let mut parser = ResponseParser::new(method);
    let mut offset = 0;

    loop {
        offset += parser.parse(&raw[offset..]).unwrap();
        if !parser.is_interim() {
            break;
        }
        parser.reset();
    }

    let (head, mut decoder) = parser.into_parts();
    let mut body = Vec::new();
    let mut rest = &raw[offset..];
    while !rest.is_empty() && !decoder.is_complete() {
        let decoded = decoder.decode(rest, usize::MAX).unwrap();
        body.extend_from_slice(&rest[decoded.payload.clone()]);
        rest = &rest[decoded.consumed..];
    }
    decoder.finish_at_eof().unwrap();

    (head, body)
}

/// Records lifecycle events as `name` or `name:detail` strings.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
    pub progress: Mutex<Vec<u64>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

#[async_trait]
impl SessionListener for Recorder {
    async fn before_request(&self, _session: &mut Session) -> anyhow::Result<()> {
        self.push("before_request");
        Ok(())
    }

    async fn after_request(&self, _session: &mut Session) -> anyhow::Result<()> {
        self.push("after_request");
        Ok(())
    }

    async fn before_response(&self, _session: &mut Session) -> anyhow::Result<()> {
        self.push("before_response");
        Ok(())
    }

    async fn after_response(&self, _session: &mut Session) -> anyhow::Result<()> {
        self.push("after_response");
        Ok(())
    }

    async fn request_failed(
        &self,
        _session: &mut Session,
        _error: &ProxyError,
        attempt: u32,
    ) -> anyhow::Result<Option<tapline::proxy::FailureAction>> {
        self.push(format!("request_failed:{attempt}"));
        Ok(None)
    }

    async fn session_failed(&self, session: Option<&Session>, error: &ProxyError) -> anyhow::Result<()> {
        let kind = match error {
            ProxyError::Connect { .. } => "connect",
            ProxyError::Malformed(_) => "malformed",
            ProxyError::Forwarding(_) => "forwarding",
            _ => "other",
        };
        let scope = if session.is_some() { "session" } else { "none" };
        self.push(format!("session_failed:{kind}:{scope}"));
        Ok(())
    }

    async fn tunnel_established(&self, _session: &mut Session) -> anyhow::Result<()> {
        self.push("tunnel_established");
        Ok(())
    }

    async fn session_progress(&self, _session: &Session, bytes_sent: u64) -> anyhow::Result<()> {
        self.progress.lock().push(bytes_sent);
        Ok(())
    }
}
