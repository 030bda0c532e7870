mod common;

use common::{Recorder, client_addr, closed_port, read_request, run_exchange};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tapline::config::Config;
use tapline::proxy::ProxyServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

async fn echo(mut socket: TcpStream) {
    let mut buf = [0u8; 1024];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if socket.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        echo(socket).await;
    });
    addr
}

/// A proxy that answers one CONNECT with `reply`, echoing afterwards when
/// the reply is a success. Yields the CONNECT request it received.
async fn mock_upstream(reply: &'static [u8]) -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = String::from_utf8(read_request(&mut socket).await).unwrap();
        socket.write_all(reply).await.unwrap();
        if reply.starts_with(b"HTTP/1.1 200") {
            echo(socket).await;
        }
        request
    });
    (addr, handle)
}

async fn read_head(client: &mut DuplexStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = client.read(&mut byte).await.unwrap();
        assert_eq!(n, 1, "connection closed mid-head: {:?}", String::from_utf8_lossy(&head));
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Opens a tunnel to `authority`, relays `payload` and expects it echoed.
async fn relay_through(server: Arc<ProxyServer>, authority: &str, payload: &[u8]) {
    let (mut client, proxy_side) = tokio::io::duplex(4096);
    let task = tokio::spawn(async move { server.handle_connection(proxy_side, client_addr()).await });

    let connect = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
    client.write_all(connect.as_bytes()).await.unwrap();

    let head = read_head(&mut client).await;
    assert_eq!(head, "HTTP/1.1 200 Connection Established\r\n\r\n");

    client.write_all(payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(10), client.read_exact(&mut echoed))
        .await
        .expect("tunnel stalled")
        .unwrap();
    assert_eq!(echoed, payload);

    client.shutdown().await.unwrap();
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), client.read_to_end(&mut rest))
        .await
        .expect("tunnel did not close")
        .unwrap();
    assert!(rest.is_empty());
    task.await.unwrap();
}

#[tokio::test]
async fn test_tunnel_relays_bytes_both_ways() {
    let target = echo_server().await;
    let recorder = Arc::new(Recorder::default());
    let server = Arc::new(
        ProxyServer::builder(&Config::default())
            .listener(recorder.clone())
            .build()
            .unwrap(),
    );

    relay_through(server, &target.to_string(), b"\x16\x03\x01 opaque tls bytes").await;

    assert_eq!(recorder.events(), ["before_request", "tunnel_established"]);
}

#[tokio::test]
async fn test_unreachable_tunnel_target_gets_502() {
    let dead = closed_port().await;
    let recorder = Arc::new(Recorder::default());
    let server = Arc::new(
        ProxyServer::builder(&Config::default())
            .listener(recorder.clone())
            .build()
            .unwrap(),
    );

    let request = format!("CONNECT {dead} HTTP/1.1\r\nHost: {dead}\r\n\r\n");
    let received = run_exchange(&server, request.as_bytes()).await;

    assert_eq!(received, b"HTTP/1.1 502 Bad Gateway\r\n\r\n");
    assert_eq!(
        recorder.events(),
        ["before_request", "session_failed:connect:session"]
    );
}

#[tokio::test]
async fn test_tunnel_through_upstream_proxy() {
    let (proxy, upstream) = mock_upstream(b"HTTP/1.1 200 Connection established\r\n\r\n").await;
    let config = Config::from_yaml(&format!("upstream:\n  proxy: http://{proxy}\n")).unwrap();
    let server = Arc::new(ProxyServer::new(&config).unwrap());

    relay_through(server, "secure.invalid:443", b"hello through two hops").await;

    let request = upstream.await.unwrap();
    assert!(
        request.starts_with("CONNECT secure.invalid:443 HTTP/1.1\r\n"),
        "{request}"
    );
    assert!(request.contains("Host: secure.invalid:443\r\n"));
}

#[tokio::test]
async fn test_upstream_refusal_fails_the_tunnel() {
    let (proxy, upstream) =
        mock_upstream(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n").await;
    let config = Config::from_yaml(&format!("upstream:\n  proxy: http://{proxy}\n")).unwrap();
    let recorder = Arc::new(Recorder::default());
    let server = Arc::new(
        ProxyServer::builder(&config)
            .listener(recorder.clone())
            .build()
            .unwrap(),
    );

    let received = run_exchange(&server, b"CONNECT secure.invalid:443 HTTP/1.1\r\n\r\n").await;

    assert_eq!(received, b"HTTP/1.1 502 Bad Gateway\r\n\r\n");
    assert!(upstream.await.unwrap().starts_with("CONNECT "));
    assert_eq!(
        recorder.events(),
        ["before_request", "session_failed:connect:session"]
    );
}
