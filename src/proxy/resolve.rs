//! Name resolution and connection establishment.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{ProxyError, Result};

/// Turns a host name into candidate addresses.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the system's lookup through tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// Resolves `host` and connects to the first address that accepts.
///
/// Every address is tried in turn; the error names them all only once the
/// last one has failed.
pub async fn connect_any(
    resolver: &dyn Resolver,
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr)> {
    let target = format!("{host}:{port}");

    let addrs = resolver.resolve(host, port).await.map_err(|e| ProxyError::Connect {
        target: target.clone(),
        reason: format!("lookup failed: {e}"),
    })?;

    if addrs.is_empty() {
        return Err(ProxyError::Connect {
            target,
            reason: "name resolved to no addresses".to_string(),
        });
    }

    let mut failures = Vec::with_capacity(addrs.len());

    for addr in addrs {
        trace!(%addr, "connecting");

        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                debug!(%target, %addr, "connected");
                return Ok((stream, addr));
            }
            Ok(Err(e)) => failures.push(format!("{addr}: {e}")),
            Err(_) => failures.push(format!("{addr}: timed out")),
        }
    }

    Err(ProxyError::Connect {
        target,
        reason: failures.join(", "),
    })
}
