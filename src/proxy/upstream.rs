//! Upstream proxy chaining
//!
//! When an upstream proxy is configured, plain requests are sent to it in
//! absolute form and tunnels are opened with a nested `CONNECT`.

use bytes::BytesMut;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::buffer::BufferPool;
use crate::error::{ProxyError, Result};
use crate::http::headers::HeaderCollection;
use crate::http::method::{Method, Version};
use crate::http::parser::ResponseParser;
use crate::http::request::RequestBuilder;
use crate::http::writer::write_request_head;
use crate::pipe::Pipe;
use crate::proxy::resolve::{Resolver, connect_any};

/// Address of a second proxy that traffic is chained through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamProxy {
    host: String,
    port: u16,
}

impl UpstreamProxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `http://host[:port]`; the port defaults to 80.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: String| ProxyError::Connect {
            target: input.to_string(),
            reason,
        };

        let url = Url::parse(input).map_err(|e| invalid(format!("invalid upstream proxy URL: {e}")))?;
        if url.scheme() != "http" {
            return Err(invalid(format!("unsupported upstream proxy scheme {}", url.scheme())));
        }

        let host = url
            .host_str()
            .ok_or_else(|| invalid("upstream proxy URL has no host".to_string()))?;
        let port = url.port_or_known_default().unwrap_or(80);

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Opens a tunnel to `authority` through this proxy.
    ///
    /// The returned pipe carries raw tunnel bytes once the proxy has
    /// answered the nested `CONNECT` with a 2xx status.
    pub async fn connect_through(
        &self,
        resolver: &dyn Resolver,
        authority: &str,
        pool: &BufferPool,
        connect_timeout: Duration,
        max_head_bytes: usize,
    ) -> Result<Pipe> {
        let (stream, _) = connect_any(resolver, &self.host, self.port, connect_timeout).await?;
        let mut pipe = Pipe::new(stream, pool);
        pipe.reader.set_read_timeout(Some(connect_timeout));

        let refused = |reason: String| ProxyError::Connect {
            target: authority.to_string(),
            reason,
        };

        let request = RequestBuilder::new()
            .method(Method::Connect)
            .target(authority)
            .version(Version::Http11)
            .header("Host", authority)
            .build()
            .map_err(|e| refused(e.to_string()))?;

        let mut buf = BytesMut::with_capacity(128);
        write_request_head(&mut buf, &request, authority);
        pipe.writer
            .send(&buf)
            .await
            .map_err(|e| refused(format!("upstream proxy {self}: {e}")))?;

        let mut parser = ResponseParser::new(Method::Connect);
        let answered = pipe
            .reader
            .read_head(&mut parser, max_head_bytes)
            .await
            .map_err(|e| refused(format!("upstream proxy {self}: {e}")))?;
        if !answered {
            return Err(refused(format!("upstream proxy {self} closed the connection")));
        }

        let status = parser.head().status();
        if !(200..300).contains(&status) {
            return Err(refused(format!("upstream proxy {self} answered {status}")));
        }

        debug!(proxy = %self, %authority, "upstream tunnel established");
        Ok(pipe)
    }
}

impl FromStr for UpstreamProxy {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for UpstreamProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Headers that describe one connection and must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "Connection",
    "Proxy-Connection",
    "Keep-Alive",
    "Proxy-Authorization",
    "TE",
    "Trailer",
    "Upgrade",
    "Expect",
];

/// End-to-end fields a `Connection` token may never remove: they frame the
/// message or address it.
const PROTECTED: [&str; 3] = ["Content-Length", "Transfer-Encoding", "Host"];

/// Removes hop-by-hop fields, including any the `Connection` header names.
pub fn strip_hop_by_hop(headers: &mut HeaderCollection) {
    let named: Vec<String> = headers
        .get_all("Connection")
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .filter(|token| !PROTECTED.iter().any(|p| p.eq_ignore_ascii_case(token)))
        .collect();

    for name in named.iter().map(String::as_str).chain(HOP_BY_HOP) {
        headers.remove(name);
    }
}
